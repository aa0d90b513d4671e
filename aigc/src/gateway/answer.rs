//! Grounded answers

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::info;

use super::prompts::answer_prompt;
use super::{present, Gateway, Outcome};
use crate::cache::TtlClass;
use crate::fingerprint::{CacheKey, Endpoint, Fingerprint};
use crate::upstream::GenerationRequest;
use crate::{Error, Result};

pub(crate) const ANSWER_MAX_TOKENS: u32 = 800;
pub(crate) const ANSWER_TEMPERATURE: f32 = 0.7;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s\)\]>\x{3000}-\x{303f}\x{ff08}\x{ff09}\x{ff0c}]+").expect("valid url regex")
});

#[derive(Debug, Clone, Default)]
pub struct AnswerInput {
    pub query: String,
    pub url: Option<String>,
    pub context: Option<String>,
    pub prompt: Option<String>,
    pub content_id: Option<String>,
    pub lang: String,
}

/// A URL cited in the answer text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    /// The line of the answer the URL appears in
    pub text: String,
    /// Character range `start-end` of the URL within the answer
    pub span: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutputs {
    pub result: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl AnswerOutputs {
    pub fn new(result: String) -> Self {
        let citations = extract_citations(&result);
        Self { result, citations }
    }
}

/// URLs in an answer, deduplicated, in order of first appearance
pub fn extract_citations(answer: &str) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();

    for m in URL_PATTERN.find_iter(answer) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"', '*', '`']);
        if url.len() <= "https://".len() || citations.iter().any(|c| c.url == url) {
            continue;
        }

        let start = answer[..m.start()].chars().count();
        let end = start + url.chars().count();

        let line_start = answer[..m.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = answer[m.start()..]
            .find('\n')
            .map(|i| m.start() + i)
            .unwrap_or(answer.len());

        citations.push(Citation {
            url: url.to_string(),
            text: answer[line_start..line_end].trim().to_string(),
            span: format!("{}-{}", start, end),
        });
    }

    citations
}

impl AnswerInput {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("Query is required".to_string()));
        }
        Ok(())
    }

    /// Fingerprint of this request in the answer namespace
    pub fn cache_key(&self) -> CacheKey {
        Fingerprint::new(Endpoint::Answer)
            .url(self.url.as_deref())
            .context(self.context.as_deref())
            .query(Some(self.query.as_str()))
            .lang(Some(self.lang.as_str()))
            .prompt(self.prompt.as_deref())
            .field("content_id", self.content_id.as_deref())
            .key()
    }

    pub(crate) fn generation_request(&self, content: &str) -> GenerationRequest {
        GenerationRequest::new(answer_prompt(
            content,
            &self.query,
            &self.lang,
            self.prompt.as_deref(),
        ))
        .max_output_tokens(ANSWER_MAX_TOKENS)
        .temperature(ANSWER_TEMPERATURE)
    }
}

impl Gateway {
    /// Answer a question about resolved content. Never creates a session.
    pub async fn get_answer(&self, input: AnswerInput) -> Result<Outcome<AnswerOutputs>> {
        let started = Instant::now();
        input.validate()?;

        let key = input.cache_key();
        if let Some(hit) = self.lookup(&key, started).await {
            return Ok(hit);
        }

        let content = self
            .sessions
            .resolve_or_fetch(
                present(input.content_id.as_deref()),
                input.url.as_deref(),
                input.context.as_deref(),
            )
            .await?;

        let generation = self
            .generate("generate_answer", &input.generation_request(&content.text))
            .await?;

        let outputs = AnswerOutputs::new(generation.text);
        info!(
            chars = outputs.result.chars().count(),
            citations = outputs.citations.len(),
            tokens = generation.tokens_used,
            "Answer generated"
        );

        let outcome = self.fresh(outputs, generation.tokens_used, started);
        self.store(&key, TtlClass::Answers, &outcome).await;
        Ok(outcome)
    }
}
