//! Question generation

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use super::prompts::{questions_prompt, MAX_QUESTIONS};
use super::{present, Gateway, Outcome};
use crate::cache::TtlClass;
use crate::fingerprint::{Endpoint, Fingerprint};
use crate::upstream::{GenerationRequest, UpstreamError};
use crate::{Error, Result};

const FALLBACK_TYPE: &str = "analytical";
const FALLBACK_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Default)]
pub struct QuestionsInput {
    pub url: Option<String>,
    pub context: Option<String>,
    pub prompt: Option<String>,
    pub lang: String,
    pub previous_questions: Vec<String>,
    pub content_id: Option<String>,
    /// Page type hint, `answer_page` by default
    pub kind: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionsOutputs {
    pub result: Vec<Question>,
    /// Session holding the content these questions were generated from
    pub content_id: Option<String>,
}

/// Loose shape of what the model returns
#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Extract questions from a model reply: the outermost JSON object when one
/// parses, else one question per non-empty line.
pub fn parse_questions(reply: &str) -> Vec<Question> {
    let from_json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<RawReply>(&reply[start..=end]).ok()
        }
        _ => None,
    };

    let questions: Vec<Question> = match from_json {
        Some(raw) => raw
            .questions
            .into_iter()
            .filter_map(|q| {
                let text = q.text?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some((q.id, text, q.kind, q.confidence))
            })
            .enumerate()
            .map(|(i, (id, text, kind, confidence))| Question {
                id: match id {
                    Some(serde_json::Value::String(s)) if !s.is_empty() => s,
                    Some(serde_json::Value::Number(n)) => format!("q{}", n),
                    _ => format!("q{}", i + 1),
                },
                text,
                kind: kind.filter(|k| !k.is_empty()).unwrap_or_else(|| FALLBACK_TYPE.to_string()),
                confidence: confidence.unwrap_or(FALLBACK_CONFIDENCE).clamp(0.0, 1.0),
            })
            .collect(),
        None => reply
            .lines()
            .map(strip_list_marker)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("```"))
            .enumerate()
            .map(|(i, line)| Question {
                id: format!("q{}", i + 1),
                text: line.to_string(),
                kind: FALLBACK_TYPE.to_string(),
                confidence: FALLBACK_CONFIDENCE,
            })
            .collect(),
    };

    questions.into_iter().take(MAX_QUESTIONS).collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line.trim()
}

impl Gateway {
    /// Generate up to five questions about a page or text.
    ///
    /// Without a `content_id` a new content session is minted from the
    /// resolved content and returned in the outputs. A supplied `content_id`
    /// is echoed back when it resolves and never causes a new session.
    pub async fn generate_questions(&self, input: QuestionsInput) -> Result<Outcome<QuestionsOutputs>> {
        let started = Instant::now();
        let content_id = present(input.content_id.as_deref());

        if content_id.is_none()
            && present(input.url.as_deref()).is_none()
            && present(input.context.as_deref()).is_none()
        {
            return Err(Error::InvalidInput(
                "Either url or context must be provided".to_string(),
            ));
        }

        let previous = input.previous_questions.join("\u{1f}");
        let key = Fingerprint::new(Endpoint::Questions)
            .url(input.url.as_deref())
            .context(input.context.as_deref())
            .lang(Some(input.lang.as_str()))
            .prompt(input.prompt.as_deref())
            .field("type", input.kind.as_deref())
            .field("source_url", input.source_url.as_deref())
            .field("previous_questions", Some(previous.as_str()))
            .field("content_id", content_id)
            .key();

        if let Some(hit) = self.lookup(&key, started).await {
            return Ok(hit);
        }

        let content = self
            .sessions
            .resolve_or_fetch(content_id, input.url.as_deref(), input.context.as_deref())
            .await?;

        let prompt = questions_prompt(
            &content.text,
            &input.lang,
            &input.previous_questions,
            input.prompt.as_deref(),
        );
        let generation = self
            .generate("generate_questions", &GenerationRequest::new(prompt))
            .await?;

        let questions = parse_questions(&generation.text);
        if questions.is_empty() {
            return Err(Error::Upstream(UpstreamError::Malformed(
                "model reply contained no questions".to_string(),
            )));
        }

        let content_id = match content_id {
            Some(_) => content.content_id.clone(),
            None => Some(self.sessions.create_session(&content).await.content_id),
        };

        info!(
            questions = questions.len(),
            content_id = content_id.as_deref().unwrap_or("-"),
            tokens = generation.tokens_used,
            "Questions generated"
        );

        let outcome = self.fresh(
            QuestionsOutputs {
                result: questions,
                content_id,
            },
            generation.tokens_used,
            started,
        );
        self.store(&key, TtlClass::Questions, &outcome).await;
        Ok(outcome)
    }
}
