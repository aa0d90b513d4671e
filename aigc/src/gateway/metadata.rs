//! Page metadata: title, summary, tags, images and same-site sources

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use super::domain::{domain_of_url, filter_sources};
use super::prompts::{tags_prompt, truncate_chars, MAX_TAGS};
use super::{present, Gateway, Outcome};
use crate::cache::TtlClass;
use crate::fingerprint::{normalize_url, Endpoint, Fingerprint};
use crate::upstream::{GenerationRequest, PageContent, SearchHit};
use crate::{Error, Result};

const SUMMARY_CHARS: usize = 300;

#[derive(Debug, Clone, Default)]
pub struct MetadataInput {
    pub url: String,
    pub query: Option<String>,
    pub tag_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataOutputs {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub summary: String,
    pub sources: Vec<SearchHit>,
    pub tag: Vec<String>,
    pub images: Vec<String>,
}

/// Split a comma (or 、/newline) separated tag reply
pub(crate) fn parse_tags(reply: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for raw in reply.split([',', '，', '、', '\n']) {
        let tag = raw
            .trim()
            .trim_start_matches(['#', '-', '*'])
            .trim_matches(['"', '\'', '`'])
            .trim();
        if tag.is_empty() || tag.eq_ignore_ascii_case("tags:") || tags.iter().any(|t| t == tag) {
            continue;
        }
        tags.push(tag.to_string());
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

/// Opening excerpt of the page, cut at a sentence end when one is close
pub(crate) fn summary_excerpt(text: &str) -> String {
    let head = truncate_chars(text.trim(), SUMMARY_CHARS);
    if head.len() == text.trim().len() {
        return head.to_string();
    }

    let cut = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '。' | '!' | '！' | '?' | '？'))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .filter(|end| *end >= head.len() / 2);

    match cut {
        Some(end) => head[..end].to_string(),
        None => format!("{}...", head),
    }
}

impl Gateway {
    /// Metadata for one URL. Tag and source lookups are best effort: their
    /// failures leave the lists empty instead of failing the request.
    pub async fn get_metadata(&self, input: MetadataInput) -> Result<Outcome<MetadataOutputs>> {
        let started = Instant::now();
        let url = input.url.trim().to_string();
        if url.is_empty() {
            return Err(Error::InvalidInput("URL is required".to_string()));
        }

        let key = Fingerprint::new(Endpoint::Metadata)
            .url(Some(url.as_str()))
            .query(input.query.as_deref())
            .field("tag_prompt", input.tag_prompt.as_deref())
            .key();

        if let Some(hit) = self.lookup(&key, started).await {
            return Ok(hit);
        }

        let page = self.sessions.fetch_page(&url).await?;
        let domain = domain_of_url(&url).unwrap_or_default();

        let (tag, tokens_used) = self.tags_for(&page, input.tag_prompt.as_deref()).await;
        let (sources, quota_used) = self
            .related_sources(&page, present(input.query.as_deref()), &domain)
            .await;

        info!(
            url = %url,
            domain = %domain,
            tags = tag.len(),
            sources = sources.len(),
            "Metadata collected"
        );

        let mut outcome = self.fresh(
            MetadataOutputs {
                url: url.clone(),
                domain,
                title: page.title.clone(),
                summary: summary_excerpt(&page.text),
                sources,
                tag,
                images: page.images.clone(),
            },
            tokens_used,
            started,
        );
        outcome.meta.search_api_quota_used = Some(quota_used);

        self.store(&key, TtlClass::Metadata, &outcome).await;
        Ok(outcome)
    }

    async fn tags_for(&self, page: &PageContent, tag_prompt: Option<&str>) -> (Vec<String>, u32) {
        let request = GenerationRequest::new(tags_prompt(&page.text, tag_prompt));
        match self.generate("generate_tags", &request).await {
            Ok(generation) => (parse_tags(&generation.text), generation.tokens_used),
            Err(e) => {
                warn!(url = %page.url, error = %e, "Tag generation failed, returning no tags");
                (Vec::new(), 0)
            }
        }
    }

    /// Search restricted to the page's site. Returns hits and search calls made.
    async fn related_sources(&self, page: &PageContent, query: Option<&str>, domain: &str) -> (Vec<SearchHit>, u32) {
        let Some(search) = &self.search else {
            return (Vec::new(), 0);
        };
        let query = query.unwrap_or(page.title.as_str()).trim();
        if query.is_empty() || domain.is_empty() {
            return (Vec::new(), 0);
        }

        let mut calls = 0u32;
        let result = self
            .retry
            .run("search", |_| {
                calls += 1;
                search.search(query, Some(domain))
            })
            .await;

        match result {
            Ok(hits) => {
                let total = hits.len();
                let kept: Vec<SearchHit> = filter_sources(hits, domain)
                    .into_iter()
                    .filter(|hit| normalize_url(&hit.url) != normalize_url(&page.url))
                    .collect();
                if kept.len() < total {
                    info!(domain, dropped = total - kept.len(), "Filtered off-site or self sources");
                }
                (kept, calls)
            }
            Err(e) => {
                warn!(domain, error = %e, "Related source search failed");
                (Vec::new(), calls)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags("AI, 半導體 , \"Nvidia\", AI, #earnings, stocks, rates, extra"),
            vec!["AI", "半導體", "Nvidia", "earnings", "stocks"]
        );
        assert_eq!(parse_tags("台積電、財報、AI"), vec!["台積電", "財報", "AI"]);
        assert!(parse_tags("  ").is_empty());
    }

    #[test]
    fn test_summary_short_text_untouched() {
        assert_eq!(summary_excerpt("  Short page.  "), "Short page.");
    }

    #[test]
    fn test_summary_cuts_at_sentence() {
        let text = format!("{}. {}", "a".repeat(250), "b".repeat(200));
        let summary = summary_excerpt(&text);
        assert_eq!(summary, format!("{}.", "a".repeat(250)));
    }

    #[test]
    fn test_summary_without_sentence_end() {
        let summary = summary_excerpt(&"x".repeat(1000));
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 3);
        assert!(summary.ends_with("..."));
    }
}
