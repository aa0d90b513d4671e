//! Upstream collaborators: LLM generation, page fetching, web search
//!
//! The gateway only sees the traits defined here. Concrete adapters talk to
//! Gemini, plain HTTP with HTML extraction, and Google Custom Search.

mod fetch;
mod gemini;
mod search;

pub use fetch::HttpContentFetcher;
pub use gemini::GeminiClient;
pub use search::GoogleSearchClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Failure reported by an upstream collaborator.
///
/// Every variant is either transient (worth retrying) or terminal; see
/// [`UpstreamError::is_transient`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("provider not available in this region: {0}")]
    RegionUnsupported(String),

    #[error("rejected request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// The page loaded but held no readable text
    #[error("no readable content: {0}")]
    NoContent(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    /// Timeouts, 5xx, rate limits, connection and fetch failures
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_)
                | UpstreamError::Unavailable { .. }
                | UpstreamError::RateLimited(_)
                | UpstreamError::Connection(_)
                | UpstreamError::Fetch(_)
        )
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Unavailable { .. } => "unavailable",
            UpstreamError::RateLimited(_) => "rate_limited",
            UpstreamError::Connection(_) => "connection",
            UpstreamError::Fetch(_) => "fetch",
            UpstreamError::QuotaExhausted(_) => "quota",
            UpstreamError::Unauthorized(_) => "unauthorized",
            UpstreamError::RegionUnsupported(_) => "region",
            UpstreamError::InvalidRequest(_) => "invalid_request",
            UpstreamError::Malformed(_) => "malformed",
            UpstreamError::NoContent(_) => "no_content",
            UpstreamError::NotConfigured(_) => "not_configured",
        }
    }

    /// Map a transport-level reqwest failure
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            UpstreamError::Connection(err.to_string())
        } else if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else {
            UpstreamError::Connection(err.to_string())
        }
    }

    /// Map a non-success API response
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        let message = truncate_message(body);

        if lower.contains("location is not supported") {
            return UpstreamError::RegionUnsupported(message);
        }

        match status {
            401 | 403 => UpstreamError::Unauthorized(message),
            429 if lower.contains("per day") || lower.contains("billing") => {
                UpstreamError::QuotaExhausted(message)
            }
            429 => UpstreamError::RateLimited(message),
            408 => UpstreamError::Timeout(message),
            500..=599 => UpstreamError::Unavailable { status, message },
            _ => UpstreamError::InvalidRequest(format!("HTTP {}: {}", status, message)),
        }
    }
}

fn truncate_message(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Extracted page content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// One web search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// A single prompt to the LLM
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens: None,
            temperature: None,
        }
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
}

/// Incremental text, in generation order
pub type TextStream = BoxStream<'static, Result<String, UpstreamError>>;

/// LLM text generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model name reported as `provider` in responses
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, UpstreamError>;

    /// Open a streaming generation. Errors before the first chunk come back
    /// here; later ones arrive inside the stream.
    async fn generate_stream(&self, request: &GenerationRequest)
        -> Result<TextStream, UpstreamError>;
}

/// Page fetch and main-content extraction
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageContent, UpstreamError>;
}

/// Web search
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search, optionally restricted to one site
    async fn search(
        &self,
        query: &str,
        domain_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>, UpstreamError>;
}
