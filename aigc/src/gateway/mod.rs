//! Request orchestration
//!
//! Every endpoint runs the same pipeline: fingerprint the inputs, consult
//! the tiered cache, and on a miss resolve content, call the model through
//! the retry policy, then populate the cache under the endpoint's TTL class.

mod answer;
pub mod domain;
mod metadata;
pub mod prompts;
mod questions;
mod stream;

pub use answer::{extract_citations, AnswerInput, AnswerOutputs, Citation};
pub use metadata::{MetadataInput, MetadataOutputs};
pub use questions::{parse_questions, Question, QuestionsInput, QuestionsOutputs};
pub use stream::{AnswerEvent, STREAM_BUFFER};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cache::{CacheTtlConfig, TieredCache, TtlClass};
use crate::fingerprint::CacheKey;
use crate::retry::RetryPolicy;
use crate::session::SessionManager;
use crate::upstream::{Generation, GenerationRequest, Generator, SearchProvider};
use crate::Result;

/// Usage and timing reported alongside outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_api_quota_used: Option<u32>,
}

/// A completed unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub outputs: T,
    pub provider: String,
    pub meta: ResponseMeta,
}

/// What the cache stores per fingerprint. The envelope is rebuilt per
/// request so task ids and timestamps are never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedOutcome<T> {
    outputs: T,
    provider: String,
    tokens_used: u32,
    #[serde(default)]
    search_api_quota_used: Option<u32>,
}

/// Validated endpoint inputs
#[derive(Debug, Clone)]
pub enum GatewayRequest {
    Questions(QuestionsInput),
    Metadata(MetadataInput),
    Answer(AnswerInput),
}

/// Outputs of any endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GatewayOutputs {
    Questions(QuestionsOutputs),
    Metadata(MetadataOutputs),
    Answer(AnswerOutputs),
}

impl<T> Outcome<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            outputs: f(self.outputs),
            provider: self.provider,
            meta: self.meta,
        }
    }
}

/// Orchestrates cache, sessions and upstream collaborators
pub struct Gateway {
    cache: Arc<TieredCache>,
    sessions: Arc<SessionManager>,
    generator: Arc<dyn Generator>,
    search: Option<Arc<dyn SearchProvider>>,
    retry: RetryPolicy,
    ttl: CacheTtlConfig,
}

impl Gateway {
    pub fn new(
        cache: Arc<TieredCache>,
        sessions: Arc<SessionManager>,
        generator: Arc<dyn Generator>,
        retry: RetryPolicy,
        ttl: CacheTtlConfig,
    ) -> Self {
        Self {
            cache,
            sessions,
            generator,
            search: None,
            retry,
            ttl,
        }
    }

    /// Enable related-source lookup for metadata
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn provider(&self) -> &str {
        self.generator.model_name()
    }

    /// Dispatch a validated request to its flow
    pub async fn handle(&self, request: GatewayRequest) -> Result<Outcome<GatewayOutputs>> {
        match request {
            GatewayRequest::Questions(input) => Ok(self
                .generate_questions(input)
                .await?
                .map(GatewayOutputs::Questions)),
            GatewayRequest::Metadata(input) => Ok(self
                .get_metadata(input)
                .await?
                .map(GatewayOutputs::Metadata)),
            GatewayRequest::Answer(input) => {
                Ok(self.get_answer(input).await?.map(GatewayOutputs::Answer))
            }
        }
    }

    fn ttl(&self, class: TtlClass) -> Duration {
        self.ttl.ttl_for(class)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey, started: Instant) -> Option<Outcome<T>> {
        let cached: CachedOutcome<T> = self.cache.get_json(key.as_str()).await?;
        debug!(key = %key, "Serving from cache");
        Some(Outcome {
            outputs: cached.outputs,
            provider: cached.provider,
            meta: ResponseMeta {
                tokens_used: cached.tokens_used,
                latency_ms: started.elapsed().as_millis() as u64,
                cached: true,
                search_api_quota_used: cached.search_api_quota_used,
            },
        })
    }

    async fn store<T: Serialize + Clone>(&self, key: &CacheKey, class: TtlClass, outcome: &Outcome<T>) {
        let cached = CachedOutcome {
            outputs: outcome.outputs.clone(),
            provider: outcome.provider.clone(),
            tokens_used: outcome.meta.tokens_used,
            search_api_quota_used: outcome.meta.search_api_quota_used,
        };
        self.cache.set_json(key.as_str(), &cached, self.ttl(class)).await;
    }

    /// One model call under the retry policy
    async fn generate(&self, operation: &'static str, request: &GenerationRequest) -> Result<Generation> {
        self.retry
            .run(operation, |_| self.generator.generate(request))
            .await
    }

    fn fresh<T>(&self, outputs: T, tokens_used: u32, started: Instant) -> Outcome<T> {
        Outcome {
            outputs,
            provider: self.provider().to_string(),
            meta: ResponseMeta {
                tokens_used,
                latency_ms: started.elapsed().as_millis() as u64,
                cached: false,
                search_api_quota_used: None,
            },
        }
    }
}

/// Trimmed value, with empty treated as absent
pub(crate) fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
