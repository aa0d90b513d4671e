//! In-process fakes for the model, page fetcher and search collaborators.

#![allow(dead_code)]

use aigc::cache::{CacheTier, CacheTtlConfig, MemoryTier, TieredCache};
use aigc::gateway::Gateway;
use aigc::retry::RetryPolicy;
use aigc::session::SessionManager;
use aigc::upstream::{
    ContentFetcher, Generation, GenerationRequest, Generator, PageContent, SearchHit,
    SearchProvider, TextStream, UpstreamError,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ANSWER_TEXT: &str = "台積電 reported record revenue this quarter.\n\
Source: https://news.cnyes.com/news/id/1 for details.";

pub const QUESTIONS_REPLY: &str = r#"```json
{"questions": [
  {"id": "q1", "text": "What drove revenue?", "type": "fact", "confidence": 0.9},
  {"id": "q2", "text": "Will margins hold?", "type": "analysis", "confidence": 0.8},
  {"id": "q3", "text": "What comes next?"}
]}
```"#;

/// Replies by prompt kind: tags, questions, otherwise an answer
fn default_reply(prompt: &str) -> String {
    if prompt.trim_end().ends_with("Tags:") {
        "AI, 半導體, earnings".to_string()
    } else if prompt.contains("Generate questions now:") {
        QUESTIONS_REPLY.to_string()
    } else {
        ANSWER_TEXT.to_string()
    }
}

pub struct FakeGenerator {
    /// Transient failures to inject before calls succeed
    pub transient_failures: AtomicU32,
    pub always_fail: AtomicBool,
    /// When set, an opened stream yields this many chunks then breaks
    pub fail_after_chunks: Mutex<Option<usize>>,
    pub calls: AtomicU32,
    pub stream_calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
    chunk_chars: usize,
    chunk_delay: Duration,
}

impl FakeGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_chunking(6, Duration::ZERO))
    }

    pub fn with_chunking(chunk_chars: usize, chunk_delay: Duration) -> Self {
        Self {
            transient_failures: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            fail_after_chunks: Mutex::new(None),
            calls: AtomicU32::new(0),
            stream_calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
            chunk_chars,
            chunk_delay,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<UpstreamError> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Some(UpstreamError::Unavailable {
                status: 503,
                message: "overloaded".to_string(),
            });
        }
        let left = self.transient_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.transient_failures.store(left - 1, Ordering::SeqCst);
            return Some(UpstreamError::Timeout("deadline exceeded".to_string()));
        }
        None
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        let text = default_reply(&request.prompt);
        Ok(Generation {
            tokens_used: text.split_whitespace().count() as u32,
            text,
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream, UpstreamError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        let chars: Vec<char> = default_reply(&request.prompt).chars().collect();
        let chunks: Vec<String> = chars
            .chunks(self.chunk_chars.max(1))
            .map(|c| c.iter().collect())
            .collect();
        let delay = self.chunk_delay;
        let fail_after = *self.fail_after_chunks.lock();

        let stream = async_stream::stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(UpstreamError::Connection("stream reset by peer".to_string()));
                    return;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<String, UpstreamError>(chunk);
            }
        };
        Ok(stream.boxed())
    }
}

pub struct FakeFetcher {
    pages: HashMap<String, PageContent>,
    pub calls: AtomicU32,
}

impl FakeFetcher {
    pub fn new(pages: Vec<PageContent>) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.into_iter().map(|p| (p.url.clone(), p)).collect(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<PageContent, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::InvalidRequest(format!("HTTP 404: {}", url)))
    }
}

pub struct FakeSearch {
    hits: Vec<SearchHit>,
    pub calls: AtomicU32,
    pub last_domain: Mutex<Option<String>>,
}

impl FakeSearch {
    pub fn new(urls: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hits: urls
                .iter()
                .map(|u| SearchHit {
                    title: format!("Title for {}", u),
                    url: u.to_string(),
                    content: "snippet".to_string(),
                })
                .collect(),
            calls: AtomicU32::new(0),
            last_domain: Mutex::new(None),
        })
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, _query: &str, domain_filter: Option<&str>) -> Result<Vec<SearchHit>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_domain.lock() = domain_filter.map(String::from);
        Ok(self.hits.clone())
    }
}

pub fn page(url: &str, title: &str, text: &str) -> PageContent {
    PageContent {
        url: url.to_string(),
        title: title.to_string(),
        text: text.to_string(),
        images: vec![format!("{}/cover.jpg", url.trim_end_matches('/'))],
    }
}

pub fn article() -> PageContent {
    page(
        "https://news.cnyes.com/news/id/1",
        "TSMC posts record quarter",
        "TSMC reported record revenue. Demand for AI chips stayed strong. Margins improved.",
    )
}

pub fn retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

pub fn memory_cache() -> Arc<TieredCache> {
    Arc::new(TieredCache::new(
        Some(Arc::new(MemoryTier::new(1_000)) as Arc<dyn CacheTier>),
        None,
        Duration::from_secs(30),
    ))
}

pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub generator: Arc<FakeGenerator>,
    pub fetcher: Arc<FakeFetcher>,
}

pub fn harness_with(generator: Arc<FakeGenerator>, pages: Vec<PageContent>, search: Option<Arc<FakeSearch>>) -> Harness {
    let cache = memory_cache();
    let fetcher = FakeFetcher::new(pages);
    let ttl = CacheTtlConfig::default();
    let sessions = Arc::new(SessionManager::new(
        cache.clone(),
        fetcher.clone(),
        retry(),
        Duration::from_secs(ttl.sessions_secs),
        Duration::from_secs(ttl.pages_secs),
    ));

    let mut gateway = Gateway::new(cache, sessions, generator.clone(), retry(), ttl);
    if let Some(search) = search {
        gateway = gateway.with_search(search);
    }

    Harness {
        gateway: Arc::new(gateway),
        generator,
        fetcher,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeGenerator::new(), vec![article()], None)
}
