//! Content sessions and content resolution
//!
//! A session pins the content a question-generation call worked from, so a
//! follow-up answer call can pass `content_id` instead of re-sending the
//! page. Sessions live in the tiered cache under `session:{id}` and expire
//! passively: an expired session reads exactly like an unknown one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::fingerprint::{Endpoint, Fingerprint};
use crate::retry::RetryPolicy;
use crate::upstream::{ContentFetcher, PageContent};
use crate::{Error, Result};

/// Where a session's content came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum ContentSource {
    /// Fetched from this URL
    Url(String),
    /// Caller supplied the text directly
    Context,
}

/// Content pinned under a `content_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSession {
    pub content_id: String,
    pub source: ContentSource,
    pub fetched_content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ContentSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Content ready for prompting, with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContent {
    pub text: String,
    pub title: Option<String>,
    pub images: Vec<String>,
    pub source: ContentSource,
    /// Set when the content came from an existing session
    pub content_id: Option<String>,
}

impl ResolvedContent {
    pub fn from_context(text: &str) -> Self {
        Self {
            text: text.to_string(),
            title: None,
            images: Vec::new(),
            source: ContentSource::Context,
            content_id: None,
        }
    }

    pub fn from_page(page: PageContent) -> Self {
        Self {
            source: ContentSource::Url(page.url),
            text: page.text,
            title: Some(page.title).filter(|t| !t.is_empty()),
            images: page.images,
            content_id: None,
        }
    }

    fn from_session(session: ContentSession) -> Self {
        Self {
            text: session.fetched_content,
            title: session.title,
            images: session.images,
            source: session.source,
            content_id: Some(session.content_id),
        }
    }
}

fn session_key(content_id: &str) -> String {
    format!("session:{}", content_id)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Session store plus the page-fetch path it falls back to
pub struct SessionManager {
    cache: Arc<TieredCache>,
    fetcher: Arc<dyn ContentFetcher>,
    retry: RetryPolicy,
    session_ttl: Duration,
    page_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        cache: Arc<TieredCache>,
        fetcher: Arc<dyn ContentFetcher>,
        retry: RetryPolicy,
        session_ttl: Duration,
        page_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            fetcher,
            retry,
            session_ttl,
            page_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Mint a session for freshly resolved content and return it
    pub async fn create_session(&self, content: &ResolvedContent) -> ContentSession {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.session_ttl).unwrap_or_else(|_| chrono::Duration::hours(1));

        let session = ContentSession {
            content_id: Uuid::new_v4().to_string(),
            source: content.source.clone(),
            fetched_content: content.text.clone(),
            title: content.title.clone(),
            images: content.images.clone(),
            created_at,
            expires_at,
        };

        self.cache
            .set_json(&session_key(&session.content_id), &session, self.session_ttl)
            .await;
        metrics::counter!("aigc_sessions_created_total").increment(1);
        debug!(content_id = %session.content_id, "Content session created");
        session
    }

    /// Look up a session. Unknown and expired ids both return `None`.
    pub async fn resolve(&self, content_id: &str) -> Option<ContentSession> {
        let key = session_key(content_id);
        let session: ContentSession = self.cache.get_json(&key).await?;
        if session.is_expired(Utc::now()) {
            self.cache.delete(&key).await;
            return None;
        }
        Some(session)
    }

    /// Resolve content from a session, inline context, or a URL fetch, in
    /// that order. A `content_id` that does not resolve is not an error.
    pub async fn resolve_or_fetch(
        &self,
        content_id: Option<&str>,
        url: Option<&str>,
        context: Option<&str>,
    ) -> Result<ResolvedContent> {
        if let Some(id) = present(content_id) {
            match self.resolve(id).await {
                Some(session) => {
                    metrics::counter!("aigc_session_lookups_total", "result" => "hit").increment(1);
                    debug!(content_id = id, "Content resolved from session");
                    return Ok(ResolvedContent::from_session(session));
                }
                None => {
                    metrics::counter!("aigc_session_lookups_total", "result" => "miss").increment(1);
                    info!(content_id = id, "content_id not found or expired, falling back to request content");
                }
            }
        }

        if let Some(text) = present(context) {
            return Ok(ResolvedContent::from_context(text));
        }

        if let Some(url) = present(url) {
            let page = self.fetch_page(url).await?;
            return Ok(ResolvedContent::from_page(page));
        }

        Err(Error::InvalidInput(match present(content_id) {
            Some(_) => "content_id is unknown or expired and no url or context was provided".to_string(),
            None => "one of url or context is required".to_string(),
        }))
    }

    /// Fetch a page through the page cache, retrying transient failures
    pub async fn fetch_page(&self, url: &str) -> Result<PageContent> {
        let key = Fingerprint::new(Endpoint::Page).url(Some(url)).key();
        if let Some(page) = self.cache.get_json::<PageContent>(key.as_str()).await {
            debug!(url, "Page served from cache");
            return Ok(page);
        }

        let page = self.retry.run("fetch", |_| self.fetcher.fetch(url)).await?;
        self.cache.set_json(key.as_str(), &page, self.page_ttl).await;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContentFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<PageContent, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("/empty") {
                return Err(UpstreamError::NoContent(url.to_string()));
            }
            Ok(PageContent {
                url: url.to_string(),
                title: "Title".to_string(),
                text: format!("body of {}", url),
                images: vec![],
            })
        }
    }

    fn manager(ttl: Duration) -> (SessionManager, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicU32::new(0),
        });
        let cache = Arc::new(TieredCache::new(
            Some(Arc::new(crate::cache::MemoryTier::new(100)) as Arc<dyn crate::cache::CacheTier>),
            None,
            Duration::from_secs(30),
        ));
        let manager = SessionManager::new(
            cache,
            fetcher.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            ttl,
            Duration::from_secs(60),
        );
        (manager, fetcher)
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let (manager, _) = manager(Duration::from_secs(60));
        let content = ResolvedContent::from_context("pinned text");
        let session = manager.create_session(&content).await;

        let resolved = manager
            .resolve_or_fetch(Some(&session.content_id), None, None)
            .await
            .unwrap();
        assert_eq!(resolved.text, "pinned text");
        assert_eq!(resolved.content_id.as_deref(), Some(session.content_id.as_str()));
    }

    #[tokio::test]
    async fn test_session_takes_precedence_without_fetch() {
        let (manager, fetcher) = manager(Duration::from_secs(60));
        let session = manager
            .create_session(&ResolvedContent::from_context("pinned"))
            .await;

        let resolved = manager
            .resolve_or_fetch(Some(&session.content_id), Some("https://a.test/x"), None)
            .await
            .unwrap();
        assert_eq!(resolved.text, "pinned");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_falls_back_to_url() {
        let (manager, fetcher) = manager(Duration::from_secs(60));
        let resolved = manager
            .resolve_or_fetch(Some("no-such-id"), Some("https://a.test/x"), None)
            .await
            .unwrap();
        assert_eq!(resolved.text, "body of https://a.test/x");
        assert!(resolved.content_id.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_session_reads_as_missing() {
        let (manager, _) = manager(Duration::from_secs(60));
        let past = Utc::now() - chrono::Duration::seconds(5);
        let stale = ContentSession {
            content_id: "old".to_string(),
            source: ContentSource::Context,
            fetched_content: "stale".to_string(),
            title: None,
            images: vec![],
            created_at: past - chrono::Duration::seconds(60),
            expires_at: past,
        };
        manager
            .cache
            .set_json(&session_key("old"), &stale, Duration::from_secs(60))
            .await;

        assert!(manager.resolve("old").await.is_none());
        let resolved = manager
            .resolve_or_fetch(Some("old"), None, Some("fresh"))
            .await
            .unwrap();
        assert_eq!(resolved.text, "fresh");
    }

    #[tokio::test]
    async fn test_context_preferred_over_url() {
        let (manager, fetcher) = manager(Duration::from_secs(60));
        let resolved = manager
            .resolve_or_fetch(None, Some("https://a.test/x"), Some("inline"))
            .await
            .unwrap();
        assert_eq!(resolved.source, ContentSource::Context);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_to_resolve_is_invalid_input() {
        let (manager, _) = manager(Duration::from_secs(60));
        let err = manager.resolve_or_fetch(None, Some(""), Some("  ")).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_page_cache_collapses_fetches() {
        let (manager, fetcher) = manager(Duration::from_secs(60));
        manager.fetch_page("https://a.test/x?utm_source=mail").await.unwrap();
        manager.fetch_page("https://a.test/x").await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreadable_page_is_fetched_once() {
        let (manager, fetcher) = manager(Duration::from_secs(60));
        let err = manager.fetch_page("https://a.test/empty").await.unwrap_err();

        assert!(matches!(err, Error::Upstream(UpstreamError::NoContent(_))));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
