//! HTTP page fetcher with main-content extraction

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ContentFetcher, PageContent, UpstreamError};
use crate::Result;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; aigc-gateway/0.3; +https://github.com/aigc-gateway)";

/// Tried in order; the first one holding substantial text wins
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".article-body",
    "#article-body",
    ".news-content",
    "#content",
];

const MIN_SECTION_CHARS: usize = 200;
const MAX_IMAGES: usize = 10;

/// Fetches pages over HTTP and extracts title, main text and images
pub struct HttpContentFetcher {
    client: Client,
    max_chars: usize,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client, max_chars })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, UpstreamError> {
        let parsed = Url::parse(url)
            .map_err(|e| UpstreamError::InvalidRequest(format!("invalid url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidRequest(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(format!("fetching {}", url))
            } else {
                UpstreamError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429 {
            return Err(UpstreamError::InvalidRequest(format!("HTTP {} for {}", status.as_u16(), url)));
        }
        if !status.is_success() {
            return Err(UpstreamError::Fetch(format!("HTTP {} for {}", status.as_u16(), url)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| UpstreamError::Fetch(e.to_string()))?;

        let page = extract_page(&html, &parsed, self.max_chars);
        if page.text.is_empty() {
            return Err(UpstreamError::NoContent(url.to_string()));
        }

        debug!(url, chars = page.text.chars().count(), images = page.images.len(), "Fetched page");
        Ok(page)
    }
}

/// Extract a [`PageContent`] from raw HTML
pub(crate) fn extract_page(html: &str, base: &Url, max_chars: usize) -> PageContent {
    let document = Html::parse_document(html);

    PageContent {
        url: base.to_string(),
        title: extract_title(&document).unwrap_or_else(|| base.to_string()),
        text: truncate_chars(&extract_main_text(&document), max_chars),
        images: extract_images(&document, base),
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    Selector::parse(selector)
        .ok()
        .and_then(|s| document.select(&s).next())
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    select_first(document, selector)
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(document: &Html) -> Option<String> {
    meta_content(document, "meta[property='og:title']")
        .or_else(|| {
            select_first(document, "title")
                .map(|el| clean_text(&element_text(&el)))
                .filter(|t| !t.is_empty())
        })
        .or_else(|| {
            select_first(document, "h1")
                .map(|el| clean_text(&element_text(&el)))
                .filter(|t| !t.is_empty())
        })
}

fn extract_main_text(document: &Html) -> String {
    for selector in CONTENT_SELECTORS {
        if let Some(element) = select_first(document, selector) {
            let text = clean_text(&element_text(&element));
            if text.chars().count() >= MIN_SECTION_CHARS {
                return text;
            }
        }
    }

    // Paragraph text is less noisy than the whole body
    let paragraphs = Selector::parse("p")
        .map(|s| {
            document
                .select(&s)
                .map(|p| clean_text(&element_text(&p)))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if paragraphs.chars().count() >= MIN_SECTION_CHARS {
        return paragraphs;
    }

    select_first(document, "body")
        .map(|body| clean_text(&element_text(&body)))
        .unwrap_or(paragraphs)
}

fn extract_images(document: &Html, base: &Url) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        if images.len() >= MAX_IMAGES {
            return;
        }
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") {
            return;
        }
        if let Ok(resolved) = base.join(raw) {
            let resolved = resolved.to_string();
            if !images.contains(&resolved) {
                images.push(resolved);
            }
        }
    };

    if let Some(og) = meta_content(document, "meta[property='og:image']") {
        push(og.as_str());
    }
    if let Ok(selector) = Selector::parse("img") {
        for img in document.select(&selector) {
            let value = img.value();
            if let Some(src) = value.attr("src").or_else(|| value.attr("data-src")) {
                push(src);
            }
        }
    }

    images
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"
        <html>
        <head>
            <title>Fallback Title</title>
            <meta property="og:title" content="Rate decision explained">
            <meta property="og:image" content="/img/cover.jpg">
        </head>
        <body>
            <nav>Home | Markets | Tech</nav>
            <article>
                <p>The central bank held its policy rate steady on Thursday, citing moderating inflation
                and a resilient labour market. Officials signalled that future moves would depend on data
                released over the coming quarter, and several members noted upside risks from energy prices.</p>
                <img src="https://cdn.example.com/chart.png">
                <img src="data:image/png;base64,AAAA">
            </article>
            <footer>Copyright</footer>
        </body>
        </html>
    "#;

    fn base() -> Url {
        Url::parse("https://news.example.com/a/1").unwrap()
    }

    #[test]
    fn test_extracts_article_fields() {
        let page = extract_page(ARTICLE, &base(), 10_000);
        assert_eq!(page.title, "Rate decision explained");
        assert!(page.text.starts_with("The central bank held"));
        assert!(!page.text.contains("Markets"));
        assert_eq!(
            page.images,
            vec![
                "https://news.example.com/img/cover.jpg".to_string(),
                "https://cdn.example.com/chart.png".to_string(),
            ]
        );
    }

    #[test]
    fn test_title_falls_back_to_title_tag() {
        let html = "<html><head><title> Plain </title></head><body><p>hi</p></body></html>";
        let page = extract_page(html, &base(), 100);
        assert_eq!(page.title, "Plain");
        assert_eq!(page.text, "hi");
    }

    #[test]
    fn test_text_is_truncated_on_char_boundary() {
        let html = format!("<html><body><article>{}</article></body></html>", "中".repeat(500));
        let page = extract_page(&html, &base(), 10);
        assert_eq!(page.text.chars().count(), 10);
    }

    #[tokio::test]
    async fn test_empty_page_is_terminal() {
        let app = axum::Router::new().route(
            "/empty",
            axum::routing::get(|| async { axum::response::Html("<html><body><nav></nav></body></html>") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = HttpContentFetcher::new(Duration::from_secs(5), 1000).unwrap();
        let err = fetcher
            .fetch(&format!("http://{}/empty", addr))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::NoContent(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = HttpContentFetcher::new(Duration::from_secs(1), 1000).unwrap();
        let err = fetcher.fetch("ftp://example.com/file").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
