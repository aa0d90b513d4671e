//! Request fingerprinting
//!
//! Collapses semantically identical requests onto one cache key. Inputs are
//! normalized first, then written into a length-prefixed canonical form and
//! hashed, so no field value can bleed into the next one.

use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Query parameters that only carry click-tracking state
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "_ga", "ref_src",
];

/// Logical endpoint (or internal namespace) a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Questions,
    Metadata,
    Answer,
    /// Scraped page content
    Page,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Questions => "questions",
            Endpoint::Metadata => "metadata",
            Endpoint::Answer => "answer",
            Endpoint::Page => "page",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder for a request fingerprint.
///
/// Absent fields and empty strings are equivalent. When a non-empty
/// `context` is present the `url` does not participate at all.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    endpoint: Endpoint,
    url: Option<String>,
    context: Option<String>,
    query: Option<String>,
    lang: Option<String>,
    prompt: Option<String>,
    extras: Vec<(&'static str, String)>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl Fingerprint {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            url: None,
            context: None,
            query: None,
            lang: None,
            prompt: None,
            extras: Vec::new(),
        }
    }

    pub fn url(mut self, url: Option<&str>) -> Self {
        self.url = non_empty(url).map(normalize_url);
        self
    }

    pub fn context(mut self, context: Option<&str>) -> Self {
        self.context = non_empty(context).map(content_hash);
        self
    }

    pub fn query(mut self, query: Option<&str>) -> Self {
        self.query = non_empty(query).map(|q| q.trim().to_string());
        self
    }

    pub fn lang(mut self, lang: Option<&str>) -> Self {
        self.lang = non_empty(lang).map(normalize_lang);
        self
    }

    pub fn prompt(mut self, prompt: Option<&str>) -> Self {
        self.prompt = non_empty(prompt).map(|p| p.trim().to_string());
        self
    }

    /// Endpoint-specific input that changes the unit of work
    pub fn field(mut self, name: &'static str, value: Option<&str>) -> Self {
        if let Some(v) = non_empty(value) {
            self.extras.push((name, v.trim().to_string()));
        }
        self
    }

    /// Canonical pre-image of the hash. Exposed for debugging and tests.
    pub fn canonical(&self) -> String {
        // Context takes precedence over URL as the content source
        let source = match (&self.context, &self.url) {
            (Some(hash), _) => format!("context:{}", hash),
            (None, Some(url)) => format!("url:{}", url),
            (None, None) => String::new(),
        };

        let mut extras = self.extras.clone();
        extras.sort();

        let mut out = String::new();
        push_field(&mut out, "endpoint", self.endpoint.as_str());
        push_field(&mut out, "source", &source);
        push_field(&mut out, "query", self.query.as_deref().unwrap_or(""));
        push_field(&mut out, "lang", self.lang.as_deref().unwrap_or(""));
        push_field(&mut out, "prompt", self.prompt.as_deref().unwrap_or(""));
        for (name, value) in &extras {
            push_field(&mut out, name, value);
        }
        out
    }

    pub fn key(&self) -> CacheKey {
        let digest = Sha256::digest(self.canonical().as_bytes());
        CacheKey(format!("ai_{}_{}", self.endpoint, hex::encode(digest)))
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push(':');
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
    out.push(';');
}

/// SHA-256 of free text, hex encoded
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Lower-cased, trimmed language code with `_` folded to `-`
pub fn normalize_lang(lang: &str) -> String {
    lang.trim().to_lowercase().replace('_', "-")
}

/// Percent-decode a client supplied value. Invalid UTF-8 is kept lossy.
pub fn decode_input(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a URL for keying: decoded, lower-cased, tracking parameters,
/// fragment and trailing slashes removed.
pub fn normalize_url(raw: &str) -> String {
    let decoded = decode_input(raw.trim()).to_lowercase();

    let Ok(mut url) = Url::parse(&decoded) else {
        return decoded.trim_end_matches('/').to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);

    let trimmed_path = url.path().trim_end_matches('/').to_string();
    if trimmed_path.len() != url.path().len() {
        url.set_path(if trimmed_path.is_empty() { "/" } else { &trimmed_path });
    }

    let mut normalized = url.to_string();
    if url.query().is_none() {
        while normalized.ends_with('/') {
            normalized.pop();
        }
    }
    normalized
}
