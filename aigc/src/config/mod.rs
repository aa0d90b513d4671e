//! Configuration management
//!
//! Default config location: ./aigc.toml. Every section has serde defaults so
//! a partial (or missing) file is valid. Environment variables are applied
//! on top of the file by [`Config::apply_env_overrides`].

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cache::CacheConfig;
use crate::retry::RetryConfig;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Maximum request body size in bytes (default: 10MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors: CorsConfig::default(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed origins. "*" allows any origin; the legacy web client calls
    /// cross-origin from several hosts.
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Holds the durable cache database unless `cache.sqlite_path` is set
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aigc")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    /// Usually supplied through GEMINI_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_gemini_timeout")]
    pub timeout_secs: u64,
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_timeout() -> u64 {
    60
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_gemini_model(),
            base_url: None,
            timeout_secs: default_gemini_timeout(),
        }
    }
}

/// Google Programmable Search. Related sources are skipped when either
/// credential is missing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_timeout() -> u64 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            timeout_secs: default_search_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.api_key) && set(&self.engine_id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Extracted text is cut to this many characters
    #[serde(default = "default_fetch_max_chars")]
    pub max_chars: usize,
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_fetch_max_chars() -> usize {
    20_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_chars: default_fetch_max_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics at GET /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,aigc=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value: {:?}", name, value))
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.expand_paths()?;
            Ok(config)
        } else {
            let mut config = Config::default();
            // Try to save default config
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Expand ~ in all paths
    fn expand_paths(&mut self) -> Result<()> {
        self.storage.data_dir = expand_tilde(&self.storage.data_dir)?;
        if let Some(ref path) = self.cache.sqlite_path {
            self.cache.sqlite_path = Some(expand_tilde(path)?);
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.gemini.model = v;
        }
        if let Some(v) = get("GEMINI_BASE_URL") {
            self.gemini.base_url = Some(v);
        }
        if let Some(v) = get("REDIS_URL") {
            self.cache.backend = "redis".to_string();
            self.cache.redis_url = Some(v);
        }
        if let Some(v) = get("CACHE_SQLITE_PATH") {
            self.cache.sqlite_path = Some(expand_tilde(Path::new(&v))?);
        }
        if let Some(v) = get("GOOGLE_SEARCH_API_KEY") {
            self.search.api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_SEARCH_ENGINE_ID") {
            self.search.engine_id = Some(v);
        }
        if let Some(v) = get("CACHE_TTL_QUESTIONS") {
            self.cache.ttl.questions_secs = parse_env("CACHE_TTL_QUESTIONS", &v)?;
        }
        if let Some(v) = get("CACHE_TTL_METADATA") {
            self.cache.ttl.metadata_secs = parse_env("CACHE_TTL_METADATA", &v)?;
        }
        if let Some(v) = get("CACHE_TTL_ANSWERS") {
            self.cache.ttl.answers_secs = parse_env("CACHE_TTL_ANSWERS", &v)?;
        }
        if let Some(v) = get("CACHE_TTL_SESSIONS") {
            self.cache.ttl.sessions_secs = parse_env("CACHE_TTL_SESSIONS", &v)?;
        }
        if let Some(v) = get("CACHE_PROBE_INTERVAL_SECS") {
            self.cache.probe_interval_secs = parse_env("CACHE_PROBE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("RETRY_DEADLINE_MS") {
            self.retry.deadline_ms = parse_env("RETRY_DEADLINE_MS", &v)?;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.observability.log_format = v;
        }
        Ok(())
    }

    /// Reject unusable settings and repair dependent ones
    pub fn validate(&mut self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.deadline_ms == 0 {
            bail!("retry.deadline_ms must be greater than 0");
        }
        if !matches!(self.observability.log_format.as_str(), "pretty" | "json") {
            bail!(
                "observability.log_format must be \"pretty\" or \"json\", got {:?}",
                self.observability.log_format
            );
        }
        if self.cache.backend == "redis" && self.cache.redis_url.is_none() {
            bail!("cache.backend = \"redis\" requires cache.redis_url (or REDIS_URL)");
        }

        // A cached questions response carries a content_id; the session it
        // names must outlive that response.
        let ttl = &mut self.cache.ttl;
        if ttl.sessions_secs < ttl.questions_secs {
            warn!(
                sessions_secs = ttl.sessions_secs,
                questions_secs = ttl.questions_secs,
                "Session TTL shorter than questions TTL, raising it"
            );
            ttl.sessions_secs = ttl.questions_secs;
        }
        Ok(())
    }

    /// Directory for the durable cache when no explicit path is set
    pub fn cache_dir(&self) -> PathBuf {
        self.storage.data_dir.join("cache")
    }
}
