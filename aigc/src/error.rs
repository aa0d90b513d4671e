use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Upstream still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: UpstreamError },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "cache-redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Server(String),
}

impl Error {
    /// True when the caller sent something no upstream could serve.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }

    /// The upstream failure behind this error, if any
    pub fn upstream(&self) -> Option<&UpstreamError> {
        match self {
            Error::Upstream(e) => Some(e),
            Error::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Message suitable for the `error` field of a failed response
    pub fn user_message(&self) -> String {
        match self.upstream() {
            Some(UpstreamError::RegionUnsupported(_)) => "Gemini API is not available in this region. \
                Please use VPN or deploy to a supported region."
                .to_string(),
            Some(UpstreamError::Connection(_)) => "Cannot connect to the upstream service. \
                Please check your network connection, firewall settings, or use VPN if Google \
                services are blocked in your region."
                .to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_region_block() {
        let err = Error::Upstream(UpstreamError::RegionUnsupported("User location is not supported".into()));
        assert!(err.user_message().starts_with("Gemini API is not available in this region."));
        assert!(!err.user_message().contains("  "));
    }

    #[test]
    fn test_user_message_sees_through_retries() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            last: UpstreamError::Connection("refused".into()),
        };
        assert!(err.user_message().starts_with("Cannot connect"));
        assert_eq!(err.upstream().map(|e| e.kind()), Some("connection"));
    }

    #[test]
    fn test_invalid_input_message() {
        let err = Error::InvalidInput("Query is required".into());
        assert!(err.is_client_error());
        assert_eq!(err.user_message(), "Invalid input: Query is required");
    }
}
