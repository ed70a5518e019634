//! Error type shared by the worker crates and the CLI.

use std::time::Duration;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors outside a single worker event: configuration, push delivery,
/// and the network/timeout failures that retries care about.
#[derive(Error, Debug)]
pub enum SocError {
    /// Transient network trouble; worth retrying.
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or unreadable configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// A push service refused a message.
    #[error("Push error: {0}")]
    Push(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl SocError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn push(message: impl Into<String>) -> Self {
        Self::Push(message.into())
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SocError::Network(_) | SocError::Timeout(_) | SocError::Io(_)
        )
    }

    /// Short, stable name for the `category` log field.
    pub fn category(&self) -> &'static str {
        match self {
            SocError::Network(_) => "network",
            SocError::Config { .. } => "config",
            SocError::Push(_) => "push",
            SocError::Io(_) => "io",
            SocError::Json(_) => "json",
            SocError::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_categories() {
        assert_eq!(SocError::network("reset").category(), "network");
        assert_eq!(SocError::push("rejected").category(), "push");
        assert_eq!(SocError::Timeout(Duration::from_secs(1)).category(), "timeout");
    }

    #[test]
    fn test_retryable() {
        assert!(SocError::network("reset").is_retryable());
        assert!(SocError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SocError::config("bad origin").is_retryable());
        assert!(!SocError::push("gone").is_retryable());
    }

    #[test]
    fn test_config_keeps_source() {
        let parse = "ftp//x".parse::<u16>().unwrap_err();
        let err = SocError::config_with_source("SOC_ORIGIN is not a URL", parse);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Config error: SOC_ORIGIN is not a URL");
    }
}
