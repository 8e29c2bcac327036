//! Error types for test execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Timeout after {timeout_ms} ms waiting for: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Cleanup of {kind} {id} failed: {reason}")]
    Cleanup {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Skipped: {0}")]
    Skipped(String),

    #[error("Inconclusive: {0}")]
    Inconclusive(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    pub fn assertion(message: impl Into<String>) -> Self {
        HarnessError::Assertion(message.into())
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        HarnessError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            HarnessError::Timeout { .. } => true,
            HarnessError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Fail with an `Assertion` error unless `cond` holds.
#[macro_export]
macro_rules! ensure_that {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::HarnessError::Assertion(format!($($arg)+)));
        }
    };
}
