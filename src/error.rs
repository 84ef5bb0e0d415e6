//! Configuration errors for the stats pipeline.
//!
//! Everything else in the crate reports failures through `anyhow`; these are
//! the only errors `fetch_stats` is allowed to return.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be greater than zero")]
    InvalidConcurrency,

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("retry delay must be greater than zero")]
    InvalidRetryDelay,

    #[error("max retry delay ({max_ms}ms) must be at least the retry delay ({delay_ms}ms)")]
    InvalidMaxRetryDelay { delay_ms: u64, max_ms: u64 },

    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
