// src/core/error.rs

use thiserror::Error;

/// Raised when an input cannot be turned into a `DomainName`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid domain name '{input}': {reason}")]
pub struct ValidationError {
    pub input: String,
    pub reason: &'static str,
}

impl ValidationError {
    pub fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self { input: input.into(), reason }
    }
}

/// A single probe backend's failure. Contained by the probe runner, which turns
/// it into a `Failed` result; it never reaches the request level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),
    /// A fingerprinting service or vulnerability database could not be reached.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

/// Request-level failures, the only errors that become error responses.
#[derive(Debug, Error)]
pub enum AssessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("internal error: {0}")]
    Internal(String),
}
