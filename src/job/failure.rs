use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How a failed job is treated by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retried with backoff until attempts run out
    Transient,
    /// Dead-lettered immediately
    Permanent,
    /// The analyzer rejected the batch as too large
    Resource,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Resource => "resource",
        };
        f.write_str(s)
    }
}

/// A collaborator failure, reported as a value
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} failure: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Minimum delay the remote side asked for before a retry
    pub retry_after: Option<Duration>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Resource, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != FailureKind::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let failure = JobFailure::transient("timeout");
        assert_eq!(failure.to_string(), "transient failure: timeout");
    }

    #[test]
    fn test_only_permanent_is_not_retryable() {
        assert!(JobFailure::transient("x").is_retryable());
        assert!(JobFailure::resource("x").is_retryable());
        assert!(!JobFailure::permanent("x").is_retryable());
    }
}
