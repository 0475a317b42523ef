//! Sumi-Ingest: a polite document ingest engine
//!
//! This crate schedules and executes the work of ingesting a tree of remote
//! documents: a persistent job queue with leases and retries, a worker pool with
//! several parallelism modes, a depth-bounded crawl frontier behind a per-host
//! rate limiter, a content change detector, and an adaptive batch optimizer for
//! downstream analysis calls.

pub mod batch;
pub mod config;
pub mod crawler;
pub mod job;
pub mod progress;
pub mod queue;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Sumi-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Duplicate job: an equivalent job {existing} is already pending or running")]
    DuplicateJob { existing: job::JobId },

    #[error("Job not found: {0}")]
    JobNotFound(job::JobId),

    #[error("Lease mismatch for job {id}: the lease expired or was reassigned")]
    LeaseMismatch { id: job::JobId },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::JobState,
        to: state::JobState,
    },

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("Collaborator failed: {0}")]
    Collaborator(#[from] job::JobFailure),

    #[error("Storage error: {0}")]
    StorageError(storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool error: {0}")]
    Pool(String),
}

impl IngestError {
    /// Converts an error raised while running a job into that job's failure
    ///
    /// Input problems (bad URLs, robots.txt denials) are permanent; local
    /// storage and I/O trouble is transient.
    pub fn into_failure(self) -> job::JobFailure {
        match self {
            Self::Collaborator(failure) => failure,
            Self::RobotsDenied { .. }
            | Self::UrlError(_)
            | Self::UrlParse(_)
            | Self::Json(_)
            | Self::Config(_) => job::JobFailure::permanent(self.to_string()),
            other => job::JobFailure::transient(other.to_string()),
        }
    }
}

impl From<storage::StorageError> for IngestError {
    fn from(err: storage::StorageError) -> Self {
        use storage::StorageError;

        match err {
            StorageError::Duplicate { existing } => Self::DuplicateJob { existing },
            StorageError::JobNotFound(id) => Self::JobNotFound(id),
            StorageError::LeaseMismatch(id) => Self::LeaseMismatch { id },
            StorageError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            other => Self::StorageError(other),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown parallelism mode: {0}")]
    InvalidMode(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Coordinator;
pub use job::{Job, JobId, JobKind, JobPayload, JobView};
pub use progress::ProgressReport;
pub use queue::JobQueue;
pub use state::JobState;
pub use url::{extract_host, normalize_url};
pub use worker::{ParallelismMode, WorkerPool};
