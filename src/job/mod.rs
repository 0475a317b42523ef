//! Job model
//!
//! A job is one unit of schedulable work. Its payload is a tagged union so
//! every worker path matches it exhaustively.

mod failure;

pub use failure::{FailureKind, JobFailure};

use crate::state::JobState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Fetch,
    Analyze,
}

impl JobKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Analyze => "analyze",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "analyze" => Some(Self::Analyze),
            _ => None,
        }
    }

    pub fn all() -> [Self; 2] {
        [Self::Fetch, Self::Analyze]
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Kind-specific job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    /// Fetch a normalized URL at a given distance from the crawl root
    Fetch {
        url: String,
        depth: u32,
        crawl_id: JobId,
    },

    /// Analyze a stored document
    Analyze { document_id: String, crawl_id: JobId },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Fetch { .. } => JobKind::Fetch,
            Self::Analyze { .. } => JobKind::Analyze,
        }
    }

    pub fn crawl_id(&self) -> JobId {
        match self {
            Self::Fetch { crawl_id, .. } | Self::Analyze { crawl_id, .. } => *crawl_id,
        }
    }

    /// Key under which equivalent jobs are deduplicated
    ///
    /// Two jobs with the same key may not be pending or running at once.
    pub fn identity_key(&self) -> String {
        match self {
            Self::Fetch { url, .. } => format!("fetch:{}", url),
            Self::Analyze { document_id, .. } => format!("analyze:{}", document_id),
        }
    }
}

/// A job to be inserted into the queue
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub payload: JobPayload,
    pub priority: i64,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(payload: JobPayload, priority: i64, max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            payload,
            priority,
            max_attempts,
        }
    }

    /// Uses a caller-chosen id (a crawl root is its own crawl id)
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }
}

/// A persisted job
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub priority: i64,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub result: Option<serde_json::Value>,
}

/// Single-owner grant for a running job
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub job_id: JobId,
    pub token: Uuid,
    pub worker_id: String,
    /// Attempt number this lease represents (1 for the first)
    pub attempt: u32,
    pub expires_at: DateTime<Utc>,
}

/// Read-only view of a job for callers
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub kind: JobKind,
    pub crawl_id: JobId,
    pub target: String,
    pub depth: Option<u32>,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub result: Option<serde_json::Value>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let (target, depth) = match &job.payload {
            JobPayload::Fetch { url, depth, .. } => (url.clone(), Some(*depth)),
            JobPayload::Analyze { document_id, .. } => (document_id.clone(), None),
        };

        Self {
            id: job.id,
            kind: job.kind,
            crawl_id: job.payload.crawl_id(),
            target,
            depth,
            state: job.state,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            last_error: job.last_error.clone(),
            next_retry_at: job.next_retry_at,
            cancel_requested: job.cancel_requested,
            result: job.result.clone(),
        }
    }
}
