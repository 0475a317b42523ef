//! Analysis batching
//!
//! Analyze jobs are grouped into batches whose size adapts to how the
//! analyzer copes: slow or failing batches shrink the target size, a run of
//! healthy batches grows it.

mod optimizer;
mod summary;

pub use optimizer::{BatchOptimizer, BatchOutcome};
pub use summary::SummaryAnalyzer;

use crate::job::{JobFailure, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A document handed to the analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Normalized URL the document was fetched from
    pub identity: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Structured output of analyzing one document
pub type AnalysisResult = serde_json::Value;

/// Per-document outcome of a batch call
pub type ItemResult = Result<AnalysisResult, JobFailure>;

/// Turns documents into structured results
///
/// `Ok` must hold exactly one result per input document, in order. `Err`
/// fails the whole batch; a `Resource` failure makes the optimizer retry the
/// batch in smaller pieces.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, documents: &[Document]) -> Result<Vec<ItemResult>, JobFailure>;
}

/// A group of Analyze jobs dispatched together
#[derive(Debug, Clone)]
pub struct Batch {
    pub member_job_ids: Vec<JobId>,
    pub created_at: DateTime<Utc>,
    pub target_size: usize,
}

impl Batch {
    pub fn new(target_size: usize) -> Self {
        Self {
            member_job_ids: Vec::with_capacity(target_size),
            created_at: Utc::now(),
            target_size,
        }
    }

    pub fn len(&self) -> usize {
        self.member_job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_job_ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.target_size
    }
}
