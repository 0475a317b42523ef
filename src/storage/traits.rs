//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::job::{Job, JobFailure, JobId, JobKind, Lease, NewJob};
use crate::state::JobState;
use crate::storage::{CrawlRecord, Fingerprint, ReapOutcome, StoredDocument};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Duplicate job: {existing} is already pending or running")]
    Duplicate { existing: JobId },

    #[error("Lease mismatch for job {0}")]
    LeaseMismatch(JobId),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method that changes job state runs as one transaction, so callers
/// never observe a half-applied transition. Times are passed in rather than
/// read from the clock to keep lease arithmetic testable.
pub trait Storage {
    // ===== Crawl Management =====

    fn create_crawl(&mut self, crawl: &CrawlRecord) -> StorageResult<()>;

    fn get_crawl(&self, id: JobId) -> StorageResult<Option<CrawlRecord>>;

    /// Most recent crawls first
    fn list_crawls(&self, limit: usize) -> StorageResult<Vec<CrawlRecord>>;

    /// Id of a running crawl started from `root_url`, if any
    fn find_running_crawl(&self, root_url: &str) -> StorageResult<Option<JobId>>;

    /// Marks a crawl completed once none of its jobs is pending or running
    ///
    /// Returns true if this call finished the crawl.
    fn finish_crawl_if_idle(&mut self, id: JobId, now: DateTime<Utc>) -> StorageResult<bool>;

    /// Finishes every running crawl with no pending or running job left
    ///
    /// Catches crawls whose last job was settled by a lease sweep.
    fn finish_idle_crawls(&mut self, now: DateTime<Utc>) -> StorageResult<u64>;

    // ===== Job Store =====

    /// Inserts a pending job
    ///
    /// Fails with `Duplicate` if a job with the same identity key is pending
    /// or running.
    fn insert_job(&mut self, job: &NewJob, now: DateTime<Utc>) -> StorageResult<Job>;

    fn get_job(&self, id: JobId) -> StorageResult<Option<Job>>;

    /// Leases the most eligible pending job of the given kinds
    ///
    /// Highest priority first, creation order within a priority. Jobs whose
    /// `next_retry_at` lies in the future are skipped. Increments `attempts`.
    fn claim_next(
        &mut self,
        kinds: &[JobKind],
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<(Job, Lease)>>;

    /// Completes a leased job (or cancels it if cancellation was requested)
    fn complete_job(
        &mut self,
        lease: &Lease,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> StorageResult<Job>;

    /// Pushes the expiry of a still-owned lease to `now + lease`
    ///
    /// Fails with `LeaseMismatch` once the lease was reaped or reassigned.
    fn renew_lease(
        &mut self,
        lease: &Lease,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Lease>;

    /// Records a failed attempt
    ///
    /// A retryable failure with attempts left returns the job to pending after
    /// `retry_delay`; anything else dead-letters it.
    fn fail_job(
        &mut self,
        lease: &Lease,
        failure: &JobFailure,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Job>;

    /// Cancels a pending job, or flags a running one
    fn cancel_job(&mut self, id: JobId, now: DateTime<Utc>) -> StorageResult<Job>;

    /// Returns running jobs whose lease has expired
    fn reap_expired(&mut self, now: DateTime<Utc>) -> StorageResult<ReapOutcome>;

    /// Returns every running job; only valid before any worker holds a lease
    fn recover_running(&mut self, now: DateTime<Utc>) -> StorageResult<ReapOutcome>;

    /// Deletes finished jobs older than the cutoff, returning the states removed
    fn purge_finished(&mut self, cutoff: DateTime<Utc>) -> StorageResult<HashMap<JobState, u64>>;

    /// Returns dead-lettered jobs to pending with a fresh attempt budget
    fn requeue_dead_letters(&mut self, now: DateTime<Utc>) -> StorageResult<u64>;

    fn count_jobs_by_state(&self) -> StorageResult<HashMap<JobState, u64>>;

    // ===== Fingerprints =====

    fn get_fingerprint(&self, document_identity: &str) -> StorageResult<Option<Fingerprint>>;

    fn put_fingerprint(&mut self, fingerprint: &Fingerprint) -> StorageResult<()>;

    // ===== Visited Set =====

    /// Atomically marks a URL visited for a crawl
    ///
    /// Returns false if it was already visited.
    fn mark_visited(&mut self, crawl_id: JobId, url: &str, now: DateTime<Utc>)
        -> StorageResult<bool>;

    fn is_visited(&self, crawl_id: JobId, url: &str) -> StorageResult<bool>;

    // ===== Documents and Analyses =====

    fn put_document(&mut self, document: &StoredDocument) -> StorageResult<()>;

    fn get_document(&self, document_identity: &str) -> StorageResult<Option<StoredDocument>>;

    fn put_analysis(
        &mut self,
        document_identity: &str,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    fn get_analysis(&self, document_identity: &str) -> StorageResult<Option<serde_json::Value>>;
}
