//! Storage module for persisting ingest state
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - The job store with lease-based claiming
//! - Content fingerprints, the per-crawl visited set and fetched documents
//! - Crawl tracking for root submissions

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::job::JobId;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between the queue, the frontier and the workers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) a storage database and wraps it for sharing
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Locks a shared storage handle
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// Represents a crawl started by a root submission
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRecord {
    pub id: JobId,
    pub root_url: String,
    pub max_depth: u32,
    pub min_score: f64,
    pub force_reprocess: bool,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CrawlStatus,
}

/// Status of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Running,
    Completed,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Last seen content hash of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub document_identity: String,
    pub content_hash: String,
    pub last_seen_at: DateTime<Utc>,
}

/// A fetched document body kept for analysis
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document_identity: String,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// What a lease sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Jobs returned to pending
    pub returned: u64,
    /// Jobs whose last attempt expired
    pub dead_lettered: u64,
    /// Jobs whose cancellation was waiting on the lease
    pub cancelled: u64,
}

impl ReapOutcome {
    pub fn total(&self) -> u64 {
        self.returned + self.dead_lettered + self.cancelled
    }
}
