//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::job::{Job, JobFailure, JobId, JobKind, JobPayload, Lease, NewJob};
use crate::state::JobState;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{CrawlRecord, CrawlStatus, Fingerprint, ReapOutcome, StoredDocument};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

const JOB_COLUMNS: &str = "id, kind, payload, priority, state, attempts, max_attempts, \
     created_at_ms, started_at_ms, finished_at_ms, last_error, next_retry_at_ms, \
     cancel_requested, result";

const CRAWL_COLUMNS: &str = "id, root_url, max_depth, min_score, force_reprocess, config_hash, \
     started_at_ms, finished_at_ms, status";

/// A jobs row before its text columns are decoded
struct RawJob {
    id: String,
    kind: String,
    payload: String,
    priority: i64,
    state: String,
    attempts: u32,
    max_attempts: u32,
    created_at_ms: i64,
    started_at_ms: Option<i64>,
    finished_at_ms: Option<i64>,
    last_error: Option<String>,
    next_retry_at_ms: Option<i64>,
    cancel_requested: bool,
    result: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            priority: row.get(3)?,
            state: row.get(4)?,
            attempts: row.get(5)?,
            max_attempts: row.get(6)?,
            created_at_ms: row.get(7)?,
            started_at_ms: row.get(8)?,
            finished_at_ms: row.get(9)?,
            last_error: row.get(10)?,
            next_retry_at_ms: row.get(11)?,
            cancel_requested: row.get(12)?,
            result: row.get(13)?,
        })
    }

    fn into_job(self) -> StorageResult<Job> {
        let kind = JobKind::from_db_string(&self.kind)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown job kind '{}'", self.kind)))?;
        let state = JobState::from_db_string(&self.state)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown job state '{}'", self.state)))?;
        let payload: JobPayload = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .map(|r| serde_json::from_str(&r))
            .transpose()?;

        Ok(Job {
            id: parse_id(&self.id)?,
            kind,
            payload,
            priority: self.priority,
            state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: from_ms(self.created_at_ms),
            started_at: self.started_at_ms.map(from_ms),
            finished_at: self.finished_at_ms.map(from_ms),
            last_error: self.last_error,
            next_retry_at: self.next_retry_at_ms.map(from_ms),
            cancel_requested: self.cancel_requested,
            result,
        })
    }
}

fn parse_id(s: &str) -> StorageResult<JobId> {
    s.parse()
        .map_err(|_| StorageError::Corrupt(format!("invalid job id '{}'", s)))
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn load_job(conn: &Connection, id: JobId) -> StorageResult<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    let raw = conn
        .query_row(&sql, params![id.to_string()], RawJob::from_row)
        .optional()?;
    raw.map(RawJob::into_job).transpose()
}

/// Loads a job only if `lease` still owns it
fn load_leased(conn: &Connection, lease: &Lease) -> StorageResult<Job> {
    let job = load_job(conn, lease.job_id)?.ok_or(StorageError::JobNotFound(lease.job_id))?;

    let token: Option<String> = conn.query_row(
        "SELECT lease_token FROM jobs WHERE id = ?1",
        params![lease.job_id.to_string()],
        |row| row.get(0),
    )?;

    if job.state != JobState::Running || token != Some(lease.token.to_string()) {
        return Err(StorageError::LeaseMismatch(lease.job_id));
    }

    Ok(job)
}

/// Releases running jobs, optionally only those whose lease expired by `expired_by`
fn release_running(
    conn: &Connection,
    expired_by: Option<i64>,
    now_ms: i64,
) -> StorageResult<ReapOutcome> {
    let cancelled = conn.execute(
        "UPDATE jobs SET state = 'cancelled', finished_at_ms = ?2,
             lease_token = NULL, lease_expires_at_ms = NULL, worker_id = NULL
         WHERE state = 'running' AND cancel_requested = 1
           AND (?1 IS NULL OR lease_expires_at_ms <= ?1)",
        params![expired_by, now_ms],
    )?;

    let dead_lettered = conn.execute(
        "UPDATE jobs SET state = 'dead_lettered', finished_at_ms = ?2,
             last_error = 'lease expired after ' || attempts || ' attempt(s)',
             lease_token = NULL, lease_expires_at_ms = NULL, worker_id = NULL
         WHERE state = 'running' AND attempts >= max_attempts
           AND (?1 IS NULL OR lease_expires_at_ms <= ?1)",
        params![expired_by, now_ms],
    )?;

    let returned = conn.execute(
        "UPDATE jobs SET state = 'pending', last_error = 'lease expired',
             next_retry_at_ms = NULL,
             lease_token = NULL, lease_expires_at_ms = NULL, worker_id = NULL
         WHERE state = 'running'
           AND (?1 IS NULL OR lease_expires_at_ms <= ?1)",
        params![expired_by],
    )?;

    Ok(ReapOutcome {
        returned: returned as u64,
        dead_lettered: dead_lettered as u64,
        cancelled: cancelled as u64,
    })
}

fn crawl_from_row(row: &Row<'_>) -> rusqlite::Result<(String, CrawlRecordParts)> {
    Ok((
        row.get(0)?,
        CrawlRecordParts {
            root_url: row.get(1)?,
            max_depth: row.get(2)?,
            min_score: row.get(3)?,
            force_reprocess: row.get(4)?,
            config_hash: row.get(5)?,
            started_at_ms: row.get(6)?,
            finished_at_ms: row.get(7)?,
            status: row.get(8)?,
        },
    ))
}

struct CrawlRecordParts {
    root_url: String,
    max_depth: u32,
    min_score: f64,
    force_reprocess: bool,
    config_hash: String,
    started_at_ms: i64,
    finished_at_ms: Option<i64>,
    status: String,
}

impl CrawlRecordParts {
    fn into_record(self, id: &str) -> StorageResult<CrawlRecord> {
        Ok(CrawlRecord {
            id: parse_id(id)?,
            root_url: self.root_url,
            max_depth: self.max_depth,
            min_score: self.min_score,
            force_reprocess: self.force_reprocess,
            config_hash: self.config_hash,
            started_at: from_ms(self.started_at_ms),
            finished_at: self.finished_at_ms.map(from_ms),
            status: CrawlStatus::from_db_string(&self.status).ok_or_else(|| {
                StorageError::Corrupt(format!("unknown crawl status '{}'", self.status))
            })?,
        })
    }
}

impl Storage for SqliteStorage {
    // ===== Crawl Management =====

    fn create_crawl(&mut self, crawl: &CrawlRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawls (id, root_url, max_depth, min_score, force_reprocess,
                 config_hash, started_at_ms, finished_at_ms, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                crawl.id.to_string(),
                crawl.root_url,
                crawl.max_depth,
                crawl.min_score,
                crawl.force_reprocess,
                crawl.config_hash,
                crawl.started_at.timestamp_millis(),
                crawl.finished_at.map(|t| t.timestamp_millis()),
                crawl.status.to_db_string(),
            ],
        )?;
        Ok(())
    }

    fn get_crawl(&self, id: JobId) -> StorageResult<Option<CrawlRecord>> {
        let sql = format!("SELECT {} FROM crawls WHERE id = ?1", CRAWL_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], crawl_from_row)
            .optional()?;

        row.map(|(id, parts)| parts.into_record(&id)).transpose()
    }

    fn list_crawls(&self, limit: usize) -> StorageResult<Vec<CrawlRecord>> {
        let sql = format!(
            "SELECT {} FROM crawls ORDER BY started_at_ms DESC LIMIT ?1",
            CRAWL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], crawl_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, parts)| parts.into_record(&id))
            .collect()
    }

    fn find_running_crawl(&self, root_url: &str) -> StorageResult<Option<JobId>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM crawls WHERE root_url = ?1 AND status = 'running'
                 ORDER BY started_at_ms LIMIT 1",
                params![root_url],
                |row| row.get(0),
            )
            .optional()?;

        id.as_deref().map(parse_id).transpose()
    }

    fn finish_crawl_if_idle(&mut self, id: JobId, now: DateTime<Utc>) -> StorageResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs WHERE crawl_id = ?1 AND state IN ('pending', 'running')",
            params![id.to_string()],
            |row| row.get(0),
        )?;

        let finished = if active == 0 {
            tx.execute(
                "UPDATE crawls SET status = 'completed', finished_at_ms = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![id.to_string(), now.timestamp_millis()],
            )? == 1
        } else {
            false
        };

        tx.commit()?;
        Ok(finished)
    }

    fn finish_idle_crawls(&mut self, now: DateTime<Utc>) -> StorageResult<u64> {
        let finished = self.conn.execute(
            "UPDATE crawls SET status = 'completed', finished_at_ms = ?1
             WHERE status = 'running'
               AND NOT EXISTS (
                   SELECT 1 FROM jobs
                   WHERE jobs.crawl_id = crawls.id AND jobs.state IN ('pending', 'running')
               )",
            params![now.timestamp_millis()],
        )?;
        Ok(finished as u64)
    }

    // ===== Job Store =====

    fn insert_job(&mut self, job: &NewJob, now: DateTime<Utc>) -> StorageResult<Job> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let identity_key = job.payload.identity_key();
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE identity_key = ?1 AND state IN ('pending', 'running')",
                params![identity_key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing) = existing {
            return Err(StorageError::Duplicate {
                existing: parse_id(&existing)?,
            });
        }

        tx.execute(
            "INSERT INTO jobs (id, kind, crawl_id, identity_key, payload, priority, state,
                 attempts, max_attempts, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?8)",
            params![
                job.id.to_string(),
                job.payload.kind().to_db_string(),
                job.payload.crawl_id().to_string(),
                identity_key,
                serde_json::to_string(&job.payload)?,
                job.priority,
                job.max_attempts,
                now.timestamp_millis(),
            ],
        )?;

        let inserted = load_job(&tx, job.id)?.ok_or(StorageError::JobNotFound(job.id))?;
        tx.commit()?;
        Ok(inserted)
    }

    fn get_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        load_job(&self.conn, id)
    }

    fn claim_next(
        &mut self,
        kinds: &[JobKind],
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<(Job, Lease)>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        // Kind names are static identifiers, never caller input
        let kind_list = kinds
            .iter()
            .map(|kind| format!("'{}'", kind.to_db_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let now_ms = now.timestamp_millis();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT id FROM jobs
             WHERE state = 'pending' AND kind IN ({})
               AND (next_retry_at_ms IS NULL OR next_retry_at_ms <= ?1)
             ORDER BY priority DESC, created_at_ms ASC, seq ASC
             LIMIT 1",
            kind_list
        );
        let candidate: Option<String> = tx
            .query_row(&sql, params![now_ms], |row| row.get(0))
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let expires_at_ms = now_ms.saturating_add(duration_ms(lease));
        let claimed = tx.execute(
            "UPDATE jobs SET state = 'running', attempts = attempts + 1, started_at_ms = ?2,
                 next_retry_at_ms = NULL, lease_token = ?3, lease_expires_at_ms = ?4,
                 worker_id = ?5
             WHERE id = ?1 AND state = 'pending'",
            params![id, now_ms, token.to_string(), expires_at_ms, worker_id],
        )?;

        if claimed != 1 {
            return Ok(None);
        }

        let job_id = parse_id(&id)?;
        let job = load_job(&tx, job_id)?.ok_or(StorageError::JobNotFound(job_id))?;
        tx.commit()?;

        let lease = Lease {
            job_id,
            token,
            worker_id: worker_id.to_string(),
            attempt: job.attempts,
            expires_at: from_ms(expires_at_ms),
        };

        Ok(Some((job, lease)))
    }

    fn complete_job(
        &mut self,
        lease: &Lease,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> StorageResult<Job> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = load_leased(&tx, lease)?;

        // A cancelled job's result is discarded
        let (next, result) = if job.cancel_requested {
            (JobState::Cancelled, None)
        } else {
            (
                JobState::Completed,
                result.map(serde_json::to_string).transpose()?,
            )
        };

        tx.execute(
            "UPDATE jobs SET state = ?2, finished_at_ms = ?3, result = ?4,
                 lease_token = NULL, lease_expires_at_ms = NULL, worker_id = NULL
             WHERE id = ?1",
            params![
                lease.job_id.to_string(),
                next.to_db_string(),
                now.timestamp_millis(),
                result
            ],
        )?;

        let done = load_job(&tx, lease.job_id)?.ok_or(StorageError::JobNotFound(lease.job_id))?;
        tx.commit()?;
        Ok(done)
    }

    fn renew_lease(
        &mut self,
        lease: &Lease,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Lease> {
        let expires_at = now + chrono::Duration::milliseconds(duration_ms(duration));

        let renewed = self.conn.execute(
            "UPDATE jobs SET lease_expires_at_ms = ?3
             WHERE id = ?1 AND state = 'running' AND lease_token = ?2",
            params![
                lease.job_id.to_string(),
                lease.token.to_string(),
                expires_at.timestamp_millis()
            ],
        )?;

        if renewed == 0 {
            return Err(StorageError::LeaseMismatch(lease.job_id));
        }

        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    fn fail_job(
        &mut self,
        lease: &Lease,
        failure: &JobFailure,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Job> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = load_leased(&tx, lease)?;
        let now_ms = now.timestamp_millis();

        let (next, retry_at) = if job.cancel_requested {
            (JobState::Cancelled, None)
        } else if failure.is_retryable() && job.attempts < job.max_attempts {
            (
                JobState::Pending,
                Some(now_ms.saturating_add(duration_ms(retry_delay))),
            )
        } else {
            (JobState::DeadLettered, None)
        };
        let finished_at = next.is_terminal().then_some(now_ms);

        tx.execute(
            "UPDATE jobs SET state = ?2, last_error = ?3, next_retry_at_ms = ?4,
                 finished_at_ms = ?5,
                 lease_token = NULL, lease_expires_at_ms = NULL, worker_id = NULL
             WHERE id = ?1",
            params![
                lease.job_id.to_string(),
                next.to_db_string(),
                failure.to_string(),
                retry_at,
                finished_at
            ],
        )?;

        let failed = load_job(&tx, lease.job_id)?.ok_or(StorageError::JobNotFound(lease.job_id))?;
        tx.commit()?;
        Ok(failed)
    }

    fn cancel_job(&mut self, id: JobId, now: DateTime<Utc>) -> StorageResult<Job> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = load_job(&tx, id)?.ok_or(StorageError::JobNotFound(id))?;

        match job.state {
            JobState::Pending => {
                tx.execute(
                    "UPDATE jobs SET state = 'cancelled', finished_at_ms = ?2,
                         next_retry_at_ms = NULL
                     WHERE id = ?1",
                    params![id.to_string(), now.timestamp_millis()],
                )?;
            }
            JobState::Running => {
                tx.execute(
                    "UPDATE jobs SET cancel_requested = 1 WHERE id = ?1",
                    params![id.to_string()],
                )?;
            }
            other => {
                return Err(StorageError::InvalidTransition {
                    from: other,
                    to: JobState::Cancelled,
                })
            }
        }

        let updated = load_job(&tx, id)?.ok_or(StorageError::JobNotFound(id))?;
        tx.commit()?;
        Ok(updated)
    }

    fn reap_expired(&mut self, now: DateTime<Utc>) -> StorageResult<ReapOutcome> {
        let now_ms = now.timestamp_millis();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = release_running(&tx, Some(now_ms), now_ms)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn recover_running(&mut self, now: DateTime<Utc>) -> StorageResult<ReapOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = release_running(&tx, None, now.timestamp_millis())?;
        tx.commit()?;
        Ok(outcome)
    }

    fn purge_finished(&mut self, cutoff: DateTime<Utc>) -> StorageResult<HashMap<JobState, u64>> {
        let cutoff_ms = cutoff.timestamp_millis();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut purged = HashMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT state, COUNT(*) FROM jobs
                 WHERE state IN ('completed', 'dead_lettered', 'cancelled')
                   AND finished_at_ms < ?1
                 GROUP BY state",
            )?;
            let rows = stmt.query_map(params![cutoff_ms], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (state, count) = row?;
                if let Some(state) = JobState::from_db_string(&state) {
                    purged.insert(state, count as u64);
                }
            }
        }

        tx.execute(
            "DELETE FROM jobs
             WHERE state IN ('completed', 'dead_lettered', 'cancelled')
               AND finished_at_ms < ?1",
            params![cutoff_ms],
        )?;

        tx.commit()?;
        Ok(purged)
    }

    fn requeue_dead_letters(&mut self, _now: DateTime<Utc>) -> StorageResult<u64> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM jobs WHERE state = 'dead_lettered' ORDER BY finished_at_ms DESC",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        // One row at a time so that the newest dead letter of an identity wins
        let mut requeued = 0u64;
        for id in ids {
            requeued += tx.execute(
                "UPDATE jobs SET state = 'pending', attempts = 0, next_retry_at_ms = NULL,
                     finished_at_ms = NULL, cancel_requested = 0
                 WHERE id = ?1 AND state = 'dead_lettered'
                   AND NOT EXISTS (
                       SELECT 1 FROM jobs AS active
                       WHERE active.identity_key = jobs.identity_key
                         AND active.state IN ('pending', 'running'))",
                params![id],
            )? as u64;
        }

        tx.commit()?;
        Ok(requeued)
    }

    fn count_jobs_by_state(&self) -> StorageResult<HashMap<JobState, u64>> {
        let mut counts: HashMap<JobState, u64> =
            JobState::all_states().into_iter().map(|s| (s, 0)).collect();

        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (state, count) = row?;
            let state = JobState::from_db_string(&state)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown job state '{}'", state)))?;
            counts.insert(state, count as u64);
        }

        Ok(counts)
    }

    // ===== Fingerprints =====

    fn get_fingerprint(&self, document_identity: &str) -> StorageResult<Option<Fingerprint>> {
        let fingerprint = self
            .conn
            .query_row(
                "SELECT document_identity, content_hash, last_seen_at_ms
                 FROM fingerprints WHERE document_identity = ?1",
                params![document_identity],
                |row| {
                    Ok(Fingerprint {
                        document_identity: row.get(0)?,
                        content_hash: row.get(1)?,
                        last_seen_at: from_ms(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(fingerprint)
    }

    fn put_fingerprint(&mut self, fingerprint: &Fingerprint) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO fingerprints (document_identity, content_hash, last_seen_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(document_identity) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 last_seen_at_ms = excluded.last_seen_at_ms",
            params![
                fingerprint.document_identity,
                fingerprint.content_hash,
                fingerprint.last_seen_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    // ===== Visited Set =====

    fn mark_visited(
        &mut self,
        crawl_id: JobId,
        url: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO visited (crawl_id, url, visited_at_ms) VALUES (?1, ?2, ?3)",
            params![crawl_id.to_string(), url, now.timestamp_millis()],
        )?;
        Ok(inserted == 1)
    }

    fn is_visited(&self, crawl_id: JobId, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM visited WHERE crawl_id = ?1 AND url = ?2",
                params![crawl_id.to_string(), url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ===== Documents and Analyses =====

    fn put_document(&mut self, document: &StoredDocument) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO documents (document_identity, url, content_type, body, fetched_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(document_identity) DO UPDATE SET
                 url = excluded.url,
                 content_type = excluded.content_type,
                 body = excluded.body,
                 fetched_at_ms = excluded.fetched_at_ms",
            params![
                document.document_identity,
                document.url,
                document.content_type,
                document.body,
                document.fetched_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, document_identity: &str) -> StorageResult<Option<StoredDocument>> {
        let document = self
            .conn
            .query_row(
                "SELECT document_identity, url, content_type, body, fetched_at_ms
                 FROM documents WHERE document_identity = ?1",
                params![document_identity],
                |row| {
                    Ok(StoredDocument {
                        document_identity: row.get(0)?,
                        url: row.get(1)?,
                        content_type: row.get(2)?,
                        body: row.get(3)?,
                        fetched_at: from_ms(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(document)
    }

    fn put_analysis(
        &mut self,
        document_identity: &str,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO analyses (document_identity, result, analyzed_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(document_identity) DO UPDATE SET
                 result = excluded.result,
                 analyzed_at_ms = excluded.analyzed_at_ms",
            params![
                document_identity,
                serde_json::to_string(result)?,
                now.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn get_analysis(&self, document_identity: &str) -> StorageResult<Option<serde_json::Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT result FROM analyses WHERE document_identity = ?1",
                params![document_identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }
}
