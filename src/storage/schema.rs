//! Database schema definitions
//!
//! Timestamps are stored as milliseconds since the Unix epoch so that the
//! eligibility and lease checks are plain integer comparisons.

/// SQL schema for the ingest database
pub const SCHEMA_SQL: &str = r#"
-- One row per submitted root; the id is the root job id
CREATE TABLE IF NOT EXISTS crawls (
    id TEXT PRIMARY KEY,
    root_url TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    min_score REAL NOT NULL,
    force_reprocess INTEGER NOT NULL DEFAULT 0,
    config_hash TEXT NOT NULL,
    started_at_ms INTEGER NOT NULL,
    finished_at_ms INTEGER,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawls_root ON crawls(root_url, status);

-- The job store
CREATE TABLE IF NOT EXISTS jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    crawl_id TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    created_at_ms INTEGER NOT NULL,
    started_at_ms INTEGER,
    finished_at_ms INTEGER,
    last_error TEXT,
    next_retry_at_ms INTEGER,
    lease_token TEXT,
    lease_expires_at_ms INTEGER,
    worker_id TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(state, kind, priority DESC, created_at_ms, seq);
CREATE INDEX IF NOT EXISTS idx_jobs_crawl ON jobs(crawl_id, state);
CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(state, lease_expires_at_ms);

-- At most one pending or running job per identity
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_identity
    ON jobs(identity_key) WHERE state IN ('pending', 'running');

-- Last seen content hash per document
CREATE TABLE IF NOT EXISTS fingerprints (
    document_identity TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    last_seen_at_ms INTEGER NOT NULL
);

-- Visited set, scoped per crawl
CREATE TABLE IF NOT EXISTS visited (
    crawl_id TEXT NOT NULL,
    url TEXT NOT NULL,
    visited_at_ms INTEGER NOT NULL,
    PRIMARY KEY (crawl_id, url)
);

-- Latest fetched body per document
CREATE TABLE IF NOT EXISTS documents (
    document_identity TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    fetched_at_ms INTEGER NOT NULL
);

-- Latest analysis per document
CREATE TABLE IF NOT EXISTS analyses (
    document_identity TEXT PRIMARY KEY,
    result TEXT NOT NULL,
    analyzed_at_ms INTEGER NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
