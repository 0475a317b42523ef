use crate::worker::ParallelismMode;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    pub output: OutputConfig,
}

/// Crawl frontier and politeness configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum link distance from the root document
    pub max_depth: u32,

    /// Links scoring below this are never enqueued
    pub min_score: f64,

    /// Maximum number of links admitted from a single page
    pub max_links_per_page: usize,

    /// Per-host request budget
    pub requests_per_second: f64,

    /// Whether robots.txt rules are fetched and honored
    pub respect_robots: bool,

    /// Keywords used by the default link scorer (empty scores every link 1.0)
    pub keywords: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 1,
            min_score: 0.5,
            max_links_per_page: 5,
            requests_per_second: 1.0,
            respect_robots: true,
            keywords: Vec::new(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
    /// Leases handed out before a job is dead-lettered
    pub max_attempts: u32,

    /// How long a worker owns a job before it is returned to pending
    pub lease_ms: u64,

    /// First retry delay
    pub backoff_base_ms: u64,

    /// Upper bound for any retry delay
    pub backoff_max_ms: u64,

    /// Finished jobs older than this are garbage-collected
    pub retention_hours: u64,

    /// Idle workers re-check the queue at least this often
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lease_ms: 60_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            retention_hours: 72,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

/// Analyze batch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchConfig {
    /// Starting target size
    pub initial_size: usize,

    /// Upper bound for the adaptive target size
    pub max_batch_size: usize,

    /// How long a partial batch waits for more members
    pub max_wait_ms: u64,

    /// Per-item latency above which the target size shrinks
    pub latency_ceiling_ms: u64,

    /// Error rate above which the target size shrinks
    pub max_error_rate: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            max_batch_size: 20,
            max_wait_ms: 2_000,
            latency_ceiling_ms: 30_000,
            max_error_rate: 0.2,
        }
    }
}

impl BatchConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.latency_ceiling_ms)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub mode: ParallelismMode,
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: ParallelismMode::Async,
            concurrency: 4,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}
