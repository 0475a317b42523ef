//! Ingest coordinator - the facade callers drive the engine through
//!
//! The coordinator owns the job queue and the worker pool. It:
//! - recovers jobs interrupted by a previous process on startup
//! - turns root submissions into crawl records plus a depth-0 Fetch job
//! - exposes job lookup, cancellation and progress
//! - switches the pool between parallelism modes at runtime

use crate::config::Config;
use crate::crawler::frontier::score_priority;
use crate::job::{JobId, JobPayload, JobView, NewJob};
use crate::progress::ProgressReport;
use crate::queue::JobQueue;
use crate::storage::{self, CrawlRecord, CrawlStatus, SharedStorage, Storage, StorageError};
use crate::url::normalize_url;
use crate::worker::{Collaborators, Executor, ParallelismMode, PoolSettings, WorkerPool};
use crate::{ConfigError, IngestError, Result};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How often `wait_for_crawl` re-checks the crawl record
const CRAWL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-crawl settings for a root submission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootOptions {
    pub max_depth: u32,
    pub min_score: f64,
    /// Analyze every fetched document even if its content is unchanged
    pub force_reprocess: bool,
}

/// Main ingest coordinator structure
pub struct Coordinator {
    config: Config,
    config_hash: String,
    queue: JobQueue,
    pool: Mutex<WorkerPool>,
}

impl Coordinator {
    /// Creates a coordinator over `storage`
    ///
    /// Jobs left running by a previous process are released before anything
    /// else touches the queue. The pool is not started.
    pub fn new(
        config: Config,
        config_hash: String,
        storage: SharedStorage,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let queue = JobQueue::new(storage, &config.queue)?;
        queue.recover()?;
        queue.finish_idle_crawls()?;

        let executor = Executor::new(&config, queue.clone(), collaborators);
        let pool = WorkerPool::new(executor, PoolSettings::from_config(&config));

        Ok(Self {
            config,
            config_hash,
            queue,
            pool: Mutex::new(pool),
        })
    }

    /// Opens the configured database with the default collaborators
    pub fn open(config: Config, config_hash: String) -> Result<Self> {
        let storage = storage::open_storage(Path::new(&config.output.database_path))?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::new(config, config_hash, storage, collaborators)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Submits a root document with the given depth and score limits
    ///
    /// Returns the root job id, which is also the crawl id. Fails with
    /// `DuplicateJob` while a crawl of the same root is still running or a
    /// fetch of the same URL is pending or running.
    pub fn submit_root(&self, url: &str, max_depth: u32, min_score: f64) -> Result<JobId> {
        self.submit_root_with(
            url,
            RootOptions {
                max_depth,
                min_score,
                force_reprocess: false,
            },
        )
    }

    pub fn submit_root_with(&self, url: &str, options: RootOptions) -> Result<JobId> {
        if !(0.0..=1.0).contains(&options.min_score) {
            return Err(ConfigError::Validation(format!(
                "min_score must be between 0.0 and 1.0, got {}",
                options.min_score
            ))
            .into());
        }

        let root = normalize_url(url)?.to_string();
        let crawl_id = JobId::new();
        let job = NewJob::new(
            JobPayload::Fetch {
                url: root.clone(),
                depth: 0,
                crawl_id,
            },
            score_priority(1.0),
            self.config.queue.max_attempts,
        )
        .with_id(crawl_id);

        let crawl = CrawlRecord {
            id: crawl_id,
            root_url: root.clone(),
            max_depth: options.max_depth,
            min_score: options.min_score,
            force_reprocess: options.force_reprocess,
            config_hash: self.config_hash.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: CrawlStatus::Running,
        };

        self.queue.enqueue_with(
            job,
            |store| match store.find_running_crawl(&root)? {
                Some(existing) => Err(StorageError::Duplicate { existing }),
                None => Ok(()),
            },
            |store, inserted| {
                store.create_crawl(&crawl)?;
                store.mark_visited(crawl_id, &root, inserted.created_at)?;
                Ok(())
            },
        )?;

        info!(
            "Submitted crawl {} for {} (max depth {}, min score {}{})",
            crawl_id,
            root,
            options.max_depth,
            options.min_score,
            if options.force_reprocess { ", forced" } else { "" }
        );

        Ok(crawl_id)
    }

    pub fn get_job(&self, id: JobId) -> Result<JobView> {
        self.queue.get_job(id)
    }

    /// Cancels a job
    ///
    /// A pending job is cancelled at once; a running job finishes its current
    /// attempt and its outcome is discarded.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let job = self.queue.cancel(id)?;

        // Cancelling the last active job of a crawl ends the crawl
        let crawl_id = job.payload.crawl_id();
        if storage::lock(self.queue.storage())?.finish_crawl_if_idle(crawl_id, Utc::now())? {
            info!("Crawl {} finished", crawl_id);
        }
        Ok(())
    }

    pub fn progress(&self) -> ProgressReport {
        self.queue.progress().snapshot()
    }

    pub fn crawl(&self, id: JobId) -> Result<Option<CrawlRecord>> {
        Ok(storage::lock(self.queue.storage())?.get_crawl(id)?)
    }

    pub fn recent_crawls(&self, limit: usize) -> Result<Vec<CrawlRecord>> {
        Ok(storage::lock(self.queue.storage())?.list_crawls(limit)?)
    }

    /// Operator action: gives every dead-lettered job a fresh attempt budget
    pub fn requeue_dead_letters(&self) -> Result<u64> {
        self.queue.requeue_dead_letters()
    }

    /// Starts the pool in the configured mode
    pub async fn start(&self) -> Result<()> {
        let workers = &self.config.workers;
        self.pool.lock().await.start(workers.mode, workers.concurrency)
    }

    /// Reconfigures the pool, letting in-flight jobs finish first
    pub async fn set_mode(&self, mode: ParallelismMode, concurrency: usize) -> Result<()> {
        info!("Switching worker pool to {} mode, concurrency {}", mode, concurrency);
        self.pool.lock().await.set_mode(mode, concurrency).await
    }

    pub async fn mode(&self) -> Option<(ParallelismMode, usize)> {
        self.pool.lock().await.mode()
    }

    pub async fn stop(&self) -> Result<()> {
        self.pool.lock().await.stop().await
    }

    /// Waits until no pending or running job belongs to the crawl
    ///
    /// Logs a progress line every `report_every`, if given.
    pub async fn wait_for_crawl(
        &self,
        crawl_id: JobId,
        report_every: Option<Duration>,
    ) -> Result<CrawlRecord> {
        let mut last_report = tokio::time::Instant::now();

        loop {
            let crawl = self.crawl(crawl_id)?.ok_or(IngestError::JobNotFound(crawl_id))?;
            if crawl.status == CrawlStatus::Completed {
                debug!("Crawl {} completed", crawl_id);
                return Ok(crawl);
            }

            if let Some(every) = report_every {
                if last_report.elapsed() >= every {
                    info!("{}", self.progress().summary_line());
                    last_report = tokio::time::Instant::now();
                }
            }

            tokio::time::sleep(CRAWL_POLL_INTERVAL).await;
        }
    }
}
