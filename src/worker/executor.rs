//! Per-job execution
//!
//! A Fetch runs: rate limiter → fetcher → store document → frontier →
//! change detector → Analyze job → ack. Leases are renewed while a job runs. Analyze jobs run in batches through
//! the batch optimizer. Every outcome lands in the queue as an Ack or a Fail.

use crate::batch::{Analyzer, Batch, BatchOptimizer, Document, SummaryAnalyzer};
use crate::config::Config;
use crate::crawler::{
    parse_document, ChangeDetector, CrawlLimits, Fetcher, Frontier, HttpFetcher, KeywordScorer,
    LinkScorer, PageContext, RateLimiter,
};
use crate::job::{Job, JobFailure, JobId, JobKind, JobPayload, Lease, NewJob};
use crate::queue::JobQueue;
use crate::storage::{self, Storage, StoredDocument};
use crate::{IngestError, Result};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use url::Url;

/// Analyze jobs go after any pending Fetch for the same workers
const ANALYZE_PRIORITY: i64 = 0;

/// Floor for the lease renewal period
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// External collaborators the pool runs jobs against
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub scorer: Arc<dyn LinkScorer>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Collaborators {
    /// The defaults: HTTP fetching, keyword scoring and summary analysis
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new(&config.user_agent)?),
            scorer: Arc::new(KeywordScorer::new(&config.crawler.keywords)),
            analyzer: Arc::new(SummaryAnalyzer::default()),
        })
    }
}

struct ExecutorInner {
    queue: JobQueue,
    fetcher: Arc<dyn Fetcher>,
    analyzer: Arc<dyn Analyzer>,
    limiter: RateLimiter,
    frontier: Frontier,
    detector: ChangeDetector,
    optimizer: BatchOptimizer,
    max_links_per_page: usize,
    max_attempts: u32,
}

/// Runs leased jobs; shared by every worker of a pool
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    pub fn new(config: &Config, queue: JobQueue, collaborators: Collaborators) -> Self {
        let Collaborators {
            fetcher,
            scorer,
            analyzer,
        } = collaborators;

        Self {
            inner: Arc::new(ExecutorInner {
                limiter: RateLimiter::new(
                    &config.crawler,
                    &config.user_agent.crawler_name,
                    fetcher.clone(),
                ),
                frontier: Frontier::new(queue.clone(), scorer, config.queue.max_attempts),
                detector: ChangeDetector::new(queue.storage().clone()),
                optimizer: BatchOptimizer::new(&config.batch),
                max_links_per_page: config.crawler.max_links_per_page,
                max_attempts: config.queue.max_attempts,
                queue,
                fetcher,
                analyzer,
            }),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    pub fn optimizer(&self) -> &BatchOptimizer {
        &self.inner.optimizer
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Runs one Fetch job and settles its lease
    pub async fn run_fetch(&self, job: Job, lease: Lease) {
        let mut leases = [lease];
        let outcome = self.hold_leases(&mut leases, self.fetch(&job)).await;
        let [lease] = leases;

        let settled = match outcome {
            Ok(result) => self.inner.queue.ack(&lease, Some(result)),
            Err(e) => self.inner.queue.fail(&lease, &e.into_failure()),
        };
        self.log_settled(&job, settled);
        self.finish_crawl(job.payload.crawl_id());
    }

    async fn fetch(&self, job: &Job) -> Result<serde_json::Value> {
        let JobPayload::Fetch {
            url,
            depth,
            crawl_id,
        } = &job.payload
        else {
            return Err(JobFailure::permanent(format!("job {} is not a fetch", job.id)).into());
        };

        let crawl = storage::lock(self.inner.queue.storage())?
            .get_crawl(*crawl_id)?
            .ok_or_else(|| JobFailure::permanent(format!("unknown crawl {}", crawl_id)))?;
        let target = Url::parse(url)?;

        self.inner.limiter.acquire(&target).await?;

        let document = match self.inner.fetcher.fetch(&target).await {
            Ok(document) => document,
            Err(failure) => {
                if let Some(cooldown) = failure.retry_after {
                    self.inner.limiter.penalize(&target, cooldown).await;
                }
                return Err(failure.into());
            }
        };

        if self.inner.queue.is_cancel_requested(job.id)? {
            info!("Discarding fetch of {}: job {} was cancelled", url, job.id);
            return Ok(json!({ "status": document.status, "discarded": true }));
        }

        storage::lock(self.inner.queue.storage())?.put_document(&StoredDocument {
            document_identity: url.clone(),
            url: document.final_url.to_string(),
            content_type: document.content_type.clone(),
            body: document.bytes.clone(),
            fetched_at: Utc::now(),
        })?;

        let page = parse_document(
            &document.bytes,
            document.content_type.as_deref(),
            &document.final_url,
        );
        let context = PageContext {
            url: url.clone(),
            title: page.title.clone(),
            depth: *depth,
        };
        let limits = CrawlLimits::for_crawl(&crawl, self.inner.max_links_per_page);
        let admitted = self
            .inner
            .frontier
            .propose(*crawl_id, &limits, &page.links, &context)
            .await?;

        // The fingerprint is stored only once the analysis it calls for is queued
        let check = self
            .inner
            .detector
            .check(url, &document.bytes, crawl.force_reprocess)?;
        let changed = check.should_process();
        let analyze_job = if changed {
            Some(self.enqueue_analysis(url, *crawl_id)?)
        } else {
            None
        };
        self.inner.detector.record(&check)?;

        debug!(
            "Fetched {} ({} bytes, {} link(s), {} admitted, changed: {})",
            url,
            document.bytes.len(),
            page.links.len(),
            admitted.len(),
            changed
        );

        Ok(json!({
            "status": document.status,
            "final_url": document.final_url.as_str(),
            "content_type": document.content_type,
            "bytes": document.bytes.len(),
            "title": page.title,
            "links_found": page.links.len(),
            "links_admitted": admitted.len(),
            "changed": changed,
            "analyze_job": analyze_job,
        }))
    }

    fn enqueue_analysis(&self, document_id: &str, crawl_id: JobId) -> Result<JobId> {
        let job = NewJob::new(
            JobPayload::Analyze {
                document_id: document_id.to_string(),
                crawl_id,
            },
            ANALYZE_PRIORITY,
            self.inner.max_attempts,
        );

        match self.inner.queue.enqueue(job) {
            Err(IngestError::DuplicateJob { existing }) => {
                debug!("Analysis of {} already queued as {}", document_id, existing);
                Ok(existing)
            }
            other => other,
        }
    }

    /// Leases more Analyze jobs to go with `first`
    ///
    /// Stops at the optimizer's target size, after `max_wait`, or on shutdown.
    /// With a zero `max_wait` only jobs already eligible are taken.
    pub async fn collect_batch(
        &self,
        worker_id: &str,
        first: (Job, Lease),
        max_wait: Duration,
        shutdown: &watch::Receiver<bool>,
    ) -> (Batch, Vec<(Job, Lease)>) {
        let mut batch = Batch::new(self.inner.optimizer.target_size());
        batch.member_job_ids.push(first.0.id);
        let mut members = vec![first];
        let deadline = Instant::now() + max_wait;

        while !batch.is_full() {
            match self.inner.queue.try_dequeue(worker_id, &[JobKind::Analyze]) {
                Ok(Some((job, lease))) => {
                    batch.member_job_ids.push(job.id);
                    members.push((job, lease));
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Worker {} could not extend its batch: {}", worker_id, e);
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline || *shutdown.borrow() {
                break;
            }
            self.inner.queue.wait_for_work_up_to(deadline - now).await;
        }

        (batch, members)
    }

    /// Analyzes a batch and settles each member's lease on its own outcome
    pub async fn run_analyze(&self, batch: Batch, members: Vec<(Job, Lease)>) {
        let mut leased = Vec::with_capacity(members.len());
        let mut documents = Vec::with_capacity(members.len());
        let mut crawls = HashSet::new();

        for (job, lease) in members {
            crawls.insert(job.payload.crawl_id());
            match self.load_document(&job) {
                Ok(document) => {
                    documents.push(document);
                    leased.push((job, lease));
                }
                Err(e) => {
                    let settled = self.inner.queue.fail(&lease, &e.into_failure());
                    self.log_settled(&job, settled);
                }
            }
        }

        if !documents.is_empty() {
            debug!(
                "Dispatching batch of {} (target {}, collected in {:?})",
                documents.len(),
                batch.target_size,
                (Utc::now() - batch.created_at).to_std().unwrap_or_default()
            );

            let mut leases: Vec<Lease> = leased.iter().map(|(_, lease)| lease.clone()).collect();
            let dispatched = self
                .hold_leases(&mut leases, async {
                    Ok(self
                        .inner
                        .optimizer
                        .dispatch(self.inner.analyzer.as_ref(), &documents)
                        .await)
                })
                .await;

            let results = match dispatched {
                Ok(results) => results,
                Err(e) => {
                    warn!("Dropping batch of {}: {}", documents.len(), e);
                    Vec::new()
                }
            };

            for (((job, _), lease), (document, result)) in leased
                .into_iter()
                .zip(leases)
                .zip(documents.iter().zip(results))
            {
                let settled = match result {
                    Ok(analysis) => match self.store_analysis(&document.identity, &analysis) {
                        Ok(()) => self.inner.queue.ack(&lease, Some(analysis)),
                        Err(e) => self.inner.queue.fail(&lease, &e.into_failure()),
                    },
                    Err(failure) => self.inner.queue.fail(&lease, &failure),
                };
                self.log_settled(&job, settled);
            }
        }

        for crawl_id in crawls {
            self.finish_crawl(crawl_id);
        }
    }

    /// Runs `work` while renewing `leases` every third of the lease duration
    ///
    /// A lease that can no longer be renewed stops being renewed; once none
    /// is held the work is dropped and `LeaseMismatch` returned. `leases`
    /// holds the latest renewals afterwards.
    async fn hold_leases<T, F>(&self, leases: &mut [Lease], work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let period = (self.inner.queue.lease_duration() / 3).max(MIN_RENEW_INTERVAL);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut held = vec![true; leases.len()];
        tokio::pin!(work);

        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                _ = heartbeat.tick() => {
                    for (lease, held) in leases.iter_mut().zip(held.iter_mut()) {
                        if !*held {
                            continue;
                        }
                        match self.inner.queue.renew(lease) {
                            Ok(renewed) => *lease = renewed,
                            Err(e) => {
                                warn!("Lost lease on job {}: {}", lease.job_id, e);
                                *held = false;
                            }
                        }
                    }

                    if !held.iter().any(|h| *h) {
                        let id = leases.first().map(|l| l.job_id).unwrap_or_default();
                        return Err(IngestError::LeaseMismatch { id });
                    }
                }
            }
        }
    }

    fn load_document(&self, job: &Job) -> Result<Document> {
        let JobPayload::Analyze { document_id, .. } = &job.payload else {
            return Err(JobFailure::permanent(format!("job {} is not an analysis", job.id)).into());
        };

        let stored = storage::lock(self.inner.queue.storage())?
            .get_document(document_id)?
            .ok_or_else(|| {
                JobFailure::permanent(format!("document {} is no longer stored", document_id))
            })?;

        Ok(Document {
            identity: stored.document_identity,
            content_type: stored.content_type,
            body: stored.body,
        })
    }

    fn store_analysis(&self, identity: &str, analysis: &serde_json::Value) -> Result<()> {
        storage::lock(self.inner.queue.storage())?.put_analysis(identity, analysis, Utc::now())?;
        Ok(())
    }

    fn log_settled(&self, job: &Job, settled: Result<Job>) {
        match settled {
            Ok(_) => {}
            Err(IngestError::LeaseMismatch { id }) => {
                warn!(
                    "Lease on {} job {} expired before it finished; outcome dropped",
                    job.kind, id
                );
            }
            Err(e) => error!("Failed to settle {} job {}: {}", job.kind, job.id, e),
        }
    }

    fn finish_crawl(&self, crawl_id: JobId) {
        let finished = storage::lock(self.inner.queue.storage())
            .and_then(|mut store| store.finish_crawl_if_idle(crawl_id, Utc::now()));

        match finished {
            Ok(true) => info!("Crawl {} finished", crawl_id),
            Ok(false) => {}
            Err(e) => warn!("Could not update crawl {}: {}", crawl_id, e),
        }
    }
}
