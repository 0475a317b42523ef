//! Job queue
//!
//! Priority/FIFO ordering over the job store. Every operation takes the
//! storage lock once and runs a single transaction; nothing awaits while the
//! lock is held. Idle workers park on a `Notify` that enqueues signal, with
//! the poll interval as a fallback.

mod retry;

pub use retry::RetryPolicy;

use crate::config::QueueConfig;
use crate::job::{Job, JobFailure, JobId, JobKind, JobView, Lease, NewJob};
use crate::progress::{ProgressEvent, ProgressTracker};
use crate::state::JobState;
use crate::storage::{self, ReapOutcome, SharedStorage, SqliteStorage, Storage, StorageResult};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

struct QueueInner {
    storage: SharedStorage,
    policy: RetryPolicy,
    lease: Duration,
    poll_interval: Duration,
    notify: Notify,
    progress: Arc<ProgressTracker>,
}

/// Handle to the persistent job queue
///
/// Cloning is cheap; all clones share one store and one progress tracker.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Creates a queue over `storage`, seeding progress from the stored counts
    pub fn new(storage: SharedStorage, config: &QueueConfig) -> Result<Self> {
        Self::with_policy(storage, config, RetryPolicy::from_config(config))
    }

    pub fn with_policy(
        storage: SharedStorage,
        config: &QueueConfig,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let counts = storage::lock(&storage)?.count_jobs_by_state()?;

        Ok(Self {
            inner: Arc::new(QueueInner {
                storage,
                policy,
                lease: config.lease(),
                poll_interval: config.poll_interval(),
                notify: Notify::new(),
                progress: Arc::new(ProgressTracker::seeded(counts)),
            }),
        })
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.inner.storage
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.inner.progress
    }

    pub fn lease_duration(&self) -> Duration {
        self.inner.lease
    }

    /// Persists a new pending job
    ///
    /// Fails with `DuplicateJob` if an equivalent job is pending or running.
    pub fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let inserted = storage::lock(&self.inner.storage)?.insert_job(&job, Utc::now())?;

        debug!(
            "Enqueued {} job {} (priority {})",
            inserted.kind, inserted.id, inserted.priority
        );
        self.inner.progress.record(ProgressEvent::Enqueued);
        self.inner.notify.notify_waiters();

        Ok(inserted.id)
    }

    /// Persists a new pending job between two hooks run under the same storage lock
    ///
    /// `guard` runs first and can reject the job before anything is written.
    /// No worker can lease the job before `after` has run. Root submissions
    /// use this to refuse a root whose crawl is still running and to record
    /// their crawl alongside the job.
    pub fn enqueue_with<G, F>(&self, job: NewJob, guard: G, after: F) -> Result<JobId>
    where
        G: FnOnce(&SqliteStorage) -> StorageResult<()>,
        F: FnOnce(&mut SqliteStorage, &Job) -> StorageResult<()>,
    {
        let inserted = {
            let mut store = storage::lock(&self.inner.storage)?;
            guard(&store)?;
            let inserted = store.insert_job(&job, Utc::now())?;
            after(&mut store, &inserted)?;
            inserted
        };

        debug!(
            "Enqueued {} job {} (priority {})",
            inserted.kind, inserted.id, inserted.priority
        );
        self.inner.progress.record(ProgressEvent::Enqueued);
        self.inner.notify.notify_waiters();

        Ok(inserted.id)
    }

    /// Leases the next eligible job of the given kinds without waiting
    ///
    /// Expired leases are returned to pending first, under the same lock.
    pub fn try_dequeue(&self, worker_id: &str, kinds: &[JobKind]) -> Result<Option<(Job, Lease)>> {
        let now = Utc::now();
        let (reaped, claimed) = {
            let mut store = storage::lock(&self.inner.storage)?;
            let reaped = store.reap_expired(now)?;
            if reaped.dead_lettered + reaped.cancelled > 0 {
                store.finish_idle_crawls(now)?;
            }
            let claimed = store.claim_next(kinds, worker_id, self.inner.lease, now)?;
            (reaped, claimed)
        };

        self.record_reaped(&reaped);

        if let Some((job, lease)) = &claimed {
            debug!(
                "Worker {} leased {} job {} (attempt {}/{})",
                worker_id, job.kind, job.id, lease.attempt, job.max_attempts
            );
            self.inner.progress.record(ProgressEvent::Leased);
        }

        Ok(claimed)
    }

    /// Leases the next eligible job, waiting up to one poll interval if none
    pub async fn dequeue(&self, worker_id: &str, kinds: &[JobKind]) -> Result<Option<(Job, Lease)>> {
        if let Some(claimed) = self.try_dequeue(worker_id, kinds)? {
            return Ok(Some(claimed));
        }

        self.wait_for_work().await;
        self.try_dequeue(worker_id, kinds)
    }

    /// Parks until an enqueue signals or the poll interval passes
    pub async fn wait_for_work(&self) {
        self.wait_for_work_up_to(self.inner.poll_interval).await;
    }

    pub async fn wait_for_work_up_to(&self, limit: Duration) {
        let wait = limit.min(self.inner.poll_interval);
        let _ = tokio::time::timeout(wait, self.inner.notify.notified()).await;
    }

    /// Wakes every parked worker
    pub fn wake_all(&self) {
        self.inner.notify.notify_waiters();
    }

    /// Completes a leased job
    pub fn ack(&self, lease: &Lease, result: Option<serde_json::Value>) -> Result<Job> {
        let job = storage::lock(&self.inner.storage)?.complete_job(
            lease,
            result.as_ref(),
            Utc::now(),
        )?;

        match job.state {
            JobState::Cancelled => {
                info!("Job {} finished after cancellation; result discarded", job.id);
                self.inner.progress.record(ProgressEvent::Cancelled {
                    from: JobState::Running,
                });
            }
            _ => {
                let elapsed = match (job.started_at, job.finished_at) {
                    (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
                    _ => Duration::ZERO,
                };
                debug!("Completed {} job {} in {:?}", job.kind, job.id, elapsed);
                self.inner.progress.record(ProgressEvent::Acked { elapsed });
            }
        }

        Ok(job)
    }

    /// Extends a held lease by one lease duration from now
    ///
    /// Fails with `LeaseMismatch` once the lease was reaped or reassigned.
    pub fn renew(&self, lease: &Lease) -> Result<Lease> {
        let renewed = storage::lock(&self.inner.storage)?.renew_lease(
            lease,
            self.inner.lease,
            Utc::now(),
        )?;

        debug!(
            "Worker {} renewed lease on job {} until {}",
            lease.worker_id, lease.job_id, renewed.expires_at
        );
        Ok(renewed)
    }

    /// Records a failed attempt
    ///
    /// Retryable failures with attempts left go back to pending after an
    /// exponential backoff; the rest are dead-lettered.
    pub fn fail(&self, lease: &Lease, failure: &JobFailure) -> Result<Job> {
        let mut delay = self.inner.policy.next_delay(lease.attempt);
        if let Some(retry_after) = failure.retry_after {
            delay = delay.max(retry_after);
        }

        let job = storage::lock(&self.inner.storage)?.fail_job(lease, failure, delay, Utc::now())?;

        match job.state {
            JobState::Pending => {
                warn!(
                    "Job {} failed (attempt {}/{}), retrying in {:?}: {}",
                    job.id, job.attempts, job.max_attempts, delay, failure
                );
                self.inner.progress.record(ProgressEvent::Retried);
            }
            JobState::DeadLettered => {
                warn!(
                    "Job {} dead-lettered after {} attempt(s): {}",
                    job.id, job.attempts, failure
                );
                self.inner.progress.record(ProgressEvent::DeadLettered {
                    from: JobState::Running,
                });
            }
            JobState::Cancelled => {
                info!("Job {} failed after cancellation", job.id);
                self.inner.progress.record(ProgressEvent::Cancelled {
                    from: JobState::Running,
                });
            }
            other => debug!("Job {} left in unexpected state {}", job.id, other),
        }

        Ok(job)
    }

    /// Cancels a pending job, or requests cancellation of a running one
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let job = storage::lock(&self.inner.storage)?.cancel_job(id, Utc::now())?;

        if job.state == JobState::Cancelled {
            info!("Cancelled pending job {}", id);
            self.inner.progress.record(ProgressEvent::Cancelled {
                from: JobState::Pending,
            });
        } else {
            info!("Cancellation requested for running job {}", id);
        }

        Ok(job)
    }

    /// Returns true once cancellation of `id` was requested (or it is gone)
    pub fn is_cancel_requested(&self, id: JobId) -> Result<bool> {
        let job = storage::lock(&self.inner.storage)?.get_job(id)?;
        Ok(job.map_or(true, |job| {
            job.cancel_requested || job.state == JobState::Cancelled
        }))
    }

    pub fn get_job(&self, id: JobId) -> Result<JobView> {
        let job = storage::lock(&self.inner.storage)?
            .get_job(id)?
            .ok_or(crate::IngestError::JobNotFound(id))?;
        Ok(JobView::from(&job))
    }

    /// Startup recovery: every job left running by a previous process is released
    ///
    /// Must run before any worker of this process holds a lease.
    pub fn recover(&self) -> Result<ReapOutcome> {
        let outcome = storage::lock(&self.inner.storage)?.recover_running(Utc::now())?;

        if outcome.total() > 0 {
            info!(
                "Recovered {} interrupted job(s): {} back to pending, {} dead-lettered, {} cancelled",
                outcome.total(),
                outcome.returned,
                outcome.dead_lettered,
                outcome.cancelled
            );
        }
        self.record_reaped(&outcome);
        self.inner.notify.notify_waiters();

        Ok(outcome)
    }

    /// Returns jobs whose lease expired
    ///
    /// Crawls left without active jobs by the sweep are finished too.
    pub fn reap(&self) -> Result<ReapOutcome> {
        let now = Utc::now();
        let (outcome, finished) = {
            let mut store = storage::lock(&self.inner.storage)?;
            let outcome = store.reap_expired(now)?;
            let finished = if outcome.dead_lettered + outcome.cancelled > 0 {
                store.finish_idle_crawls(now)?
            } else {
                0
            };
            (outcome, finished)
        };

        if outcome.total() > 0 {
            warn!("Reaped {} expired lease(s)", outcome.total());
            self.inner.notify.notify_waiters();
        }
        if finished > 0 {
            info!("Finished {} crawl(s) left idle by expired leases", finished);
        }
        self.record_reaped(&outcome);

        Ok(outcome)
    }

    /// Finishes every running crawl that has no pending or running job left
    pub fn finish_idle_crawls(&self) -> Result<u64> {
        let finished = storage::lock(&self.inner.storage)?.finish_idle_crawls(Utc::now())?;
        if finished > 0 {
            info!("Finished {} idle crawl(s)", finished);
        }
        Ok(finished)
    }

    /// Deletes finished jobs older than `retention`
    pub fn purge(&self, retention: Duration) -> Result<u64> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let purged = storage::lock(&self.inner.storage)?.purge_finished(cutoff)?;

        let mut total = 0;
        for (state, count) in purged {
            self.inner
                .progress
                .record_n(ProgressEvent::Purged { state }, count);
            total += count;
        }

        if total > 0 {
            info!("Purged {} finished job(s) older than the retention window", total);
        }

        Ok(total)
    }

    /// Returns every dead-lettered job to pending with a fresh attempt budget
    pub fn requeue_dead_letters(&self) -> Result<u64> {
        let requeued = storage::lock(&self.inner.storage)?.requeue_dead_letters(Utc::now())?;

        if requeued > 0 {
            info!("Requeued {} dead-lettered job(s)", requeued);
            self.inner
                .progress
                .record_n(ProgressEvent::Requeued, requeued);
            self.inner.notify.notify_waiters();
        }

        Ok(requeued)
    }

    pub fn counts(&self) -> Result<HashMap<JobState, u64>> {
        Ok(storage::lock(&self.inner.storage)?.count_jobs_by_state()?)
    }

    fn record_reaped(&self, outcome: &ReapOutcome) {
        let progress = &self.inner.progress;
        progress.record_n(ProgressEvent::LeaseExpired, outcome.returned);
        progress.record_n(
            ProgressEvent::DeadLettered {
                from: JobState::Running,
            },
            outcome.dead_lettered,
        );
        progress.record_n(
            ProgressEvent::Cancelled {
                from: JobState::Running,
            },
            outcome.cancelled,
        );
    }
}
