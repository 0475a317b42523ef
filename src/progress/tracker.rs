use crate::progress::ProgressReport;
use crate::state::JobState;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trailing window used for throughput
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// A job transition reported by the queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    Enqueued,
    Leased,
    /// Completed; `elapsed` is the time the final attempt ran
    Acked { elapsed: Duration },
    /// Failed with attempts left, back to pending
    Retried,
    DeadLettered { from: JobState },
    Cancelled { from: JobState },
    /// Lease ran out and the job went back to pending
    LeaseExpired,
    /// Operator returned a dead letter to pending
    Requeued,
    Purged { state: JobState },
}

#[derive(Debug)]
struct Inner {
    counts: HashMap<JobState, u64>,
    failures: u64,
    finished: VecDeque<Instant>,
    item_time_total: Duration,
    items_timed: u64,
}

impl Inner {
    fn shift(&mut self, from: JobState, to: JobState) {
        self.take(from);
        self.give(to);
    }

    fn take(&mut self, state: JobState) {
        let count = self.counts.entry(state).or_insert(0);
        *count = count.saturating_sub(1);
    }

    fn give(&mut self, state: JobState) {
        *self.counts.entry(state).or_insert(0) += 1;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.finished.front() {
            if now.duration_since(*front) > THROUGHPUT_WINDOW {
                self.finished.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Aggregates queue transitions for progress reporting
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::seeded(HashMap::new())
    }

    /// Starts from counts already in the store (e.g. after a restart)
    pub fn seeded(counts: HashMap<JobState, u64>) -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Inner {
                counts,
                failures: 0,
                finished: VecDeque::new(),
                item_time_total: Duration::ZERO,
                items_timed: 0,
            }),
        }
    }

    pub fn record(&self, event: ProgressEvent) {
        self.record_at(event, Instant::now());
    }

    pub fn record_n(&self, event: ProgressEvent, times: u64) {
        let now = Instant::now();
        for _ in 0..times {
            self.record_at(event, now);
        }
    }

    fn record_at(&self, event: ProgressEvent, now: Instant) {
        // Progress is advisory; a poisoned lock still holds usable counters
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            ProgressEvent::Enqueued => inner.give(JobState::Pending),
            ProgressEvent::Leased => inner.shift(JobState::Pending, JobState::Running),
            ProgressEvent::Acked { elapsed } => {
                inner.shift(JobState::Running, JobState::Completed);
                inner.finished.push_back(now);
                inner.item_time_total += elapsed;
                inner.items_timed += 1;
            }
            ProgressEvent::Retried => {
                inner.shift(JobState::Running, JobState::Pending);
                inner.failures += 1;
            }
            ProgressEvent::DeadLettered { from } => {
                inner.shift(from, JobState::DeadLettered);
                inner.failures += 1;
                inner.finished.push_back(now);
            }
            ProgressEvent::Cancelled { from } => {
                inner.shift(from, JobState::Cancelled);
                inner.finished.push_back(now);
            }
            ProgressEvent::LeaseExpired => inner.shift(JobState::Running, JobState::Pending),
            ProgressEvent::Requeued => inner.shift(JobState::DeadLettered, JobState::Pending),
            ProgressEvent::Purged { state } => inner.take(state),
        }

        inner.prune(now);
    }

    /// Read-only snapshot of the current progress
    pub fn snapshot(&self) -> ProgressReport {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> ProgressReport {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.prune(now);

        let count = |state: JobState| inner.counts.get(&state).copied().unwrap_or(0);
        let pending = count(JobState::Pending);

        // Until a full window has passed, divide by the time actually observed
        let elapsed = now.duration_since(self.started);
        let window = elapsed.min(THROUGHPUT_WINDOW).as_secs_f64();
        let throughput = if window > 0.0 {
            inner.finished.len() as f64 / window
        } else {
            0.0
        };

        let eta = if throughput > 0.0 {
            Some(Duration::from_secs_f64(pending as f64 / throughput))
        } else {
            None
        };

        let avg_item_seconds = (inner.items_timed > 0)
            .then(|| inner.item_time_total.as_secs_f64() / inner.items_timed as f64);

        ProgressReport {
            pending,
            running: count(JobState::Running),
            completed: count(JobState::Completed),
            dead_lettered: count(JobState::DeadLettered),
            cancelled: count(JobState::Cancelled),
            failures: inner.failures,
            throughput,
            eta,
            avg_item_seconds,
            elapsed,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
