use crate::batch::{Analyzer, Document, ItemResult};
use crate::config::BatchConfig;
use crate::job::{FailureKind, JobFailure};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Batches observed before the target size may grow
const WARMUP_BATCHES: u64 = 3;

/// Weight of the newest batch in the latency moving average
const LATENCY_ALPHA: f64 = 0.3;

/// A batch whose per-item latency stays under this multiple of the moving
/// average counts as stable
const STABLE_FACTOR: f64 = 1.5;

/// Size added after a stable batch
const GROWTH_STEP: usize = 2;

/// What one dispatched batch looked like
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    pub size: usize,
    pub elapsed: Duration,
    pub errors: usize,
}

impl BatchOutcome {
    pub fn per_item(&self) -> Duration {
        self.elapsed / self.size.max(1) as u32
    }

    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.size.max(1) as f64
    }
}

#[derive(Debug)]
struct Sizing {
    target: usize,
    batches: u64,
    /// Moving average of per-item latency in seconds
    avg_item_secs: Option<f64>,
}

/// Adapts the Analyze batch size to observed latency and errors
///
/// Shared by every analyze worker; the target size is always within
/// `[1, max_batch_size]`.
#[derive(Debug)]
pub struct BatchOptimizer {
    max_size: usize,
    latency_ceiling: Duration,
    max_error_rate: f64,
    sizing: Mutex<Sizing>,
}

impl BatchOptimizer {
    pub fn new(config: &BatchConfig) -> Self {
        let max_size = config.max_batch_size.max(1);
        Self {
            max_size,
            latency_ceiling: config.latency_ceiling(),
            max_error_rate: config.max_error_rate,
            sizing: Mutex::new(Sizing {
                target: config.initial_size.clamp(1, max_size),
                batches: 0,
                avg_item_secs: None,
            }),
        }
    }

    pub fn target_size(&self) -> usize {
        self.sizing.lock().unwrap_or_else(|p| p.into_inner()).target
    }

    /// Feeds one batch into the sizing rule and returns the new target
    ///
    /// - error rate above the limit: halve
    /// - per-item latency above the ceiling: shrink by one
    /// - otherwise, once warmed up and stable against the average: grow by two
    pub fn record(&self, outcome: &BatchOutcome) -> usize {
        let mut sizing = self.sizing.lock().unwrap_or_else(|p| p.into_inner());
        let before = sizing.target;
        let item_secs = outcome.per_item().as_secs_f64();

        let stable = sizing
            .avg_item_secs
            .map_or(true, |avg| item_secs <= avg * STABLE_FACTOR);

        sizing.batches += 1;
        sizing.avg_item_secs = Some(match sizing.avg_item_secs {
            Some(avg) => LATENCY_ALPHA * item_secs + (1.0 - LATENCY_ALPHA) * avg,
            None => item_secs,
        });

        if outcome.error_rate() > self.max_error_rate {
            sizing.target = (sizing.target / 2).max(1);
        } else if outcome.per_item() > self.latency_ceiling {
            sizing.target = sizing.target.saturating_sub(1).max(1);
        } else if sizing.batches >= WARMUP_BATCHES && stable {
            sizing.target = (sizing.target + GROWTH_STEP).min(self.max_size);
        }

        if sizing.target != before {
            info!(
                "Batch target {} -> {} (last batch: {} item(s), {:?}/item, {} error(s))",
                before,
                sizing.target,
                outcome.size,
                outcome.per_item(),
                outcome.errors
            );
        }

        sizing.target
    }

    /// Runs `documents` through the analyzer and returns one result per document
    ///
    /// A resource failure splits the batch in half once; a half that fails
    /// the same way again fails its members (permanently for a lone member,
    /// transiently otherwise so they are regrouped on retry). Any other batch
    /// failure is applied to every member.
    pub async fn dispatch(&self, analyzer: &dyn Analyzer, documents: &[Document]) -> Vec<ItemResult> {
        if documents.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let results = match call(analyzer, documents).await {
            Err(failure) if failure.kind == FailureKind::Resource && documents.len() > 1 => {
                warn!(
                    "Analyzer rejected a batch of {}, splitting: {}",
                    documents.len(),
                    failure.message
                );
                let (left, right) = documents.split_at(documents.len() / 2);
                let mut results = retry_half(analyzer, left).await;
                results.extend(retry_half(analyzer, right).await);
                results
            }
            Err(failure) if failure.kind == FailureKind::Resource => {
                vec![Err(JobFailure::permanent(format!(
                    "document exceeds analyzer limits on its own: {}",
                    failure.message
                )))]
            }
            Err(failure) => documents.iter().map(|_| Err(failure.clone())).collect(),
            Ok(results) => results,
        };

        let outcome = BatchOutcome {
            size: documents.len(),
            elapsed: started.elapsed(),
            errors: results.iter().filter(|r| r.is_err()).count(),
        };
        debug!(
            "Analyzed batch of {} in {:?} ({} error(s))",
            outcome.size, outcome.elapsed, outcome.errors
        );
        self.record(&outcome);

        results
    }
}

async fn retry_half(analyzer: &dyn Analyzer, documents: &[Document]) -> Vec<ItemResult> {
    match call(analyzer, documents).await {
        Ok(results) => results,
        Err(failure) if failure.kind == FailureKind::Resource && documents.len() == 1 => {
            vec![Err(JobFailure::permanent(format!(
                "document exceeds analyzer limits on its own: {}",
                failure.message
            )))]
        }
        Err(failure) if failure.kind == FailureKind::Resource => documents
            .iter()
            .map(|_| Err(JobFailure::transient(failure.message.clone())))
            .collect(),
        Err(failure) => documents.iter().map(|_| Err(failure.clone())).collect(),
    }
}

/// Calls the analyzer, treating a result count mismatch as a batch failure
async fn call(
    analyzer: &dyn Analyzer,
    documents: &[Document],
) -> Result<Vec<ItemResult>, JobFailure> {
    let results = analyzer.analyze(documents).await?;
    if results.len() != documents.len() {
        return Err(JobFailure::transient(format!(
            "analyzer returned {} result(s) for {} document(s)",
            results.len(),
            documents.len()
        )));
    }
    Ok(results)
}
