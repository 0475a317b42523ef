use crate::config::Config;
use crate::job::JobKind;
use crate::queue::JobQueue;
use crate::worker::{Executor, ParallelismMode};
use crate::{IngestError, Result};
use std::future::Future;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Reaper ticks between two garbage-collection passes
const PURGE_EVERY_TICKS: u64 = 20;

/// Timing knobs of a pool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSettings {
    /// How long an analyze worker waits to fill a batch
    pub batch_wait: Duration,
    /// How often expired leases are swept
    pub reap_interval: Duration,
    /// Age after which finished jobs are purged
    pub retention: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_wait: config.batch.max_wait(),
            reap_interval: (config.queue.lease() / 4).max(Duration::from_millis(100)),
            retention: config.queue.retention(),
        }
    }
}

struct Running {
    mode: ParallelismMode,
    concurrency: usize,
    shutdown: watch::Sender<bool>,
    threads: Vec<JoinHandle<()>>,
}

/// Owns the worker threads of one parallelism mode at a time
pub struct WorkerPool {
    executor: Executor,
    settings: PoolSettings,
    running: Option<Running>,
}

impl WorkerPool {
    pub fn new(executor: Executor, settings: PoolSettings) -> Self {
        Self {
            executor,
            settings,
            running: None,
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Mode and concurrency of the running workers, if any
    pub fn mode(&self) -> Option<(ParallelismMode, usize)> {
        self.running.as_ref().map(|r| (r.mode, r.concurrency))
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Launches workers for `mode`
    pub fn start(&mut self, mode: ParallelismMode, concurrency: usize) -> Result<()> {
        if let Some(running) = &self.running {
            return Err(IngestError::Pool(format!(
                "worker pool is already running in {} mode",
                running.mode
            )));
        }
        if concurrency == 0 {
            return Err(IngestError::Pool(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let (shutdown, signal) = watch::channel(false);
        let mut threads = Vec::new();

        let spawned = self.spawn_layout(mode, concurrency, &signal, &mut threads);
        let spawned = spawned.and_then(|()| {
            threads.push(spawn_reaper(
                self.executor.queue().clone(),
                self.settings,
                signal.clone(),
            )?);
            Ok(())
        });

        if let Err(e) = spawned {
            // Threads already running see the signal and exit on their own
            let _ = shutdown.send(true);
            self.executor.queue().wake_all();
            return Err(IngestError::Io(e));
        }

        info!(
            "Worker pool started: {} mode, concurrency {} ({} thread(s))",
            mode,
            concurrency,
            threads.len()
        );

        self.running = Some(Running {
            mode,
            concurrency,
            shutdown,
            threads,
        });
        Ok(())
    }

    fn spawn_layout(
        &self,
        mode: ParallelismMode,
        concurrency: usize,
        signal: &watch::Receiver<bool>,
        threads: &mut Vec<JoinHandle<()>>,
    ) -> std::io::Result<()> {
        let all = JobKind::all().to_vec();
        let batch_wait = self.settings.batch_wait;

        match mode {
            ParallelismMode::Sequential => {
                // A lone worker never waits for batch-mates it would produce itself
                threads.push(self.spawn_workers("sumi-seq", 1, all, Duration::ZERO, signal)?);
            }
            ParallelismMode::Async => {
                threads.push(self.spawn_workers("sumi-async", concurrency, all, batch_wait, signal)?);
            }
            ParallelismMode::Process => {
                for i in 0..concurrency {
                    threads.push(self.spawn_workers(
                        &format!("sumi-proc-{}", i),
                        1,
                        all.clone(),
                        batch_wait,
                        signal,
                    )?);
                }
            }
            ParallelismMode::Hybrid => {
                threads.push(self.spawn_workers(
                    "sumi-fetch",
                    concurrency,
                    vec![JobKind::Fetch],
                    Duration::ZERO,
                    signal,
                )?);
                for i in 0..concurrency {
                    threads.push(self.spawn_workers(
                        &format!("sumi-analyze-{}", i),
                        1,
                        vec![JobKind::Analyze],
                        batch_wait,
                        signal,
                    )?);
                }
            }
        }

        Ok(())
    }

    /// Starts a thread with its own single-threaded runtime running `count` workers
    fn spawn_workers(
        &self,
        name: &str,
        count: usize,
        kinds: Vec<JobKind>,
        batch_wait: Duration,
        signal: &watch::Receiver<bool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let executor = self.executor.clone();
        let signal = signal.clone();
        let prefix = name.to_string();

        spawn_runtime_thread(name, async move {
            let worker = |n: usize| Worker {
                id: format!("{}-{}", prefix, n),
                kinds: kinds.clone(),
                batch_wait,
                executor: executor.clone(),
                shutdown: signal.clone(),
            };

            let mut workers = JoinSet::new();
            for i in 0..count {
                workers.spawn(worker(i).run());
            }

            // A panicked worker is replaced; its lease runs out and the job is retried
            let mut next = count;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(()) => {}
                    Err(e) if e.is_panic() && !*signal.borrow() => {
                        error!("Worker task on {} panicked, starting a replacement: {}", prefix, e);
                        workers.spawn(worker(next).run());
                        next += 1;
                    }
                    Err(e) => error!("Worker task on {} ended abnormally: {}", prefix, e),
                }
            }
        })
    }

    /// Stops dequeuing and waits for in-flight jobs to finish
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        info!("Stopping worker pool ({} mode)", running.mode);
        let _ = running.shutdown.send(true);
        self.executor.queue().wake_all();

        let threads = running.threads;
        let panicked = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .map(JoinHandle::join)
                .filter(|joined| joined.is_err())
                .count()
        })
        .await
        .map_err(|e| IngestError::Pool(e.to_string()))?;

        if panicked > 0 {
            return Err(IngestError::Pool(format!(
                "{} worker thread(s) panicked",
                panicked
            )));
        }

        info!("Worker pool stopped");
        Ok(())
    }

    /// Restarts the pool under a new mode
    ///
    /// Jobs already leased finish under the old layout first.
    pub async fn set_mode(&mut self, mode: ParallelismMode, concurrency: usize) -> Result<()> {
        self.stop().await?;
        self.start(mode, concurrency)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            self.executor.queue().wake_all();
        }
    }
}

fn spawn_runtime_thread<F>(name: &str, work: F) -> std::io::Result<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to start runtime for {}: {}", thread_name, e);
                return;
            }
        };
        runtime.block_on(work);
    })
}

fn spawn_reaper(
    queue: JobQueue,
    settings: PoolSettings,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<JoinHandle<()>> {
    spawn_runtime_thread("sumi-reaper", async move {
        let mut ticker = tokio::time::interval(settings.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = queue.reap() {
                        warn!("Lease sweep failed: {}", e);
                    }
                    if ticks % PURGE_EVERY_TICKS == 0 {
                        if let Err(e) = queue.purge(settings.retention) {
                            warn!("Purge failed: {}", e);
                        }
                    }
                    ticks += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Reaper stopped");
    })
}

struct Worker {
    id: String,
    kinds: Vec<JobKind>,
    batch_wait: Duration,
    executor: Executor,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Worker {} started for {:?}", self.id, self.kinds);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let claimed = match self.executor.queue().try_dequeue(&self.id, &self.kinds) {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!("Worker {} failed to dequeue: {}", self.id, e);
                    None
                }
            };

            let Some((job, lease)) = claimed else {
                tokio::select! {
                    _ = self.executor.queue().wait_for_work() => {}
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            match job.kind {
                JobKind::Fetch => self.executor.run_fetch(job, lease).await,
                JobKind::Analyze => {
                    let (batch, members) = self
                        .executor
                        .collect_batch(&self.id, (job, lease), self.batch_wait, &self.shutdown)
                        .await;
                    self.executor.run_analyze(batch, members).await;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }
}
