//! Shared fixtures: a scripted web, a recording analyzer and a fast config

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sumi_ingest::batch::{Analyzer, Document, ItemResult};
use sumi_ingest::config::{
    BatchConfig, Config, CrawlerConfig, OutputConfig, QueueConfig, UserAgentConfig, WorkerConfig,
};
use sumi_ingest::crawler::{Coordinator, FetchedDocument, Fetcher, KeywordScorer, LinkScorer};
use sumi_ingest::job::JobFailure;
use sumi_ingest::storage::{SharedStorage, SqliteStorage};
use sumi_ingest::worker::Collaborators;
use sumi_ingest::{JobId, ParallelismMode};
use url::Url;

pub const SITE: &str = "https://docs.test";

/// Creates a configuration tuned for fast tests
pub fn test_config(db_path: &str) -> Config {
    Config {
        crawler: CrawlerConfig {
            max_depth: 1,
            min_score: 0.5,
            max_links_per_page: 10,
            requests_per_second: 1000.0,
            respect_robots: false,
            keywords: Vec::new(),
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        queue: QueueConfig {
            max_attempts: 3,
            lease_ms: 5_000,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            retention_hours: 72,
            poll_interval_ms: 10,
        },
        batch: BatchConfig {
            max_wait_ms: 50,
            ..BatchConfig::default()
        },
        workers: WorkerConfig {
            mode: ParallelismMode::Async,
            concurrency: 4,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
    }
}

pub fn memory_storage() -> SharedStorage {
    Arc::new(Mutex::new(
        SqliteStorage::new_in_memory().expect("in-memory storage"),
    ))
}

pub fn url(path: &str) -> String {
    format!("{}{}", SITE, path)
}

/// A scripted set of pages served by [`MockWeb`]
#[derive(Default)]
pub struct MockWeb {
    pages: Mutex<HashMap<String, String>>,
    failures_left: Mutex<HashMap<String, usize>>,
    panics_left: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Instant)>>,
    threads: Mutex<Vec<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Serves `html` at `path`
    pub fn page(&self, path: &str, html: &str) -> &Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url(path), html.to_string());
        self
    }

    /// Serves a page linking to each of `links`
    pub fn page_with_links(&self, path: &str, links: &[&str]) -> &Self {
        let anchors: String = links
            .iter()
            .map(|l| format!(r#"<a href="{}">{}</a>"#, l, l))
            .collect();
        self.page(
            path,
            &format!(
                "<html><head><title>{}</title></head><body><p>Page {}</p>{}</body></html>",
                path, path, anchors
            ),
        )
    }

    /// Makes the next `times` fetches of `path` fail transiently
    pub fn flaky(&self, path: &str, times: usize) -> &Self {
        self.failures_left.lock().unwrap().insert(url(path), times);
        self
    }

    /// Makes the next fetch of `path` panic
    pub fn panic_once(&self, path: &str) -> &Self {
        self.panics_left.lock().unwrap().insert(url(path));
        self
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let target = url(path);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == target)
            .count()
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn threads(&self) -> Vec<String> {
        self.threads.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockWeb {
    async fn fetch(&self, target: &Url) -> Result<FetchedDocument, JobFailure> {
        let key = target.as_str().to_string();
        self.calls.lock().unwrap().push((key.clone(), Instant::now()));
        self.threads.lock().unwrap().push(thread_name());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(JobFailure::transient(format!("timeout fetching {}", key)));
                }
            }
        }

        let panics = self.panics_left.lock().unwrap().remove(&key);
        if panics {
            panic!("fetcher blew up on {}", key);
        }

        let body = self.pages.lock().unwrap().get(&key).cloned();
        match body {
            Some(html) => Ok(FetchedDocument {
                final_url: target.clone(),
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                bytes: html.into_bytes(),
            }),
            None => Err(JobFailure::permanent(format!("HTTP 404 for {}", key))),
        }
    }
}

/// Analyzer that records every batch it sees
#[derive(Default)]
pub struct RecordingAnalyzer {
    batches: Mutex<Vec<(Instant, Vec<String>)>>,
    threads: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    /// Blocking work per document, standing in for CPU-bound analysis
    work: Duration,
}

impl RecordingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work(work: Duration) -> Self {
        Self {
            work,
            ..Self::default()
        }
    }

    /// Makes every analysis of `path` fail permanently, leaving its batch-mates alone
    pub fn fail_on(&self, path: &str) -> &Self {
        self.failing.lock().unwrap().insert(url(path));
        self
    }

    pub fn analyzed(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, batch)| batch.iter().cloned())
            .collect()
    }

    /// Every batch with the instant it reached the analyzer
    pub fn batches(&self) -> Vec<(Instant, Vec<String>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn times_analyzed(&self, path: &str) -> usize {
        let target = url(path);
        self.analyzed().iter().filter(|u| **u == target).count()
    }

    pub fn threads(&self) -> Vec<String> {
        self.threads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyzer for RecordingAnalyzer {
    async fn analyze(&self, documents: &[Document]) -> Result<Vec<ItemResult>, JobFailure> {
        self.threads.lock().unwrap().push(thread_name());
        self.batches.lock().unwrap().push((
            Instant::now(),
            documents.iter().map(|d| d.identity.clone()).collect(),
        ));

        if !self.work.is_zero() {
            std::thread::sleep(self.work * documents.len() as u32);
        }

        let failing = self.failing.lock().unwrap().clone();
        Ok(documents
            .iter()
            .map(|d| {
                if failing.contains(&d.identity) {
                    Err(JobFailure::permanent(format!("cannot analyze {}", d.identity)))
                } else {
                    Ok(serde_json::json!({ "bytes": d.body.len() }))
                }
            })
            .collect())
    }
}

fn thread_name() -> String {
    std::thread::current().name().unwrap_or("unnamed").to_string()
}

pub struct Harness {
    pub coordinator: Coordinator,
    pub web: Arc<MockWeb>,
    pub analyzer: Arc<RecordingAnalyzer>,
}

/// Builds a coordinator over in-memory storage and mock collaborators
pub fn harness(config: Config, web: MockWeb, analyzer: RecordingAnalyzer) -> Harness {
    harness_with_scorer(config, web, analyzer, Arc::new(KeywordScorer::default()))
}

pub fn harness_with_scorer(
    config: Config,
    web: MockWeb,
    analyzer: RecordingAnalyzer,
    scorer: Arc<dyn LinkScorer>,
) -> Harness {
    let web = Arc::new(web);
    let analyzer = Arc::new(analyzer);
    let collaborators = Collaborators {
        fetcher: web.clone(),
        scorer,
        analyzer: analyzer.clone(),
    };

    let coordinator = Coordinator::new(
        config,
        "test-hash".to_string(),
        memory_storage(),
        collaborators,
    )
    .expect("coordinator");

    Harness {
        coordinator,
        web,
        analyzer,
    }
}

/// Waits for a crawl to finish, failing the test after ten seconds
pub async fn finish(coordinator: &Coordinator, crawl_id: JobId) {
    tokio::time::timeout(
        Duration::from_secs(10),
        coordinator.wait_for_crawl(crawl_id, None),
    )
    .await
    .expect("crawl did not finish in time")
    .expect("crawl record");
}
