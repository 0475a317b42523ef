//! Worker pool layouts and politeness under load

use crate::common::{finish, harness, test_config, url, MockWeb, RecordingAnalyzer};
use std::time::Duration;
use sumi_ingest::ParallelismMode;

const SECTIONS: [&str; 8] = ["/s1", "/s2", "/s3", "/s4", "/s5", "/s6", "/s7", "/s8"];

fn site(latency: Duration) -> MockWeb {
    let web = MockWeb::with_latency(latency);
    web.page_with_links("/", &SECTIONS);
    for section in SECTIONS {
        web.page_with_links(section, &[]);
    }
    web
}

#[tokio::test]
async fn test_hybrid_splits_fetch_and_analysis_threads() {
    let mut config = test_config(":memory:");
    config.workers.mode = ParallelismMode::Hybrid;
    config.workers.concurrency = 3;
    let h = harness(
        config,
        site(Duration::from_millis(50)),
        RecordingAnalyzer::with_work(Duration::from_millis(5)),
    );

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.web.fetched_urls().len(), 9);
    assert!(h.web.threads().iter().all(|t| t.starts_with("sumi-fetch")));
    assert!(h
        .analyzer
        .threads()
        .iter()
        .all(|t| t.starts_with("sumi-analyze")));
    assert!(h.web.max_in_flight() > 1);
    assert_eq!(h.analyzer.analyzed().len(), 9);
}

#[tokio::test]
async fn test_sequential_runs_one_job_at_a_time() {
    let mut config = test_config(":memory:");
    config.workers.mode = ParallelismMode::Sequential;
    let h = harness(config, site(Duration::from_millis(5)), RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.web.max_in_flight(), 1);
    assert!(h.web.threads().iter().all(|t| t == "sumi-seq"));
    assert!(h.analyzer.threads().iter().all(|t| t == "sumi-seq"));
    assert_eq!(h.analyzer.analyzed().len(), 9);
}

#[tokio::test]
async fn test_process_mode_spreads_work_over_threads() {
    let mut config = test_config(":memory:");
    config.workers.mode = ParallelismMode::Process;
    config.workers.concurrency = 3;
    let h = harness(config, site(Duration::from_millis(30)), RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let threads = h.web.threads();
    assert!(threads.iter().all(|t| t.starts_with("sumi-proc-")));
    assert!(h.web.max_in_flight() > 1);
    assert_eq!(h.coordinator.progress().completed, 18);
}

#[tokio::test]
async fn test_concurrent_workers_respect_host_rate() {
    let mut config = test_config(":memory:");
    config.crawler.requests_per_second = 5.0;
    config.workers.concurrency = 8;
    let web = MockWeb::new();
    web.page_with_links("/", &SECTIONS[..6]);
    for section in &SECTIONS[..6] {
        web.page_with_links(section, &[]);
    }
    let h = harness(config, web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let mut times = h.web.call_times();
    times.sort();
    assert_eq!(times.len(), 7);

    // No window of one second holds more than five requests
    for i in 0..times.len() - 5 {
        assert!(
            times[i + 5] - times[i] >= Duration::from_millis(950),
            "requests {}..{} were {:?} apart",
            i,
            i + 5,
            times[i + 5] - times[i]
        );
    }
}

#[tokio::test]
async fn test_leases_outlive_a_long_rate_limit_wait() {
    let mut config = test_config(":memory:");
    config.crawler.requests_per_second = 2.0;
    config.queue.lease_ms = 1_000;
    config.workers.concurrency = 6;
    let web = MockWeb::new();
    web.page_with_links("/", &SECTIONS[..6]);
    for section in &SECTIONS[..6] {
        web.page_with_links(section, &[]);
    }
    let h = harness(config, web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    // The last fetches wait well past one lease duration for their turn
    assert_eq!(h.web.calls_to("/"), 1);
    for section in &SECTIONS[..6] {
        assert_eq!(h.web.calls_to(section), 1, "{} fetched more than once", section);
    }
    let report = h.coordinator.progress();
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(report.completed, 14);
}
