//! End-to-end crawls through the coordinator with mock collaborators

use crate::common::{finish, harness, harness_with_scorer, test_config, url, MockWeb, RecordingAnalyzer};
use std::sync::Arc;
use std::time::Duration;
use sumi_ingest::crawler::{KeywordScorer, RootOptions};
use sumi_ingest::storage::CrawlStatus;
use sumi_ingest::{IngestError, JobKind, JobState, ParallelismMode};

#[tokio::test]
async fn test_only_relevant_links_within_depth_are_fetched() {
    let web = MockWeb::new();
    web.page_with_links(
        "/",
        &[
            "/guide-intro",
            "/blog",
            "/guide-setup",
            "/about",
            "/pricing",
            "/guide-api",
            "/careers",
            "/news",
        ],
    );
    for page in ["/guide-intro", "/guide-setup", "/guide-api"] {
        web.page_with_links(page, &["/guide-deeper"]);
    }

    let scorer = Arc::new(KeywordScorer::new(&["guide".to_string()]));
    let h = harness_with_scorer(test_config(":memory:"), web, RecordingAnalyzer::new(), scorer);

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let mut fetched = h.web.fetched_urls();
    fetched.sort();
    assert_eq!(
        fetched,
        vec![
            url("/"),
            url("/guide-api"),
            url("/guide-intro"),
            url("/guide-setup")
        ]
    );
    assert_eq!(h.web.calls_to("/guide-deeper"), 0);

    // Four fetches and their four analyses
    let report = h.coordinator.progress();
    assert_eq!(report.completed, 8);
    assert_eq!(report.pending + report.running, 0);
    assert_eq!(h.analyzer.analyzed().len(), 4);

    let root_job = h.coordinator.get_job(root).unwrap();
    assert_eq!(root_job.kind, JobKind::Fetch);
    assert_eq!(root_job.depth, Some(0));
    assert_eq!(root_job.result.unwrap()["links_admitted"], 3);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let web = MockWeb::new();
    web.page_with_links("/", &[]).flaky("/", 2);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let job = h.coordinator.get_job(root).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(h.web.calls_to("/"), 3);
    assert_eq!(h.coordinator.progress().failures, 2);
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    let web = MockWeb::new();
    web.page_with_links("/", &[]).flaky("/", 5);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let job = h.coordinator.get_job(root).unwrap();
    assert_eq!(job.state, JobState::DeadLettered);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.unwrap().contains("timeout"));
    assert_eq!(h.coordinator.progress().dead_lettered, 1);

    // Operator requeue gives it a fresh budget
    assert_eq!(h.coordinator.requeue_dead_letters().unwrap(), 1);
    let job = h.coordinator.get_job(root).unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(h.coordinator.progress().pending, 1);
}

#[tokio::test]
async fn test_unchanged_content_is_not_analyzed_again() {
    let web = MockWeb::new();
    web.page_with_links("/", &[]);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());
    h.coordinator.start().await.unwrap();

    let first = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    finish(&h.coordinator, first).await;

    let second = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    assert_ne!(first, second);
    finish(&h.coordinator, second).await;

    assert_eq!(h.web.calls_to("/"), 2);
    assert_eq!(h.analyzer.times_analyzed("/"), 1);
    let result = h.coordinator.get_job(second).unwrap().result.unwrap();
    assert_eq!(result["changed"], false);

    let forced = h
        .coordinator
        .submit_root_with(
            &url("/"),
            RootOptions {
                max_depth: 0,
                min_score: 0.5,
                force_reprocess: true,
            },
        )
        .unwrap();
    finish(&h.coordinator, forced).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.analyzer.times_analyzed("/"), 2);
}

#[tokio::test]
async fn test_resubmitting_an_active_root_is_a_duplicate() {
    let web = MockWeb::new();
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    let first = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    match h.coordinator.submit_root(&format!("{}/#top", crate::common::SITE), 1, 0.5) {
        Err(IngestError::DuplicateJob { existing }) => assert_eq!(existing, first),
        other => panic!("expected DuplicateJob, got {:?}", other),
    }

    let crawls = h.coordinator.recent_crawls(10).unwrap();
    assert_eq!(crawls.len(), 1);
    assert_eq!(crawls[0].config_hash, "test-hash");
}

#[tokio::test]
async fn test_resubmitting_a_root_while_its_crawl_runs_is_a_duplicate() {
    let web = MockWeb::with_latency(Duration::from_millis(400));
    web.page_with_links("/", &["/a"]).page_with_links("/a", &[]);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    let first = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();

    // The root job settles while its child fetch is still in flight
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.coordinator.get_job(first).unwrap().state != JobState::Completed {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("root fetch did not complete");
    assert_eq!(
        h.coordinator.crawl(first).unwrap().unwrap().status,
        CrawlStatus::Running
    );

    match h.coordinator.submit_root(&url("/"), 1, 0.5) {
        Err(IngestError::DuplicateJob { existing }) => assert_eq!(existing, first),
        other => panic!("expected DuplicateJob, got {:?}", other),
    }
    assert_eq!(h.coordinator.recent_crawls(10).unwrap().len(), 1);

    finish(&h.coordinator, first).await;
    let second = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    assert_ne!(first, second);
    finish(&h.coordinator, second).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.coordinator.recent_crawls(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_panicking_fetch_is_retried_by_a_replacement_worker() {
    let mut config = test_config(":memory:");
    config.workers.mode = ParallelismMode::Sequential;
    config.queue.lease_ms = 300;

    let web = MockWeb::new();
    web.page_with_links("/", &[]).panic_once("/");
    let h = harness(config, web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let job = h.coordinator.get_job(root).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(h.web.calls_to("/"), 2);
    assert_eq!(h.analyzer.times_analyzed("/"), 1);
}

#[tokio::test]
async fn test_invalid_root_is_rejected() {
    let h = harness(test_config(":memory:"), MockWeb::new(), RecordingAnalyzer::new());

    assert!(matches!(
        h.coordinator.submit_root("ftp://docs.test/", 1, 0.5),
        Err(IngestError::UrlError(_))
    ));
    assert!(matches!(
        h.coordinator.submit_root(&url("/"), 1, 1.5),
        Err(IngestError::Config(_))
    ));
}

#[tokio::test]
async fn test_cancel_pending_root_ends_the_crawl() {
    let web = MockWeb::new();
    web.page_with_links("/", &[]);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.cancel(root).unwrap();

    assert_eq!(h.coordinator.get_job(root).unwrap().state, JobState::Cancelled);
    finish(&h.coordinator, root).await;

    h.coordinator.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.web.calls_to("/"), 0);
    assert_eq!(h.coordinator.progress().cancelled, 1);
}

#[tokio::test]
async fn test_robots_denied_root_is_dead_lettered_without_retry() {
    let web = MockWeb::new();
    web.page("/robots.txt", "User-agent: *\nDisallow: /private")
        .page_with_links("/private", &[]);

    let mut config = test_config(":memory:");
    config.crawler.respect_robots = true;
    let h = harness(config, web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/private/"), 0, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let job = h.coordinator.get_job(root).unwrap();
    assert_eq!(job.state, JobState::DeadLettered);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("robots.txt"));
    assert_eq!(h.web.calls_to("/private"), 0);
    assert_eq!(h.web.calls_to("/robots.txt"), 1);
}

#[tokio::test]
async fn test_set_mode_switches_layout_between_crawls() {
    let web = MockWeb::new();
    web.page_with_links("/", &["/a", "/b"])
        .page_with_links("/a", &[])
        .page_with_links("/b", &[]);
    let h = harness(test_config(":memory:"), web, RecordingAnalyzer::new());

    h.coordinator.start().await.unwrap();
    assert_eq!(h.coordinator.mode().await, Some((ParallelismMode::Async, 4)));

    h.coordinator
        .set_mode(ParallelismMode::Hybrid, 2)
        .await
        .unwrap();
    assert_eq!(h.coordinator.mode().await, Some((ParallelismMode::Hybrid, 2)));

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    assert_eq!(h.coordinator.mode().await, None);
    assert_eq!(h.analyzer.analyzed().len(), 3);
}
