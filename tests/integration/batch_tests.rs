//! Analyze jobs batched through the full pipeline

use crate::common::{finish, harness, test_config, url, MockWeb, RecordingAnalyzer};
use std::time::Duration;
use sumi_ingest::storage::{self, Storage};
use sumi_ingest::ParallelismMode;

#[tokio::test]
async fn test_failing_member_does_not_fail_its_batch() {
    let mut config = test_config(":memory:");
    config.workers.mode = ParallelismMode::Sequential;
    config.batch.initial_size = 8;

    let web = MockWeb::new();
    web.page_with_links("/", &["/a", "/b", "/c"]);
    for page in ["/a", "/b", "/c"] {
        web.page_with_links(page, &[]);
    }
    let analyzer = RecordingAnalyzer::new();
    analyzer.fail_on("/b");
    let h = harness(config, web, analyzer);

    let root = h.coordinator.submit_root(&url("/"), 1, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    // Fetches outrank analyses, so all four analyses wait and share one batch
    let batches = h.analyzer.batches();
    assert_eq!(batches.len(), 1);
    let mut members = batches[0].1.clone();
    members.sort();
    assert_eq!(members, vec![url("/"), url("/a"), url("/b"), url("/c")]);

    let report = h.coordinator.progress();
    assert_eq!(report.completed, 7);
    assert_eq!(report.dead_lettered, 1);

    let store = storage::lock(h.coordinator.queue().storage()).unwrap();
    assert!(store.get_analysis(&url("/b")).unwrap().is_none());
    for page in ["/", "/a", "/c"] {
        assert!(store.get_analysis(&url(page)).unwrap().is_some(), "{}", page);
    }
}

#[tokio::test]
async fn test_partial_batch_flushes_after_max_wait() {
    let mut config = test_config(":memory:");
    config.batch.initial_size = 8;
    config.batch.max_wait_ms = 300;

    let web = MockWeb::new();
    web.page_with_links("/", &[]);
    let h = harness(config, web, RecordingAnalyzer::new());

    let root = h.coordinator.submit_root(&url("/"), 0, 0.5).unwrap();
    h.coordinator.start().await.unwrap();
    finish(&h.coordinator, root).await;
    h.coordinator.stop().await.unwrap();

    let batches = h.analyzer.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1, vec![url("/")]);

    let fetched_at = h.web.call_times()[0];
    let waited = batches[0].0 - fetched_at;
    assert!(
        waited >= Duration::from_millis(250),
        "lone document was analyzed after only {:?}",
        waited
    );
}
