//! Queue durability across coordinator restarts

use crate::common::{finish, test_config, url, MockWeb, RecordingAnalyzer};
use std::path::Path;
use std::sync::Arc;
use sumi_ingest::crawler::{Coordinator, KeywordScorer};
use sumi_ingest::storage;
use sumi_ingest::worker::Collaborators;
use sumi_ingest::{JobKind, JobState};
use tempfile::TempDir;

fn open(db: &Path, web: Arc<MockWeb>, analyzer: Arc<RecordingAnalyzer>) -> Coordinator {
    let config = test_config(&db.to_string_lossy());
    let storage = storage::open_storage(db).expect("open database");
    let collaborators = Collaborators {
        fetcher: web,
        scorer: Arc::new(KeywordScorer::default()),
        analyzer,
    };
    Coordinator::new(config, "test-hash".to_string(), storage, collaborators)
        .expect("coordinator")
}

#[tokio::test]
async fn test_interrupted_job_is_recovered_on_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("ingest.db");

    let web = Arc::new(MockWeb::new());
    web.page_with_links("/", &[]);
    let analyzer = Arc::new(RecordingAnalyzer::new());

    let root = {
        let first = open(&db, web.clone(), analyzer.clone());
        let root = first.submit_root(&url("/"), 0, 0.5).unwrap();

        // A worker leases the root and the process dies before settling it
        let (job, _lease) = first
            .queue()
            .try_dequeue("doomed-worker", &[JobKind::Fetch])
            .unwrap()
            .expect("leased root");
        assert_eq!(job.id, root);
        assert_eq!(first.get_job(root).unwrap().state, JobState::Running);
        root
    };

    let second = open(&db, web.clone(), analyzer.clone());
    let job = second.get_job(root).unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(second.progress().pending, 1);

    second.start().await.unwrap();
    finish(&second, root).await;
    second.stop().await.unwrap();

    let job = second.get_job(root).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(web.calls_to("/"), 1);
    assert_eq!(analyzer.times_analyzed("/"), 1);
}

#[tokio::test]
async fn test_pending_work_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("ingest.db");

    let web = Arc::new(MockWeb::new());
    web.page_with_links("/", &["/next"]).page_with_links("/next", &[]);
    let analyzer = Arc::new(RecordingAnalyzer::new());

    let root = {
        let first = open(&db, web.clone(), analyzer.clone());
        first.submit_root(&url("/"), 1, 0.5).unwrap()
    };

    let second = open(&db, web.clone(), analyzer.clone());
    let crawl = second.crawl(root).unwrap().expect("crawl record");
    assert_eq!(crawl.root_url, url("/"));
    assert_eq!(crawl.max_depth, 1);

    second.start().await.unwrap();
    finish(&second, root).await;
    second.stop().await.unwrap();

    let mut fetched = web.fetched_urls();
    fetched.sort();
    assert_eq!(fetched, vec![url("/"), url("/next")]);
    assert_eq!(second.progress().completed, 4);
}
