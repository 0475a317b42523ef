//! HTTP fetching against a mock server
//!
//! These tests use wiremock to check failure classification and a full crawl
//! over real HTTP.

use crate::common::{memory_storage, test_config, RecordingAnalyzer};
use std::sync::Arc;
use std::time::Duration;
use sumi_ingest::crawler::{Coordinator, Fetcher, HttpFetcher, KeywordScorer};
use sumi_ingest::job::FailureKind;
use sumi_ingest::worker::Collaborators;
use sumi_ingest::JobState;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&test_config(":memory:").user_agent).expect("http client")
}

fn at(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

async fn respond(server: &MockServer, p: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(p))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_returns_body_and_content_type() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/doc",
        ResponseTemplate::new(200)
            .set_body_string("<html><title>Doc</title></html>")
            .insert_header("content-type", "text/html"),
    )
    .await;

    let document = fetcher().fetch(&at(&server, "/doc")).await.unwrap();

    assert_eq!(document.status, 200);
    assert_eq!(document.content_type.as_deref(), Some("text/html"));
    assert_eq!(document.bytes, b"<html><title>Doc</title></html>".to_vec());
    assert_eq!(document.final_url, at(&server, "/doc"));
}

#[tokio::test]
async fn test_not_found_is_permanent() {
    let server = MockServer::start().await;
    respond(&server, "/missing", ResponseTemplate::new(404)).await;

    let failure = fetcher().fetch(&at(&server, "/missing")).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Permanent);
    assert!(failure.message.contains("404"));
}

#[tokio::test]
async fn test_too_many_requests_carries_retry_after() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/busy",
        ResponseTemplate::new(429).insert_header("retry-after", "7"),
    )
    .await;

    let failure = fetcher().fetch(&at(&server, "/busy")).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(failure.retry_after, Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    respond(&server, "/flaky", ResponseTemplate::new(503)).await;

    let failure = fetcher().fetch(&at(&server, "/flaky")).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(failure.retry_after, None);
}

#[tokio::test]
async fn test_redirect_updates_final_url() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/old",
        ResponseTemplate::new(301).insert_header("location", "/new"),
    )
    .await;
    respond(
        &server,
        "/new",
        ResponseTemplate::new(200).set_body_string("moved here"),
    )
    .await;

    let document = fetcher().fetch(&at(&server, "/old")).await.unwrap();

    assert_eq!(document.final_url, at(&server, "/new"));
    assert_eq!(document.bytes, b"moved here".to_vec());
}

#[tokio::test]
async fn test_full_crawl_over_http_honors_robots() {
    let server = MockServer::start().await;
    let base = server.uri();

    respond(
        &server,
        "/robots.txt",
        ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
    )
    .await;
    respond(
        &server,
        "/",
        ResponseTemplate::new(200)
            .set_body_string(format!(
                r#"<html><head><title>Home</title></head><body>
                <a href="{0}/docs">Docs</a>
                <a href="/private/secret">Secret</a>
                </body></html>"#,
                base
            ))
            .insert_header("content-type", "text/html"),
    )
    .await;
    respond(
        &server,
        "/docs",
        ResponseTemplate::new(200)
            .set_body_string("# Docs\n\nSee [home](/).")
            .insert_header("content-type", "text/markdown"),
    )
    .await;

    let mut config = test_config(":memory:");
    config.crawler.respect_robots = true;

    let analyzer = Arc::new(RecordingAnalyzer::new());
    let collaborators = Collaborators {
        fetcher: Arc::new(HttpFetcher::new(&config.user_agent).unwrap()),
        scorer: Arc::new(KeywordScorer::default()),
        analyzer: analyzer.clone(),
    };
    let coordinator =
        Coordinator::new(config, "test-hash".to_string(), memory_storage(), collaborators)
            .unwrap();

    let root = coordinator.submit_root(&format!("{}/", base), 1, 0.5).unwrap();
    coordinator.start().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        coordinator.wait_for_crawl(root, None),
    )
    .await
    .expect("crawl did not finish in time")
    .unwrap();
    coordinator.stop().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert!(paths.contains(&"/"));
    assert!(paths.contains(&"/docs"));
    assert!(!paths.contains(&"/private/secret"));
    assert_eq!(paths.iter().filter(|p| **p == "/robots.txt").count(), 1);

    let mut analyzed = analyzer.analyzed();
    analyzed.sort();
    assert_eq!(analyzed, vec![format!("{}/", base), format!("{}/docs", base)]);

    let report = coordinator.progress();
    assert_eq!(report.completed, 4);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(
        coordinator.get_job(root).unwrap().state,
        JobState::Completed
    );
}
