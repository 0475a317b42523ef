//! Crawler module: everything between a Fetch job and the jobs it produces
//!
//! This module contains:
//! - the `Fetcher` and `LinkScorer` collaborator seams and their defaults
//! - link extraction from HTML and markdown
//! - per-host rate limiting with robots.txt
//! - the crawl frontier and the content change detector
//! - the `Coordinator` facade that callers drive the engine through

mod change;
mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;
mod scorer;

pub use change::{content_fingerprint, ChangeDetector, ContentCheck};
pub use coordinator::{Coordinator, RootOptions};
pub use fetcher::{build_http_client, FetchedDocument, Fetcher, HttpFetcher, DEFAULT_RETRY_AFTER};
pub use frontier::{score_priority, CrawlLimits, Frontier, FrontierEntry};
pub use parser::{parse_document, parse_html, parse_markdown, DocumentFormat, Link, ParsedPage};
pub use rate_limiter::RateLimiter;
pub use scorer::{KeywordScorer, LinkScorer, PageContext, ScoredLink};
