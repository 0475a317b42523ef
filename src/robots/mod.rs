//! Robots.txt handling
//!
//! Rules are fetched through the same [`Fetcher`] as documents, parsed with
//! the `robotstxt` matcher and cached per host by the rate limiter.

mod cache;
mod parser;

pub use cache::CachedRobots;
pub use parser::ParsedRobots;

use crate::crawler::Fetcher;
use tracing::debug;
use url::Url;

/// Returns the robots.txt location for the host serving `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    url.join("/robots.txt").ok()
}

/// Fetches and parses robots.txt for the host serving `url`
///
/// A missing or unreachable robots.txt allows everything, which is how
/// crawlers conventionally treat it.
pub async fn fetch_robots(fetcher: &dyn Fetcher, url: &Url) -> ParsedRobots {
    let Some(location) = robots_url(url) else {
        return ParsedRobots::allow_all();
    };

    match fetcher.fetch(&location).await {
        Ok(document) => {
            debug!("Fetched {} ({} bytes)", location, document.bytes.len());
            ParsedRobots::from_content(&String::from_utf8_lossy(&document.bytes))
        }
        Err(failure) => {
            debug!("No usable robots.txt at {}: {}", location, failure);
            ParsedRobots::allow_all()
        }
    }
}
