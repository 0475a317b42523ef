use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};

/// Parsed robots.txt plus the time it was fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Robots.txt is refetched once a day
    pub fn is_stale(&self) -> bool {
        self.age() > Duration::hours(24)
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        self.content.is_allowed(url, user_agent)
    }

    /// Crawl delay in seconds for `user_agent`, if the file names one
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        self.content.crawl_delay(user_agent)
    }
}
