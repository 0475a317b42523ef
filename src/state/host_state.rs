use crate::robots::CachedRobots;
use std::time::{Duration, Instant};

/// Longest crawl delay honored from robots.txt
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Converts a robots.txt crawl delay in seconds, capped at `MAX_CRAWL_DELAY`
///
/// Returns `None` for values no `Duration` can hold (negative, NaN).
pub fn crawl_delay_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).map_or(MAX_CRAWL_DELAY, |d| d.min(MAX_CRAWL_DELAY)))
}

/// Tracks the throttle state of one host
///
/// This is a token bucket of capacity one: a request consumes the token and
/// the next one becomes available `interval` later. With the interval at
/// `1 / requests_per_second` no sliding one-second window ever sees more
/// requests than the budget.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Earliest instant the next request may be sent
    pub next_allowed: Option<Instant>,

    /// Spacing between two requests to this host
    pub interval: Duration,

    /// Number of requests sent to this host since startup
    pub request_count: u64,

    /// Cached politeness rules for this host
    pub robots: Option<CachedRobots>,
}

impl HostState {
    /// Creates a host state whose bucket starts full
    pub fn new(interval: Duration) -> Self {
        Self {
            next_allowed: None,
            interval,
            request_count: 0,
            robots: None,
        }
    }

    /// Takes the token if it is available
    ///
    /// Returns `Err(wait)` with the time until the token refills otherwise.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(wait) = self.time_until_next_request(now) {
            return Err(wait);
        }

        self.request_count += 1;
        self.next_allowed = Some(now + self.interval);
        Ok(())
    }

    /// Returns the time until the next request may be sent, or `None` if now
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        match self.next_allowed {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }
    }

    /// Pushes the next allowed request out by `cooldown` (e.g. after HTTP 429)
    pub fn penalize(&mut self, now: Instant, cooldown: Duration) {
        let until = now + cooldown;
        if self.next_allowed.map_or(true, |at| at < until) {
            self.next_allowed = Some(until);
        }
    }

    /// Returns true if the cached robots.txt is missing or older than a day
    pub fn is_robots_stale(&self) -> bool {
        self.robots.as_ref().map_or(true, |cached| cached.is_stale())
    }

    /// Caches robots.txt and widens the interval to its crawl delay if needed
    pub fn update_robots(&mut self, robots: CachedRobots, user_agent: &str) {
        if let Some(delay) = robots.crawl_delay(user_agent).and_then(crawl_delay_duration) {
            if delay > self.interval {
                self.interval = delay;
            }
        }
        self.robots = Some(robots);
    }
}

/// Calculates the request spacing for a per-host budget
///
/// This takes the maximum of the configured budget and the robots.txt crawl
/// delay, if one is given.
pub fn effective_interval(requests_per_second: f64, crawl_delay: Option<f64>) -> Duration {
    let budget = Duration::from_secs_f64(1.0 / requests_per_second);
    let robots = crawl_delay
        .and_then(crawl_delay_duration)
        .unwrap_or(Duration::ZERO);
    std::cmp::max(budget, robots)
}
