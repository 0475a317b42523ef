//! Per-host politeness
//!
//! Every request to a host, robots.txt included, first takes that host's
//! token. A host's state sits behind its own async lock, so waiting on one
//! host never delays requests to another.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::Fetcher;
use crate::robots::{fetch_robots, CachedRobots};
use crate::state::{effective_interval, HostState};
use crate::url::extract_host;
use crate::{IngestError, Result, UrlError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use url::Url;

type SharedHost = Arc<tokio::sync::Mutex<HostState>>;

pub struct RateLimiter {
    requests_per_second: f64,
    respect_robots: bool,
    /// Product token matched against robots.txt groups
    robots_agent: String,
    robots_fetcher: Arc<dyn Fetcher>,
    hosts: Mutex<HashMap<String, SharedHost>>,
}

impl RateLimiter {
    pub fn new(config: &CrawlerConfig, robots_agent: &str, robots_fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            respect_robots: config.respect_robots,
            robots_agent: robots_agent.to_string(),
            robots_fetcher,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until a request to `url` may be sent
    ///
    /// Fails with `RobotsDenied` if the host's robots.txt disallows the URL.
    /// The first request to a host (and the first after its cached rules go
    /// stale) also fetches robots.txt, which costs one token.
    pub async fn acquire(&self, url: &Url) -> Result<()> {
        let host = extract_host(url).ok_or(IngestError::UrlError(UrlError::MissingHost))?;
        let shared = self.host(&host);
        let mut state = shared.lock().await;

        if self.respect_robots {
            if state.is_robots_stale() {
                take_token(&mut state, &host).await;
                let robots = fetch_robots(self.robots_fetcher.as_ref(), url).await;
                state.update_robots(CachedRobots::new(robots), &self.robots_agent);
                debug!("Cached robots.txt for {} (interval {:?})", host, state.interval);
            }

            let allowed = state
                .robots
                .as_ref()
                .map_or(true, |cached| cached.content.allows(url, &self.robots_agent));
            if !allowed {
                info!("Skipping {}: disallowed by robots.txt", url);
                return Err(IngestError::RobotsDenied {
                    url: url.to_string(),
                });
            }
        }

        take_token(&mut state, &host).await;
        Ok(())
    }

    /// Holds off every request to the host of `url` for `cooldown`
    pub async fn penalize(&self, url: &Url, cooldown: Duration) {
        let Some(host) = extract_host(url) else {
            return;
        };

        let shared = self.host(&host);
        shared.lock().await.penalize(Instant::now(), cooldown);
        info!("Backing off {} for {:?}", host, cooldown);
    }

    /// Number of requests sent to `host` so far
    pub async fn request_count(&self, host: &str) -> u64 {
        let shared = self.host(host);
        let count = shared.lock().await.request_count;
        count
    }

    fn host(&self, host: &str) -> SharedHost {
        let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(HostState::new(effective_interval(
                    self.requests_per_second,
                    None,
                ))))
            })
            .clone()
    }
}

async fn take_token(state: &mut HostState, host: &str) {
    loop {
        match state.try_acquire(Instant::now()) {
            Ok(()) => return,
            Err(wait) => {
                trace!("Waiting {:?} for {}", wait, host);
                tokio::time::sleep(wait).await;
            }
        }
    }
}
