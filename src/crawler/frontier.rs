//! Crawl frontier
//!
//! Decides which links found on a fetched page become new Fetch jobs. A link
//! is admitted only if it stays within the crawl's depth limit, was not seen
//! before in the crawl, scores at least the crawl's threshold and ranks among
//! the page's top links.

use crate::crawler::parser::Link;
use crate::crawler::scorer::{LinkScorer, PageContext};
use crate::job::{JobId, JobPayload, NewJob};
use crate::queue::JobQueue;
use crate::storage::{self, CrawlRecord, Storage};
use crate::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A link admitted into the crawl
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
    pub url: String,
    pub source_document_id: String,
    pub depth: u32,
    pub relevance_score: f64,
    pub discovered_at: DateTime<Utc>,
}

/// Limits applied to one crawl's expansion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub min_score: f64,
    pub max_links_per_page: usize,
}

impl CrawlLimits {
    pub fn for_crawl(crawl: &CrawlRecord, max_links_per_page: usize) -> Self {
        Self {
            max_depth: crawl.max_depth,
            min_score: crawl.min_score,
            max_links_per_page,
        }
    }
}

/// Maps a relevance score to a queue priority
///
/// Higher scores are fetched first; the root scores 1.0.
pub fn score_priority(score: f64) -> i64 {
    (score.clamp(0.0, 1.0) * 100.0).round() as i64
}

#[derive(Clone)]
pub struct Frontier {
    queue: JobQueue,
    scorer: Arc<dyn LinkScorer>,
    max_attempts: u32,
}

impl Frontier {
    pub fn new(queue: JobQueue, scorer: Arc<dyn LinkScorer>, max_attempts: u32) -> Self {
        Self {
            queue,
            scorer,
            max_attempts,
        }
    }

    /// Admits the best links found on a page as Fetch jobs one level deeper
    ///
    /// `source` is the page the links were found on; its depth decides the
    /// depth of the new jobs. Returns the admitted entries, best first.
    pub async fn propose(
        &self,
        crawl_id: JobId,
        limits: &CrawlLimits,
        links: &[Link],
        source: &PageContext,
    ) -> Result<Vec<FrontierEntry>> {
        let depth = source.depth + 1;
        if depth > limits.max_depth {
            debug!(
                "Not expanding {}: depth {} reaches the limit of {}",
                source.url, source.depth, limits.max_depth
            );
            return Ok(Vec::new());
        }

        let candidates: Vec<Link> = {
            let store = storage::lock(self.queue.storage())?;
            let mut fresh = Vec::with_capacity(links.len());
            for link in links {
                if !store.is_visited(crawl_id, &link.url)? {
                    fresh.push(link.clone());
                }
            }
            fresh
        };

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let known: HashMap<&str, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, link)| (link.url.as_str(), i))
            .collect();

        let mut scored: Vec<(usize, f64)> = self
            .scorer
            .score(&candidates, source)
            .await?
            .into_iter()
            .filter_map(|s| known.get(s.url.as_str()).map(|&i| (i, s.score)))
            .filter(|&(_, score)| score >= limits.min_score)
            .collect();

        // Best score first; ties keep page order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut admitted = Vec::new();
        for (index, score) in scored {
            if admitted.len() >= limits.max_links_per_page {
                break;
            }

            let url = &candidates[index].url;
            if let Some(entry) = self.admit(crawl_id, url, depth, score, source)? {
                admitted.push(entry);
            }
        }

        if !admitted.is_empty() {
            info!(
                "Admitted {} of {} link(s) from {} at depth {}",
                admitted.len(),
                links.len(),
                source.url,
                depth
            );
        }

        Ok(admitted)
    }

    fn admit(
        &self,
        crawl_id: JobId,
        url: &str,
        depth: u32,
        score: f64,
        source: &PageContext,
    ) -> Result<Option<FrontierEntry>> {
        let now = Utc::now();
        if !storage::lock(self.queue.storage())?.mark_visited(crawl_id, url, now)? {
            return Ok(None);
        }

        let job = NewJob::new(
            JobPayload::Fetch {
                url: url.to_string(),
                depth,
                crawl_id,
            },
            score_priority(score),
            self.max_attempts,
        );

        match self.queue.enqueue(job) {
            Ok(_) => {}
            Err(IngestError::DuplicateJob { existing }) => {
                debug!("{} is already queued as job {}", url, existing);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        Ok(Some(FrontierEntry {
            url: url.to_string(),
            source_document_id: source.url.clone(),
            depth,
            relevance_score: score,
            discovered_at: now,
        }))
    }
}
