//! Link relevance scoring

use crate::crawler::parser::Link;
use crate::job::JobFailure;
use async_trait::async_trait;

/// The page a batch of links was found on
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,
    pub title: Option<String>,
    pub depth: u32,
}

/// A link with its relevance score in `[0.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLink {
    pub url: String,
    pub score: f64,
}

/// Assigns relevance scores to candidate links
///
/// Links missing from the returned list are treated as irrelevant.
#[async_trait]
pub trait LinkScorer: Send + Sync {
    async fn score(
        &self,
        links: &[Link],
        context: &PageContext,
    ) -> Result<Vec<ScoredLink>, JobFailure>;
}

/// Scores a link by the share of configured keywords found in its URL or text
///
/// With no keywords configured every link scores 1.0.
#[derive(Debug, Clone, Default)]
pub struct KeywordScorer {
    keywords: Vec<String>,
}

impl KeywordScorer {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn score_link(&self, link: &Link) -> f64 {
        if self.keywords.is_empty() {
            return 1.0;
        }

        let haystack = format!("{} {}", link.url, link.text).to_lowercase();
        let hits = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .count();

        hits as f64 / self.keywords.len() as f64
    }
}

#[async_trait]
impl LinkScorer for KeywordScorer {
    async fn score(
        &self,
        links: &[Link],
        _context: &PageContext,
    ) -> Result<Vec<ScoredLink>, JobFailure> {
        Ok(links
            .iter()
            .map(|link| ScoredLink {
                url: link.url.clone(),
                score: self.score_link(link),
            })
            .collect())
    }
}
