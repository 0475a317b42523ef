use crate::batch::{Analyzer, Document, ItemResult};
use crate::crawler::{content_fingerprint, parse_document, DocumentFormat};
use crate::job::JobFailure;
use async_trait::async_trait;
use serde_json::json;
use url::Url;

/// Largest total body size accepted in one call
pub const DEFAULT_MAX_BATCH_BYTES: usize = 8 * 1024 * 1024;

/// Words kept in a summary excerpt
const EXCERPT_WORDS: usize = 40;

/// Default analyzer: extracts a title, an excerpt and simple counts
///
/// Batches whose bodies add up to more than `max_batch_bytes` are rejected
/// with a resource failure.
#[derive(Debug, Clone)]
pub struct SummaryAnalyzer {
    max_batch_bytes: usize,
}

impl Default for SummaryAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_BYTES)
    }
}

impl SummaryAnalyzer {
    pub fn new(max_batch_bytes: usize) -> Self {
        Self { max_batch_bytes }
    }

    fn summarize(&self, document: &Document) -> ItemResult {
        if document.body.is_empty() {
            return Err(JobFailure::permanent(format!(
                "{} has an empty body",
                document.identity
            )));
        }

        let base = Url::parse(&document.identity)
            .map_err(|e| JobFailure::permanent(format!("Bad document identity: {}", e)))?;
        let content_type = document.content_type.as_deref();
        let page = parse_document(&document.body, content_type, &base);

        let words: Vec<&str> = page.text.split_whitespace().collect();
        let excerpt = words
            .iter()
            .take(EXCERPT_WORDS)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let format = match DocumentFormat::detect(content_type, &base) {
            DocumentFormat::Html => "html",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Text => "text",
        };

        Ok(json!({
            "url": document.identity,
            "format": format,
            "title": page.title,
            "excerpt": excerpt,
            "word_count": words.len(),
            "link_count": page.links.len(),
            "content_hash": content_fingerprint(&document.body),
        }))
    }
}

#[async_trait]
impl Analyzer for SummaryAnalyzer {
    async fn analyze(&self, documents: &[Document]) -> Result<Vec<ItemResult>, JobFailure> {
        let total: usize = documents.iter().map(|d| d.body.len()).sum();
        if total > self.max_batch_bytes {
            return Err(JobFailure::resource(format!(
                "batch of {} document(s) is {} bytes, limit is {}",
                documents.len(),
                total,
                self.max_batch_bytes
            )));
        }

        Ok(documents.iter().map(|d| self.summarize(d)).collect())
    }
}
