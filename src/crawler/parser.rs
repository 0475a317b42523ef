//! Link extraction for fetched documents
//!
//! HTML is parsed with `scraper`; markdown links (`[text](url)`) are matched
//! with a regex. Every link is resolved against the page URL and normalized,
//! so the frontier compares links by document identity.

use crate::url::resolve_and_normalize;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// A link found on a page
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Normalized absolute URL
    pub url: String,

    /// Anchor text, used by scorers
    pub text: String,
}

/// Extracted information from a fetched document
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub title: Option<String>,
    pub links: Vec<Link>,
    /// Visible text, whitespace-collapsed
    pub text: String,
}

/// Broad document format, decided from the content type and URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Html,
    Markdown,
    Text,
}

impl DocumentFormat {
    pub fn detect(content_type: Option<&str>, url: &Url) -> Self {
        let content_type = content_type.unwrap_or("").to_ascii_lowercase();
        let path = url.path().to_ascii_lowercase();

        if content_type.contains("html") {
            Self::Html
        } else if content_type.contains("markdown")
            || path.ends_with(".md")
            || path.ends_with(".markdown")
        {
            Self::Markdown
        } else if content_type.is_empty() && (path.ends_with(".html") || path.ends_with('/')) {
            Self::Html
        } else {
            Self::Text
        }
    }
}

/// Parses a document body and extracts its title, text and links
pub fn parse_document(body: &[u8], content_type: Option<&str>, base_url: &Url) -> ParsedPage {
    let content = String::from_utf8_lossy(body);

    match DocumentFormat::detect(content_type, base_url) {
        DocumentFormat::Html => parse_html(&content, base_url),
        DocumentFormat::Markdown => parse_markdown(&content, base_url),
        DocumentFormat::Text => ParsedPage {
            title: None,
            links: Vec::new(),
            text: collapse_whitespace(&content),
        },
    }
}

/// Parses HTML content
///
/// `<a href>` links and the canonical link are kept; `download` anchors,
/// `javascript:`, `mailto:`, `tel:` and `data:` links and same-page fragments
/// are skipped.
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let mut links = LinkSet::new(base_url);

    if let Ok(anchors) = Selector::parse("a[href]") {
        for element in document.select(&anchors) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                let text = collapse_whitespace(&element.text().collect::<String>());
                links.push(href, text);
            }
        }
    }

    if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical) {
            if let Some(href) = element.value().attr("href") {
                links.push(href, String::new());
            }
        }
    }

    let text = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .map(|body| collapse_whitespace(&body.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default();

    ParsedPage {
        title: extract_title(&document),
        links: links.into_links(),
        text,
    }
}

/// Parses markdown content
///
/// The title is the first level-one heading.
pub fn parse_markdown(markdown: &str, base_url: &Url) -> ParsedPage {
    let mut links = LinkSet::new(base_url);

    if let Some(pattern) = markdown_link_pattern() {
        for captures in pattern.captures_iter(markdown) {
            let text = captures.get(1).map_or("", |m| m.as_str());
            if let Some(href) = captures.get(2) {
                links.push(href.as_str(), text.to_string());
            }
        }
    }

    let title = markdown
        .lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty());

    ParsedPage {
        title,
        links: links.into_links(),
        text: collapse_whitespace(markdown),
    }
}

fn markdown_link_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"!?\[([^\]]*)\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).ok())
        .as_ref()
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered, de-duplicated links of one page
struct LinkSet<'a> {
    base_url: &'a Url,
    seen: HashSet<String>,
    links: Vec<Link>,
}

impl<'a> LinkSet<'a> {
    fn new(base_url: &'a Url) -> Self {
        Self {
            base_url,
            seen: HashSet::new(),
            links: Vec::new(),
        }
    }

    fn push(&mut self, href: &str, text: String) {
        let href = href.trim();

        if href.is_empty()
            || href.starts_with('#')
            || ["javascript:", "mailto:", "tel:", "data:"]
                .iter()
                .any(|scheme| href.starts_with(scheme))
        {
            return;
        }

        let Ok(url) = resolve_and_normalize(href, self.base_url) else {
            return;
        };
        let url = url.to_string();

        if self.seen.insert(url.clone()) {
            self.links.push(Link { url, text });
        } else if let Some(existing) = self.links.iter_mut().find(|l| l.url == url) {
            if existing.text.is_empty() {
                existing.text = text;
            }
        }
    }

    fn into_links(self) -> Vec<Link> {
        self.links
    }
}
