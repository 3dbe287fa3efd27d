//! Link and title discovery
//!
//! The engine only needs two things from a page: its title and the links it
//! points to. Anything richer belongs to downstream processors, so extraction
//! sits behind the [`LinkExtractor`] trait.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// What the engine learns from one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// The page title (from the `<title>` tag)
    pub title: Option<String>,

    /// Absolute http(s) links, in document order, without duplicates
    pub links: Vec<String>,
}

/// Extracts a title and outbound links from a fetched document
pub trait LinkExtractor: Send + Sync {
    /// # Arguments
    ///
    /// * `html` - The document body
    /// * `base_url` - The URL the body was served from (after redirects)
    fn extract(&self, html: &str, base_url: &Url) -> ParsedPage;
}

/// [`LinkExtractor`] backed by `scraper`
///
/// Follows `<a href>` and `<link rel="canonical">`, honours `<base href>`,
/// and skips `download` anchors, fragment-only hrefs and non-navigable
/// schemes (`javascript:`, `mailto:`, `tel:`, `data:`). `rel="nofollow"`
/// links are followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLinkExtractor;

impl HtmlLinkExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> ParsedPage {
        let document = Html::parse_document(html);
        let base = document_base(&document, base_url);

        ParsedPage {
            title: extract_title(&document),
            links: extract_links(&document, &base),
        }
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Applies a `<base href>` if the document declares one
fn document_base(document: &Html, served_from: &Url) -> Url {
    selector("base[href]")
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| served_from.join(href.trim()).ok())
        })
        .unwrap_or_else(|| served_from.clone())
}

fn extract_title(document: &Html) -> Option<String> {
    let sel = selector("title")?;

    document
        .select(&sel)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, base) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    if let Some(sel) = selector("a[href]") {
        for element in document.select(&sel) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Some(sel) = selector("link[rel='canonical'][href]") {
        for element in document.select(&sel) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Resolves an href against the base, keeping only http(s) targets
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}
