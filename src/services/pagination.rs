//! Pagination resolver.
//!
//! Finds the next page of a forum listing or a topic from the current page's
//! pagination control. Resolution tries an explicit "next" link first, then
//! falls back to the page-index indicator ("Страница X из Y") or the `start=`
//! offset parameter. Returned URLs are always absolute.
//!
//! A result is matched structurally (link text + endpoint marker) and not
//! cross-checked against the origin beyond that, so the caller must still
//! guard against pagination cycles.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::utils::resolve_url;

/// Pagination controls rarely hold more links than this.
const ANCHOR_SCAN_LIMIT: usize = 20;

/// "Page X of Y" indicator as rendered by the target forum.
const PAGE_OF_PATTERN: &str = r"Страница\s*(\d+)\s*из\s*(\d+)";

/// Next-page link vocabulary, checked case-insensitively.
const NEXT_WORDS: [&str; 3] = ["next", "следующая", "далее"];

/// Resolves page-to-page links for listings and topics.
pub struct Paginator {
    base_url: Url,
    listing_marker: String,
    topic_marker: String,
    topics_per_page: u32,
    posts_per_page: u32,
    pagination: Selector,
    anchor: Selector,
    page_of: Regex,
}

impl Paginator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.site.base_url)?,
            listing_marker: config.site.listing_marker.clone(),
            topic_marker: config.site.topic_marker.clone(),
            topics_per_page: config.crawler.topics_per_page.max(1),
            posts_per_page: config.crawler.posts_per_page.max(1),
            pagination: parse_selector("div.pagination")?,
            anchor: parse_selector("a[href]")?,
            page_of: Regex::new(PAGE_OF_PATTERN)
                .map_err(|e| AppError::config(format!("bad page indicator pattern: {e}")))?,
        })
    }

    /// URL of the next listing page, absent when pagination is exhausted.
    pub fn next_listing_page(&self, doc: &Html, current_url: &str) -> Option<String> {
        self.next_page(doc, current_url, &self.listing_marker, self.topics_per_page)
    }

    /// URL of the next page of a topic, absent when pagination is exhausted.
    pub fn next_topic_page(&self, doc: &Html, current_url: &str) -> Option<String> {
        self.next_page(doc, current_url, &self.topic_marker, self.posts_per_page)
    }

    /// Total number of pages in a topic, defaulting to 1.
    pub fn total_topic_pages(&self, doc: &Html) -> u32 {
        let Some(block) = doc.select(&self.pagination).next() else {
            return 1;
        };

        let text: String = block.text().collect();
        if let Some(caps) = self.page_of.captures(&text) {
            if let Ok(total) = caps[2].parse() {
                return total;
            }
        }

        self.max_numeric_link(doc).unwrap_or(1).max(1)
    }

    fn next_page(
        &self,
        doc: &Html,
        current_url: &str,
        marker: &str,
        per_page: u32,
    ) -> Option<String> {
        let anchors = self.pagination_anchors(doc);

        // Preferred: an explicit next-page link.
        for (text, href) in &anchors {
            if is_next_label(text) && href.contains(marker) {
                return Some(resolve_url(&self.base_url, href));
            }
        }

        // Fallback: find the link numbered current + 1.
        doc.select(&self.pagination).next()?;
        let (current, total) = self.page_info(doc, current_url, per_page);
        if current >= total {
            return None;
        }

        let target = (current + 1).to_string();
        anchors
            .iter()
            .find(|(text, href)| *text == target && href.contains(marker))
            .map(|(_, href)| resolve_url(&self.base_url, href))
    }

    /// Current page index and total page count.
    ///
    /// Prefers the "page X of Y" indicator; otherwise derives the index from
    /// the `start=` offset and the page size, and the total from the largest
    /// numbered link.
    fn page_info(&self, doc: &Html, current_url: &str, per_page: u32) -> (u32, u32) {
        if let Some(block) = doc.select(&self.pagination).next() {
            let text: String = block.text().collect();
            if let Some(caps) = self.page_of.captures(&text) {
                if let (Ok(current), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
                    return (current, total);
                }
            }
        }

        if let Some(start) = start_offset(current_url) {
            let current = if start > 0 { start / per_page + 1 } else { 1 };
            let total = self.max_numeric_link(doc).unwrap_or(1);
            return (current, total);
        }

        (1, 1)
    }

    /// Anchor (text, href) pairs from the pagination control, or from the
    /// whole document when no control exists.
    fn pagination_anchors(&self, doc: &Html) -> Vec<(String, String)> {
        match doc.select(&self.pagination).next() {
            Some(block) => collect_anchors(block.select(&self.anchor)),
            None => collect_anchors(doc.select(&self.anchor)),
        }
    }

    fn max_numeric_link(&self, doc: &Html) -> Option<u32> {
        let block = doc.select(&self.pagination).next()?;
        block
            .select(&self.anchor)
            .take(ANCHOR_SCAN_LIMIT)
            .filter_map(|a| a.text().collect::<String>().trim().parse::<u32>().ok())
            .max()
    }
}

fn collect_anchors<'a>(iter: impl Iterator<Item = ElementRef<'a>>) -> Vec<(String, String)> {
    iter.take(ANCHOR_SCAN_LIMIT)
        .map(|a| {
            let text = a.text().collect::<String>().trim().to_string();
            let href = a.value().attr("href").unwrap_or("").to_string();
            (text, href)
        })
        .collect()
}

fn is_next_label(text: &str) -> bool {
    let lower = text.to_lowercase();
    text.starts_with("След") || text.contains('»') || NEXT_WORDS.contains(&lower.as_str())
}

/// Value of the `start` pagination offset parameter, if any.
fn start_offset(url: &str) -> Option<u32> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "start")
        .and_then(|(_, value)| value.parse().ok())
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
