// src/pipeline/traverse.rs

//! Page-by-page traversal state machine.
//!
//! One `Crawler` drives every traversal of a run: listing pages to collect
//! topic links, topic pages to collect or stream posts. Each traversal owns a
//! [`CrawlCursor`] and moves strictly forward: a page is fully processed
//! before the cursor advances, the cursor never advances to the URL it is
//! already on (cycle guard), and a run of failed pages trips the circuit
//! breaker instead of hammering the origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Config, Post, RequestMetrics};
use crate::services::{Extractor, Fetcher, MarkdownConverter, Page, Paginator, RawPost};
use crate::storage::{DocumentHandle, ForumSink};
use crate::utils::delay::{adaptive_delay, sleep_with_jitter};

/// Failed pages logged individually before going quiet.
const MAX_LOGGED_PAGE_FAILURES: usize = 3;

/// Which pagination endpoint a traversal follows.
#[derive(Debug, Clone, Copy)]
enum PageKind {
    Listing,
    Topic,
}

/// Mutable state of one traversal.
#[derive(Debug)]
pub struct CrawlCursor {
    /// URL of the page being processed
    pub current_url: String,
    /// 1-based index of the page being processed
    pub page_index: u32,
    /// Failed pages since the last page that yielded records
    pub consecutive_failures: u32,
    /// Pages in a row that yielded records
    pub clean_streak: u32,
    /// Page indices that yielded nothing, in traversal order
    pub failed_pages: Vec<u32>,
}

impl CrawlCursor {
    fn new(url: &str) -> Self {
        Self {
            current_url: url.to_string(),
            page_index: 0,
            consecutive_failures: 0,
            clean_streak: 0,
            failed_pages: Vec::new(),
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.clean_streak = 0;
        self.failed_pages.push(self.page_index);
    }

    /// The current page yielded at least one record.
    fn record_records(&mut self) {
        self.consecutive_failures = 0;
        self.clean_streak += 1;
    }

    fn breaker_tripped(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}

/// Where extracted posts go during a topic traversal.
enum TopicSink<'a> {
    /// Accumulate in memory and hand back to the caller.
    Collect(&'a mut Vec<Post>),
    /// Append to the persistence sink as each post is produced.
    Stream {
        storage: &'a dyn ForumSink,
        document: &'a mut DocumentHandle,
    },
}

/// Crawl orchestrator: drives traversals and owns the shared services.
pub struct Crawler {
    config: Arc<Config>,
    fetcher: Fetcher,
    paginator: Paginator,
    extractor: Extractor,
    converter: MarkdownConverter,
    interrupted: Arc<AtomicBool>,
    total_failures: u64,
}

impl Crawler {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        Self::with_interrupt(config, Arc::new(AtomicBool::new(false)))
    }

    /// Build a crawler observing an externally owned interrupt flag.
    pub fn with_interrupt(config: Arc<Config>, interrupted: Arc<AtomicBool>) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(&config)?,
            paginator: Paginator::new(&config)?,
            extractor: Extractor::new(&config)?,
            converter: MarkdownConverter::new(config.cache.enabled)?,
            interrupted,
            total_failures: 0,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Arc<RequestMetrics> {
        self.fetcher.metrics()
    }

    pub fn clear_cache(&self) {
        self.fetcher.clear_cache();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Page failures across every traversal of this crawler's lifetime.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Walk a forum listing and collect topic title → topic URL.
    ///
    /// Duplicate titles overwrite. Terminal conditions: pagination exhausted,
    /// cycle detected, page cap reached, circuit breaker tripped, or
    /// interrupt. Whatever was collected up to that point is returned.
    pub async fn crawl_listing(&mut self, forum_url: &str) -> Result<HashMap<String, String>> {
        if !self.config.site.is_listing_url(forum_url) {
            return Err(AppError::validation(format!(
                "not a forum listing URL: {forum_url}"
            )));
        }

        let mut topics = HashMap::new();
        let mut cursor = CrawlCursor::new(forum_url);
        let mut stale: Option<Page> = None;
        let threshold = self.config.crawler.max_consecutive_failures;

        log::debug!("starting listing traversal at {forum_url}");

        while cursor.page_index < self.config.crawler.max_pages && !self.is_interrupted() {
            cursor.page_index += 1;

            let Some(page) = self.fetcher.fetch(&cursor.current_url).await else {
                self.record_page_failure(&mut cursor);
                if cursor.breaker_tripped(threshold) {
                    log::error!(
                        "{} consecutive page failures, aborting traversal",
                        cursor.consecutive_failures
                    );
                    break;
                }
                match self.next_from_stale(stale.as_ref(), &cursor.current_url, PageKind::Listing)
                {
                    Some(next) if next != cursor.current_url => {
                        cursor.current_url = next;
                        continue;
                    }
                    _ => break,
                }
            };

            let next = {
                let doc = page.document();
                let found = self.extractor.extract_topics(&doc);
                log::debug!("page {}: {} topics", cursor.page_index, found.len());
                if found.is_empty() {
                    log::warn!("no topics found on page {}", cursor.page_index);
                } else {
                    topics.extend(found);
                    cursor.record_records();
                }
                self.paginator.next_listing_page(&doc, &cursor.current_url)
            };
            stale = Some(page);

            if !self.advance(&mut cursor, next).await {
                break;
            }
        }

        self.log_traversal_end("listing", &cursor);
        log::debug!(
            "listing traversal done: {} pages, {} topics",
            cursor.page_index,
            topics.len()
        );
        Ok(topics)
    }

    /// Walk a topic and collect its posts in memory.
    pub async fn crawl_topic(&mut self, topic_url: &str) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        self.walk_topic(topic_url, None, &mut TopicSink::Collect(&mut posts))
            .await?;
        Ok(posts)
    }

    /// Walk a topic, appending each post to the sink as it is extracted.
    ///
    /// Returns only the post count; peak memory stays proportional to one
    /// page's worth of records.
    pub async fn crawl_topic_streaming(
        &mut self,
        topic_url: &str,
        storage: &dyn ForumSink,
        document: &mut DocumentHandle,
        total_pages: Option<u32>,
    ) -> Result<usize> {
        self.walk_topic(topic_url, total_pages, &mut TopicSink::Stream { storage, document })
            .await
    }

    /// Probe the first page of a topic for its total page count.
    pub async fn topic_total_pages(&self, topic_url: &str) -> u32 {
        match self.fetcher.fetch(topic_url).await {
            Some(page) => self.paginator.total_topic_pages(&page.document()).max(1),
            None => 1,
        }
    }

    /// Extract the forum title from its entry page.
    pub async fn forum_title(&self, forum_url: &str) -> String {
        match self.fetcher.fetch(forum_url).await {
            Some(page) => self.extractor.forum_title(&page.document()),
            None => "Unknown forum".to_string(),
        }
    }

    async fn walk_topic(
        &mut self,
        topic_url: &str,
        total_pages: Option<u32>,
        sink: &mut TopicSink<'_>,
    ) -> Result<usize> {
        if !self.config.site.is_topic_url(topic_url) {
            return Err(AppError::validation(format!("not a topic URL: {topic_url}")));
        }

        let mut total_posts = 0usize;
        let mut cursor = CrawlCursor::new(topic_url);
        let mut stale: Option<Page> = None;
        let threshold = self.config.crawler.max_consecutive_failures;

        log::debug!("starting topic traversal at {topic_url}");

        while cursor.page_index < self.config.crawler.max_pages && !self.is_interrupted() {
            cursor.page_index += 1;
            if let Some(total) = total_pages.filter(|t| *t > 1) {
                log::debug!("topic page {}/{}", cursor.page_index, total);
            }

            let Some(page) = self.fetcher.fetch(&cursor.current_url).await else {
                self.record_page_failure(&mut cursor);
                if cursor.breaker_tripped(threshold) {
                    log::error!(
                        "{} consecutive page failures, aborting traversal",
                        cursor.consecutive_failures
                    );
                    break;
                }
                match self.next_from_stale(stale.as_ref(), &cursor.current_url, PageKind::Topic) {
                    Some(next) if next != cursor.current_url => {
                        cursor.current_url = next;
                        continue;
                    }
                    _ => break,
                }
            };

            // Parse and resolve before persisting: the DOM must not live
            // across the append awaits.
            let (raw_posts, next) = {
                let doc = page.document();
                (
                    self.extractor.extract_posts(&doc),
                    self.paginator.next_topic_page(&doc, &cursor.current_url),
                )
            };
            stale = Some(page);
            log::debug!("page {}: {} posts", cursor.page_index, raw_posts.len());

            let mut page_posts = 0usize;
            for raw in raw_posts {
                let post = self.build_post(raw);
                match sink {
                    TopicSink::Collect(posts) => posts.push(post),
                    TopicSink::Stream { storage, document } => {
                        storage.append_post(document, &post).await?;
                    }
                }
                page_posts += 1;
                total_posts += 1;
            }
            if page_posts > 0 {
                cursor.record_records();
            }

            if !self.advance(&mut cursor, next).await {
                break;
            }
        }

        self.log_traversal_end("topic", &cursor);
        log::debug!(
            "topic traversal done: {} pages, {} posts",
            cursor.page_index,
            total_posts
        );
        Ok(total_posts)
    }

    /// Move the cursor to `next`, sleeping the adaptive delay.
    ///
    /// Returns false on a terminal condition: exhausted pagination or a
    /// cycle (the resolver handed back the page we are already on).
    async fn advance(&self, cursor: &mut CrawlCursor, next: Option<String>) -> bool {
        match next {
            None => {
                log::debug!("no next page after page {}", cursor.page_index);
                false
            }
            Some(next) if next == cursor.current_url => {
                log::warn!("pagination cycle detected at {next}, stopping traversal");
                false
            }
            Some(next) => {
                cursor.current_url = next;
                let delay = adaptive_delay(
                    Duration::from_millis(self.config.crawler.request_delay_ms),
                    Duration::from_millis(self.config.crawler.min_delay_ms),
                    cursor.consecutive_failures,
                    cursor.clean_streak,
                );
                sleep_with_jitter(delay).await;
                true
            }
        }
    }

    fn build_post(&self, raw: RawPost) -> Post {
        let content_markdown = self.converter.convert(&raw.content_html);
        Post {
            author: raw.author,
            date: raw.date,
            content_html: raw.content_html,
            content_markdown,
            post_url: raw.post_url,
        }
    }

    fn record_page_failure(&mut self, cursor: &mut CrawlCursor) {
        cursor.record_failure();
        self.total_failures += 1;
        if cursor.failed_pages.len() <= MAX_LOGGED_PAGE_FAILURES {
            log::warn!(
                "page {} failed at {}",
                cursor.page_index,
                cursor.current_url
            );
        }
    }

    /// Try to recover a next-page URL from the last successfully fetched
    /// page when the current one could not be fetched at all.
    fn next_from_stale(
        &self,
        stale: Option<&Page>,
        current_url: &str,
        kind: PageKind,
    ) -> Option<String> {
        let page = stale?;
        let doc = page.document();
        match kind {
            PageKind::Listing => self.paginator.next_listing_page(&doc, current_url),
            PageKind::Topic => self.paginator.next_topic_page(&doc, current_url),
        }
    }

    fn log_traversal_end(&self, kind: &str, cursor: &CrawlCursor) {
        if !cursor.failed_pages.is_empty() {
            log::warn!(
                "{kind} traversal finished with {} failed pages: {:?}",
                cursor.failed_pages.len(),
                cursor.failed_pages
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler() -> Crawler {
        Crawler::new(Arc::new(Config::default())).unwrap()
    }

    #[test]
    fn test_cursor_failure_bookkeeping() {
        let mut cursor = CrawlCursor::new("https://forum.awd.ru/viewforum.php?f=1");
        cursor.page_index = 1;
        cursor.record_failure();
        cursor.page_index = 2;
        cursor.record_failure();

        assert_eq!(cursor.consecutive_failures, 2);
        assert_eq!(cursor.failed_pages, vec![1, 2]);
        assert!(cursor.breaker_tripped(2));
        assert!(!cursor.breaker_tripped(3));
    }

    #[test]
    fn test_cursor_records_reset_failures_only() {
        let mut cursor = CrawlCursor::new("https://forum.awd.ru/viewforum.php?f=1");
        cursor.page_index = 1;
        cursor.record_failure();
        cursor.record_records();

        assert_eq!(cursor.consecutive_failures, 0);
        assert_eq!(cursor.clean_streak, 1);
        // Failure history survives for end-of-run bookkeeping.
        assert_eq!(cursor.failed_pages, vec![1]);
    }

    #[tokio::test]
    async fn test_listing_rejects_bad_entry_url() {
        let mut crawler = crawler();
        let result = crawler
            .crawl_listing("https://forum.awd.ru/viewtopic.php?t=1")
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        // Fail-fast: no request was attempted.
        assert_eq!(crawler.metrics().snapshot().total, 0);
    }

    #[tokio::test]
    async fn test_topic_rejects_bad_entry_url() {
        let mut crawler = crawler();
        let result = crawler.crawl_topic("https://elsewhere.example.com/x").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_interrupted_crawler_does_not_fetch() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut crawler =
            Crawler::with_interrupt(Arc::new(Config::default()), Arc::clone(&flag)).unwrap();

        let topics = crawler
            .crawl_listing("https://forum.awd.ru/viewforum.php?f=1190")
            .await
            .unwrap();
        assert!(topics.is_empty());
        assert_eq!(crawler.metrics().snapshot().total, 0);
    }
}
