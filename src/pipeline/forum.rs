// src/pipeline/forum.rs

//! Full-forum crawl composition.
//!
//! Resolves the topic list, then streams every topic's posts into one
//! archive document. Per-topic failures are recorded and the run keeps
//! going; only persistence failures, a run-level failure streak or an
//! interrupt end it early. The result is always a report over whatever was
//! gathered, never an all-or-nothing outcome.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::CrawlReport;
use crate::pipeline::Crawler;
use crate::storage::ForumSink;
use crate::utils::delay::sleep_with_jitter;

/// Crawl an entire forum into the given sink.
pub async fn run_forum_crawl(
    crawler: &mut Crawler,
    storage: &dyn ForumSink,
    forum_url: &str,
) -> Result<CrawlReport> {
    let started_at = Utc::now();
    log::info!("starting full crawl of {forum_url}");

    let topics = crawler.crawl_listing(forum_url).await?;
    if topics.is_empty() {
        log::error!("no topics found at {forum_url}");
        return Ok(failed_report(
            forum_url,
            "no topics found",
            started_at,
            crawler,
        ));
    }
    log::info!("found {} topics", topics.len());

    let forum_title = crawler.forum_title(forum_url).await;
    log::info!("forum: {forum_title}");

    let mut document = storage.create_document(&forum_title, forum_url).await?;

    let threshold = crawler.config().crawler.max_consecutive_failures;
    let topic_delay = Duration::from_millis(crawler.config().crawler.topic_delay_ms);
    let total = topics.len();

    let mut processed = 0usize;
    let mut total_posts = 0usize;
    let mut failed_topics: Vec<String> = Vec::new();
    let mut failure_streak = 0u32;
    let mut breaker_tripped = false;

    for (i, (topic_title, topic_url)) in topics.iter().enumerate() {
        if crawler.is_interrupted() {
            log::info!("interrupted, stopping after {i} of {total} topics");
            break;
        }
        log::info!("topic {}/{}: {}", i + 1, total, topic_title);

        storage
            .append_section(&mut document, topic_title, topic_url)
            .await?;

        // Probing the page count also warms the cache for the first page.
        let total_pages = crawler.topic_total_pages(topic_url).await;

        match crawler
            .crawl_topic_streaming(topic_url, storage, &mut document, Some(total_pages))
            .await
        {
            Ok(count) if count > 0 => {
                processed += 1;
                total_posts += count;
                failure_streak = 0;
                log::info!("topic done: {count} posts");
            }
            Ok(_) => {
                log::warn!("topic skipped, no posts found: {topic_title}");
                failed_topics.push(topic_title.clone());
            }
            // Losing extracted content silently would be worse than stopping.
            Err(e @ AppError::Persistence { .. }) => return Err(e),
            Err(e) => {
                log::error!("topic failed: {e}");
                failed_topics.push(topic_title.clone());
                failure_streak += 1;
                if failure_streak >= threshold {
                    log::error!("{failure_streak} consecutive topic failures, aborting run");
                    breaker_tripped = true;
                    break;
                }
            }
        }

        sleep_with_jitter(topic_delay).await;
    }

    let interrupted = crawler.is_interrupted();
    let error_message = if interrupted {
        "interrupted by user".to_string()
    } else if breaker_tripped {
        "circuit breaker tripped".to_string()
    } else {
        String::new()
    };

    let report = CrawlReport {
        forum_title,
        forum_url: forum_url.to_string(),
        total_topics: processed,
        total_posts,
        failed_topics,
        document_path: document.path().display().to_string(),
        success: error_message.is_empty(),
        error_message,
        started_at,
        finished_at: Utc::now(),
        cached_hits: crawler.metrics().snapshot().cached,
    };
    storage.write_report(&report).await?;

    log::info!(
        "crawl finished: {}/{} topics, {} posts in {:.2}s, archive at {}",
        report.total_topics,
        total,
        report.total_posts,
        report.processing_secs(),
        report.document_path
    );
    Ok(report)
}

fn failed_report(
    forum_url: &str,
    message: &str,
    started_at: DateTime<Utc>,
    crawler: &Crawler,
) -> CrawlReport {
    CrawlReport {
        forum_title: String::new(),
        forum_url: forum_url.to_string(),
        total_topics: 0,
        total_posts: 0,
        failed_topics: Vec::new(),
        document_path: String::new(),
        success: false,
        error_message: message.to_string(),
        started_at,
        finished_at: Utc::now(),
        cached_hits: crawler.metrics().snapshot().cached,
    }
}
