//! Post and run-report data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single forum post, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    /// Post author display name
    pub author: String,

    /// Post date as shown on the page (site-local text)
    pub date: String,

    /// Raw post body markup
    pub content_html: String,

    /// Post body converted to markdown
    pub content_markdown: String,

    /// Permalink to the individual post
    pub post_url: String,
}

/// Summary of a full-forum crawl run.
///
/// A run that hit its failure threshold or was interrupted still produces a
/// report with whatever was gathered; `success` distinguishes the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    /// Forum title as extracted from the entry page
    pub forum_title: String,

    /// Entry URL of the crawl
    pub forum_url: String,

    /// Topics that yielded at least one post
    pub total_topics: usize,

    /// Posts written to the archive
    pub total_posts: usize,

    /// Titles of topics that yielded nothing or failed
    pub failed_topics: Vec<String>,

    /// Path of the archive document, empty when none was created
    pub document_path: String,

    /// Whether the run completed without tripping a breaker or interrupt
    pub success: bool,

    /// Failure description for unsuccessful runs
    #[serde(default)]
    pub error_message: String,

    /// Run start time
    pub started_at: DateTime<Utc>,

    /// Run end time
    pub finished_at: DateTime<Utc>,

    /// Requests served from the page cache
    pub cached_hits: u64,
}

impl CrawlReport {
    /// Wall-clock duration of the run in seconds.
    pub fn processing_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
