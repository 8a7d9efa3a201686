//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::retry::BackoffStrategy;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Target site endpoints and URL shape
    #[serde(default)]
    pub site: SiteConfig,

    /// HTTP and traversal behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Retry policy for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// In-memory page cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Output file settings
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_pages == 0 {
            return Err(AppError::validation("crawler.max_pages must be > 0"));
        }
        if self.crawler.topics_per_page == 0 || self.crawler.posts_per_page == 0 {
            return Err(AppError::validation("page sizes must be > 0"));
        }
        if self.crawler.max_consecutive_failures == 0 {
            return Err(AppError::validation(
                "crawler.max_consecutive_failures must be > 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be >= 1"));
        }
        if self.cache.max_size == 0 {
            return Err(AppError::validation("cache.max_size must be > 0"));
        }
        url::Url::parse(&self.site.base_url)
            .map_err(|e| AppError::validation(format!("site.base_url is invalid: {e}")))?;
        Ok(())
    }
}

/// Target site endpoints and URL shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base URL all relative links resolve against (trailing slash expected)
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Domain a crawlable URL must contain
    #[serde(default = "defaults::domain")]
    pub domain: String,

    /// Endpoint marker for forum listing pages
    #[serde(default = "defaults::listing_marker")]
    pub listing_marker: String,

    /// Endpoint marker for topic pages
    #[serde(default = "defaults::topic_marker")]
    pub topic_marker: String,
}

impl SiteConfig {
    /// Whether a URL is a valid forum listing entry point.
    pub fn is_listing_url(&self, url: &str) -> bool {
        url.starts_with("http") && url.contains(&self.domain) && url.contains(&self.listing_marker)
    }

    /// Whether a URL is a valid topic entry point.
    pub fn is_topic_url(&self, url: &str) -> bool {
        url.starts_with("http") && url.contains(&self.domain) && url.contains(&self.topic_marker)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            domain: defaults::domain(),
            listing_marker: defaults::listing_marker(),
            topic_marker: defaults::topic_marker(),
        }
    }
}

/// HTTP client and traversal behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Hard upper bound on pages per traversal
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Topics shown per listing page (pagination offset step)
    #[serde(default = "defaults::topics_per_page")]
    pub topics_per_page: u32,

    /// Posts shown per topic page (pagination offset step)
    #[serde(default = "defaults::posts_per_page")]
    pub posts_per_page: u32,

    /// Base delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Delay between topics during a full-forum crawl in milliseconds
    #[serde(default = "defaults::topic_delay")]
    pub topic_delay_ms: u64,

    /// Floor for the adaptive inter-request delay in milliseconds
    #[serde(default = "defaults::min_delay")]
    pub min_delay_ms: u64,

    /// Consecutive page failures before a traversal is aborted
    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_pages: defaults::max_pages(),
            topics_per_page: defaults::topics_per_page(),
            posts_per_page: defaults::posts_per_page(),
            request_delay_ms: defaults::request_delay(),
            topic_delay_ms: defaults::topic_delay(),
            min_delay_ms: defaults::min_delay(),
            max_consecutive_failures: defaults::max_consecutive_failures(),
        }
    }
}

/// Retry policy settings for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Backoff strategy between attempts
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Base backoff delay in milliseconds
    #[serde(default = "defaults::retry_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on the backoff delay in milliseconds
    #[serde(default = "defaults::retry_max_delay")]
    pub max_delay_ms: u64,

    /// Randomize delays by up to ±10%
    #[serde(default = "defaults::jitter")]
    pub jitter: bool,

    /// Multiplier for the exponential strategy
    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            strategy: BackoffStrategy::default(),
            base_delay_ms: defaults::retry_base_delay(),
            max_delay_ms: defaults::retry_max_delay(),
            jitter: defaults::jitter(),
            backoff_factor: defaults::backoff_factor(),
        }
    }
}

/// In-memory page cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether fetched pages are cached at all
    #[serde(default = "defaults::cache_enabled")]
    pub enabled: bool,

    /// Maximum number of cached entries
    #[serde(default = "defaults::cache_max_size")]
    pub max_size: usize,

    /// Default time-to-live per entry in seconds
    #[serde(default = "defaults::cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::cache_enabled(),
            max_size: defaults::cache_max_size(),
            ttl_secs: defaults::cache_ttl(),
        }
    }
}

/// Output file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for full-forum archives
    #[serde(default = "defaults::output_dir")]
    pub dir: String,

    /// Directory for single-topic archives
    #[serde(default = "defaults::topics_dir")]
    pub topics_dir: String,

    /// Maximum filename length in graphemes
    #[serde(default = "defaults::max_filename_len")]
    pub max_filename_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: defaults::output_dir(),
            topics_dir: defaults::topics_dir(),
            max_filename_len: defaults::max_filename_len(),
        }
    }
}

mod defaults {
    // Site defaults
    pub fn base_url() -> String {
        "https://forum.awd.ru/".into()
    }
    pub fn domain() -> String {
        "forum.awd.ru".into()
    }
    pub fn listing_marker() -> String {
        "viewforum.php".into()
    }
    pub fn topic_marker() -> String {
        "viewtopic.php".into()
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn max_pages() -> u32 {
        50
    }
    pub fn topics_per_page() -> u32 {
        131
    }
    pub fn posts_per_page() -> u32 {
        15
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn topic_delay() -> u64 {
        2000
    }
    pub fn min_delay() -> u64 {
        500
    }
    pub fn max_consecutive_failures() -> u32 {
        5
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn retry_base_delay() -> u64 {
        1000
    }
    pub fn retry_max_delay() -> u64 {
        30_000
    }
    pub fn jitter() -> bool {
        true
    }
    pub fn backoff_factor() -> f64 {
        2.0
    }

    // Cache defaults
    pub fn cache_enabled() -> bool {
        true
    }
    pub fn cache_max_size() -> usize {
        1000
    }
    pub fn cache_ttl() -> u64 {
        300
    }

    // Output defaults
    pub fn output_dir() -> String {
        "parsed_forums".into()
    }
    pub fn topics_dir() -> String {
        "parsed_topics".into()
    }
    pub fn max_filename_len() -> usize {
        100
    }
}
