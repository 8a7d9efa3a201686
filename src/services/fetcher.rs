//! Resilient page fetcher.
//!
//! Wraps the shared HTTP client with the retry engine, the page cache and
//! request metrics. Failures never escape [`Fetcher::fetch`]: after retries
//! are exhausted (or a fatal failure) the result degrades to `None` and the
//! caller decides whether that ends the traversal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::Html;

use crate::cache::TtlCache;
use crate::error::{AppError, Result};
use crate::models::{Config, RequestMetrics};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::utils::hash::sha256_hex;

/// A fetched page: final URL plus the response body.
///
/// The body is shared so cached copies are cheap; the DOM is parsed on demand
/// and intentionally never stored, keeping the cache `Send` and the parse out
/// of the critical section.
#[derive(Debug, Clone)]
pub struct Page {
    url: String,
    body: Arc<String>,
}

impl Page {
    pub fn new(url: impl Into<String>, body: String) -> Self {
        Self {
            url: url.into(),
            body: Arc::new(body),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the body into a DOM.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// HTTP retrieval layer with retry, caching and metrics.
pub struct Fetcher {
    client: reqwest::Client,
    cache: Option<TtlCache<String, Page>>,
    policy: RetryPolicy,
    metrics: Arc<RequestMetrics>,
}

impl Fetcher {
    /// Build a fetcher with a shared connection pool per the configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.crawler.user_agent)
            .timeout(Duration::from_secs(config.crawler.timeout_secs))
            .build()?;

        let cache = config.cache.enabled.then(|| {
            TtlCache::new(
                config.cache.max_size,
                Duration::from_secs(config.cache.ttl_secs),
            )
        });

        Ok(Self {
            client,
            cache,
            policy: RetryPolicy::from_config(&config.retry),
            metrics: Arc::new(RequestMetrics::new()),
        })
    }

    /// Shared handle to the request counters.
    pub fn metrics(&self) -> Arc<RequestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drop all cached pages.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Fetch a page, consulting the cache first.
    pub async fn fetch(&self, url: &str) -> Option<Page> {
        self.fetch_with(url, true).await
    }

    /// Fetch a page, optionally bypassing the cache.
    pub async fn fetch_with(&self, url: &str, use_cache: bool) -> Option<Page> {
        let started = Instant::now();
        let key = sha256_hex(url);

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(page) = cache.get(&key) {
                    log::debug!("cache hit for {url}");
                    self.metrics.record_cached(started.elapsed());
                    return Some(page);
                }
            }
        }

        match run_with_retry(&self.policy, &self.metrics, || self.request(url)).await {
            Ok(page) => {
                if use_cache {
                    if let Some(cache) = &self.cache {
                        cache.put(key, page.clone());
                    }
                }
                self.metrics.record_success(started.elapsed());
                Some(page)
            }
            Err(e) => {
                log::error!("failed to fetch {url}: {e}");
                self.metrics.record_failure(started.elapsed());
                None
            }
        }
    }

    /// One raw transport attempt: request, classify the status, read the body.
    async fn request(&self, url: &str) -> Result<Page> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok(Page::new(final_url, body))
    }
}
