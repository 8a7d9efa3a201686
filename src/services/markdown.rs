//! HTML to markdown conversion for post bodies.
//!
//! Pure text mapping: ad containers and scripts are stripped, the remainder
//! goes through `html2md`, and the result is tidied up. Conversions are
//! memoized by content hash since quoted post bodies repeat a lot.

use std::time::Duration;

use regex::Regex;

use crate::cache::TtlCache;
use crate::error::{AppError, Result};
use crate::utils::hash::sha256_hex;

const CACHE_SIZE: usize = 500;
const CACHE_TTL: Duration = Duration::from_secs(600);

/// HTML → markdown converter with memoization.
pub struct MarkdownConverter {
    cache: Option<TtlCache<String, String>>,
    strip_patterns: Vec<Regex>,
    cleanup: Vec<(Regex, &'static str)>,
}

impl MarkdownConverter {
    pub fn new(use_cache: bool) -> Result<Self> {
        Ok(Self {
            cache: use_cache.then(|| TtlCache::new(CACHE_SIZE, CACHE_TTL)),
            strip_patterns: vec![
                parse_regex(r"(?is)<script\b[^>]*>.*?</script>")?,
                parse_regex(r#"(?is)<div[^>]+id="ads-\d+"[^>]*>.*?</div>"#)?,
            ],
            cleanup: vec![
                // Collapse runs of blank lines left by block elements.
                (parse_regex(r"\n{3,}")?, "\n\n"),
                (parse_regex(r"\\-")?, "-"),
                // Flatten titled links down to their text.
                (parse_regex(r#"\[([^\]]+)\]\([^)]+\s+"[^"]*"\)"#)?, "($1)"),
            ],
        })
    }

    /// Convert a post body to markdown.
    pub fn convert(&self, html: &str) -> String {
        match &self.cache {
            Some(cache) => {
                let key = sha256_hex(html);
                if let Some(hit) = cache.get(&key) {
                    return hit;
                }
                let converted = self.convert_uncached(html);
                cache.put(key, converted.clone());
                converted
            }
            None => self.convert_uncached(html),
        }
    }

    fn convert_uncached(&self, html: &str) -> String {
        let mut cleaned = html.to_string();
        for pattern in &self.strip_patterns {
            cleaned = pattern.replace_all(&cleaned, "").to_string();
        }

        let mut markdown = html2md::parse_html(&cleaned);
        for (pattern, replacement) in &self.cleanup {
            markdown = pattern.replace_all(&markdown, *replacement).to_string();
        }
        markdown.trim().to_string()
    }
}

fn parse_regex(s: &str) -> Result<Regex> {
    Regex::new(s).map_err(|e| AppError::config(format!("bad pattern '{s}': {e}")))
}
