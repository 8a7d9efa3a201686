//! Content extraction from forum pages.
//!
//! Maps page markup to topic links and post records. Extraction is
//! best-effort at the record level: a malformed link or post block is
//! skipped (only the first few are logged) so one broken row never costs the
//! page's remaining records.

use std::collections::HashMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::utils::resolve_url;

/// Per-page cap on individually logged record failures.
const MAX_LOGGED_SKIPS: usize = 3;

/// Consecutive post failures that abort a page's extraction.
const MAX_CONSECUTIVE_POST_FAILURES: u32 = 5;

/// Headings that belong to list controls, not the forum name.
const SKIP_HEADINGS: [&str; 2] = ["сортировать по", "темы"];

const FALLBACK_TITLE: &str = "Unknown forum";
const DATE_UNKNOWN: &str = "unknown";

/// A post as extracted from the page, before markdown conversion.
#[derive(Debug, Clone)]
pub struct RawPost {
    pub author: String,
    pub date: String,
    pub content_html: String,
    pub post_url: String,
}

/// Markup-to-record mapper for the target forum.
pub struct Extractor {
    base_url: Url,
    domain: String,
    topic_link: Selector,
    post_block: Selector,
    author_block: Selector,
    author_coloured: Selector,
    author_strong: Selector,
    content: Selector,
    heading: Selector,
    navbar: Selector,
    anchor: Selector,
    page_title: Selector,
    onclick_target: Regex,
    date_patterns: Vec<Regex>,
    whitespace: Regex,
}

impl Extractor {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.site.base_url)?,
            domain: config.site.domain.clone(),
            topic_link: parse_selector("a.topictitle")?,
            post_block: parse_selector("div.post")?,
            author_block: parse_selector("p.author")?,
            author_coloured: parse_selector("a.username-coloured")?,
            author_strong: parse_selector("strong a")?,
            content: parse_selector("div.content")?,
            heading: parse_selector("h2")?,
            navbar: parse_selector("div.navbar")?,
            anchor: parse_selector("a[href]")?,
            page_title: parse_selector("title")?,
            onclick_target: parse_regex(r"window\.open\('([^']+)'")?,
            date_patterns: vec![
                parse_regex(r"»\s*(.+?\d{4},\s*\d{2}:\d{2})")?,
                parse_regex(r"»\s*(\d{2}\s+\w+\s+\d{4},\s*\d{2}:\d{2})")?,
                parse_regex(r"»\s*(.+?)\s*$")?,
            ],
            whitespace: parse_regex(r"\s+")?,
        })
    }

    /// Topic title → absolute topic URL for every topic link on a listing
    /// page. Duplicate titles overwrite earlier entries.
    pub fn extract_topics(&self, doc: &Html) -> HashMap<String, String> {
        let mut topics = HashMap::new();
        let mut skipped = 0usize;

        for link in doc.select(&self.topic_link) {
            match self.topic_entry(link) {
                Some((title, url)) => {
                    topics.insert(title, url);
                }
                None => {
                    skipped += 1;
                    if skipped <= MAX_LOGGED_SKIPS {
                        log::debug!("skipping malformed topic link");
                    }
                }
            }
        }

        if skipped > 0 {
            log::warn!("skipped {skipped} malformed topic links");
        }
        topics
    }

    fn topic_entry(&self, link: ElementRef) -> Option<(String, String)> {
        let title = link.text().collect::<String>().trim().to_string();
        let href = link.value().attr("href")?;
        if title.is_empty() || href.is_empty() {
            return None;
        }

        // Off-site hrefs carry the real target in an onclick handler.
        let href = if href.starts_with("http") && !href.contains(&self.domain) {
            self.onclick_href(link)?
        } else {
            href.to_string()
        };

        Some((title, resolve_url(&self.base_url, &href)))
    }

    fn onclick_href(&self, link: ElementRef) -> Option<String> {
        let onclick = link.value().attr("onclick")?;
        let captured = self.onclick_target.captures(onclick)?.get(1)?.as_str();
        let href = captured.replace("&amp;", "&");
        Some(href.trim_start_matches("./").to_string())
    }

    /// All post records on a topic page, in document order.
    pub fn extract_posts(&self, doc: &Html) -> Vec<RawPost> {
        let mut posts = Vec::new();
        let mut skipped = 0usize;
        let mut consecutive = 0u32;

        for (i, block) in doc.select(&self.post_block).enumerate() {
            let id = block
                .value()
                .attr("id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("post_{i}"));
            if !id.starts_with('p') && !id.contains("post_") {
                continue;
            }

            match self.post_entry(block, &id) {
                Some(post) => {
                    posts.push(post);
                    consecutive = 0;
                }
                None => {
                    skipped += 1;
                    consecutive += 1;
                    if skipped <= MAX_LOGGED_SKIPS {
                        log::warn!("failed to extract post {id}");
                    }
                    if consecutive >= MAX_CONSECUTIVE_POST_FAILURES {
                        log::error!(
                            "{consecutive} consecutive post failures, aborting page extraction"
                        );
                        break;
                    }
                }
            }
        }

        if skipped > 0 {
            log::warn!("skipped {skipped} malformed posts");
        }
        posts
    }

    fn post_entry(&self, block: ElementRef, id: &str) -> Option<RawPost> {
        let author_block = block.select(&self.author_block).next()?;
        let author_link = author_block
            .select(&self.author_coloured)
            .next()
            .or_else(|| author_block.select(&self.author_strong).next())?;

        let author = author_link.text().collect::<String>().trim().to_string();
        if author.is_empty() {
            return None;
        }

        let author_text: String = author_block.text().collect();
        let date = self.date_from_text(&author_text);

        let content = block.select(&self.content).next()?;

        Some(RawPost {
            author,
            date,
            content_html: content.html(),
            post_url: self.post_permalink(id),
        })
    }

    fn date_from_text(&self, text: &str) -> String {
        for pattern in &self.date_patterns {
            if let Some(caps) = pattern.captures(text) {
                let date = caps[1].trim();
                if !date.is_empty() {
                    return self.whitespace.replace_all(date, " ").to_string();
                }
            }
        }
        DATE_UNKNOWN.to_string()
    }

    fn post_permalink(&self, id: &str) -> String {
        match id.strip_prefix('p') {
            Some(num) if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => {
                resolve_url(&self.base_url, &format!("viewtopic.php?p={num}#{id}"))
            }
            _ => String::new(),
        }
    }

    /// Forum title from the entry page, with breadcrumb and page-title
    /// fallbacks.
    pub fn forum_title(&self, doc: &Html) -> String {
        for h2 in doc.select(&self.heading).take(5) {
            let text = h2.text().collect::<String>().trim().to_string();
            if !text.is_empty() && !SKIP_HEADINGS.contains(&text.to_lowercase().as_str()) {
                return text;
            }
        }

        if let Some(navbar) = doc.select(&self.navbar).next() {
            let forum_link = navbar
                .select(&self.anchor)
                .take(10)
                .filter(|a| a.value().attr("href").unwrap_or("").contains("viewforum"))
                .last();
            if let Some(link) = forum_link {
                let text = link.text().collect::<String>().trim().to_string();
                if !text.is_empty() {
                    return text;
                }
            }
        }

        if let Some(title) = doc.select(&self.page_title).next() {
            let text: String = title.text().collect();
            let text = text.split('•').next().unwrap_or("").trim();
            if !text.is_empty() {
                return text.to_string();
            }
        }

        FALLBACK_TITLE.to_string()
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn parse_regex(s: &str) -> Result<Regex> {
    Regex::new(s).map_err(|e| AppError::config(format!("bad pattern '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> Extractor {
        Extractor::new(&Config::default()).unwrap()
    }

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn test_extract_topics() {
        let page = doc(r#"
            <ul>
              <li><a class="topictitle" href="./viewtopic.php?t=100">Грузия весной</a></li>
              <li><a class="topictitle" href="./viewtopic.php?t=200">Вопросы по визам</a></li>
              <li><a class="topictitle" href="">broken</a></li>
            </ul>
        "#);
        let topics = extractor().extract_topics(&page);
        assert_eq!(topics.len(), 2);
        assert_eq!(
            topics["Грузия весной"],
            "https://forum.awd.ru/viewtopic.php?t=100"
        );
    }

    #[test]
    fn test_extract_topics_recovers_onclick_target() {
        let page = doc(r#"
            <a class="topictitle" href="https://tracker.example.com/x"
               onclick="window.open('./viewtopic.php?t=300&amp;start=0'); return false;">Через трекер</a>
        "#);
        let topics = extractor().extract_topics(&page);
        assert_eq!(
            topics["Через трекер"],
            "https://forum.awd.ru/viewtopic.php?t=300&start=0"
        );
    }

    #[test]
    fn test_extract_topics_drops_unrecoverable_external_link() {
        let page = doc(r#"<a class="topictitle" href="https://elsewhere.example.com/x">Чужое</a>"#);
        assert!(extractor().extract_topics(&page).is_empty());
    }

    fn post_block(id: &str, author: &str, date: &str, body: &str) -> String {
        format!(
            r##"<div class="post bg1" id="{id}">
                 <p class="author"><strong><a href="#">{author}</a></strong> » {date}</p>
                 <div class="content">{body}</div>
               </div>"##
        )
    }

    #[test]
    fn test_extract_posts() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            post_block("p101", "traveller", "12 мая 2024, 10:15", "<p>Первый пост</p>"),
            post_block("p102", "replier", "13 мая 2024, 11:20", "<p>Ответ</p>"),
        );
        let posts = extractor().extract_posts(&doc(&html));

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author, "traveller");
        assert_eq!(posts[0].date, "12 мая 2024, 10:15");
        assert!(posts[0].content_html.contains("Первый пост"));
        assert_eq!(
            posts[0].post_url,
            "https://forum.awd.ru/viewtopic.php?p=101#p101"
        );
    }

    #[test]
    fn test_extract_posts_skips_blocks_without_author() {
        let html = format!(
            "<html><body><div class=\"post\" id=\"p1\"><div class=\"content\">no author</div></div>{}</body></html>",
            post_block("p2", "someone", "01 янв 2024, 00:01", "ok"),
        );
        let posts = extractor().extract_posts(&doc(&html));
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author, "someone");
    }

    #[test]
    fn test_coloured_username_preferred() {
        let html = r##"<div class="post" id="p7">
            <p class="author"><a class="username-coloured" href="#">vip</a> » 02 фев 2024, 09:00</p>
            <div class="content">text</div>
        </div>"##;
        let posts = extractor().extract_posts(&doc(html));
        assert_eq!(posts[0].author, "vip");
    }

    #[test]
    fn test_forum_title_from_heading() {
        let page = doc("<h2>Сортировать по</h2><h2>Форум о Грузии</h2>");
        assert_eq!(extractor().forum_title(&page), "Форум о Грузии");
    }

    #[test]
    fn test_forum_title_from_breadcrumbs() {
        let page = doc(r#"<div class="navbar">
            <a href="./index.php">Главная</a>
            <a href="./viewforum.php?f=10">Кавказ</a>
        </div>"#);
        assert_eq!(extractor().forum_title(&page), "Кавказ");
    }

    #[test]
    fn test_forum_title_from_page_title() {
        let page = doc("<head><title>Абхазия • Форум Винского</title></head>");
        assert_eq!(extractor().forum_title(&page), "Абхазия");
    }

    #[test]
    fn test_forum_title_fallback() {
        let page = doc("<html><body></body></html>");
        assert_eq!(extractor().forum_title(&page), FALLBACK_TITLE);
    }
}
