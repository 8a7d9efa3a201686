//! Markdown file storage backend.
//!
//! ## File Layout
//!
//! ```text
//! {dir}/
//! ├── {forum title}.md      # full-forum archive
//! └── report.json           # end-of-run summary
//! {topics_dir}/
//! └── {topic title}.md      # single-topic archives
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{CrawlReport, OutputConfig, Post};
use crate::storage::{DocumentHandle, ForumSink};
use crate::utils::text::safe_filename;

/// Local markdown file backend.
#[derive(Debug, Clone)]
pub struct MarkdownStorage {
    root: PathBuf,
    topics_root: PathBuf,
    max_filename_len: usize,
}

impl MarkdownStorage {
    /// Create a storage rooted at the configured output directories.
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            root: PathBuf::from(&config.dir),
            topics_root: PathBuf::from(&config.topics_dir),
            max_filename_len: config.max_filename_len,
        }
    }

    /// Storage rooted at an explicit directory, mainly for tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            topics_root: root.join("topics"),
            root,
            max_filename_len: 100,
        }
    }

    fn document_path(&self, title: &str) -> PathBuf {
        self.root
            .join(format!("{}.md", safe_filename(title, self.max_filename_len)))
    }

    /// Append text to an existing file, flushing before returning.
    async fn append(&self, path: &Path, text: &str) -> Result<()> {
        let context = path.display().to_string();
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        file.flush()
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        Ok(())
    }

    /// Create a file with initial content, replacing any previous archive.
    async fn create(&self, path: &Path, text: &str) -> Result<()> {
        let context = path.display().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::persistence(&context, e))?;
        }
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        file.flush()
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        Ok(())
    }

    /// Write a whole topic into its own archive file.
    pub async fn save_topic(
        &self,
        forum_title: &str,
        forum_url: &str,
        topic_title: &str,
        topic_url: &str,
        posts: &[Post],
    ) -> Result<PathBuf> {
        let path = self.topics_root.join(format!(
            "{}.md",
            safe_filename(topic_title, self.max_filename_len)
        ));

        let mut text = format!("# {forum_title}\n");
        if !forum_url.is_empty() {
            text.push_str(forum_url);
            text.push('\n');
        }
        text.push_str(&format!("\n\n\n## {topic_title}\n"));
        if !topic_url.is_empty() {
            text.push_str(topic_url);
            text.push('\n');
        }
        text.push('\n');
        for post in posts {
            text.push_str(&format_post(post));
        }

        self.create(&path, &text).await?;
        log::info!("topic saved to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl ForumSink for MarkdownStorage {
    async fn create_document(&self, title: &str, url: &str) -> Result<DocumentHandle> {
        let path = self.document_path(title);
        self.create(&path, &format!("# {title}\n{url}\n\n")).await?;
        log::debug!("created archive {}", path.display());
        Ok(DocumentHandle::new(path))
    }

    async fn append_section(
        &self,
        document: &mut DocumentHandle,
        title: &str,
        url: &str,
    ) -> Result<()> {
        let spacing = if document.sections > 0 { "\n\n\n" } else { "" };
        self.append(
            &document.path,
            &format!("{spacing}## {title}\n{url}\n\n"),
        )
        .await?;
        document.sections += 1;
        Ok(())
    }

    async fn append_post(&self, document: &DocumentHandle, post: &Post) -> Result<()> {
        self.append(&document.path, &format_post(post)).await
    }

    async fn write_report(&self, report: &CrawlReport) -> Result<()> {
        let path = self.root.join("report.json");
        let bytes = serde_json::to_vec_pretty(report)?;

        // Write to temp, then rename, so a crash never leaves half a report.
        let context = path.display().to_string();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::persistence(&context, e))?;
        Ok(())
    }
}

fn format_post(post: &Post) -> String {
    format!(
        "### {}, {}\n\n{}\n\n\n",
        post.author, post.date, post.content_markdown
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_post(author: &str, text: &str) -> Post {
        Post {
            author: author.to_string(),
            date: "12 мая 2024, 10:15".to_string(),
            content_html: format!("<p>{text}</p>"),
            content_markdown: text.to_string(),
            post_url: "https://forum.awd.ru/viewtopic.php?p=1#p1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());

        let mut document = storage
            .create_document("Форум о Грузии", "https://forum.awd.ru/viewforum.php?f=1")
            .await
            .unwrap();
        storage
            .append_section(&mut document, "Тема 1", "https://forum.awd.ru/viewtopic.php?t=1")
            .await
            .unwrap();
        storage
            .append_post(&document, &sample_post("alice", "первый"))
            .await
            .unwrap();
        storage
            .append_post(&document, &sample_post("bob", "второй"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(document.path()).unwrap();
        assert!(content.starts_with("# Форум о Грузии\n"));
        assert!(content.contains("## Тема 1\n"));
        assert!(content.contains("### alice, 12 мая 2024, 10:15\n\nпервый\n"));
        let alice = content.find("alice").unwrap();
        let bob = content.find("bob").unwrap();
        assert!(alice < bob, "posts must keep extraction order");
    }

    #[tokio::test]
    async fn test_section_spacing_only_between_sections() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());

        let mut document = storage.create_document("f", "u").await.unwrap();
        storage.append_section(&mut document, "a", "ua").await.unwrap();
        storage.append_section(&mut document, "b", "ub").await.unwrap();

        let content = std::fs::read_to_string(document.path()).unwrap();
        assert!(!content.contains("\n\n\n## a"));
        assert!(content.contains("\n\n\n## b"));
        assert_eq!(document.sections(), 2);
    }

    #[tokio::test]
    async fn test_filenames_are_sanitized() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());

        let document = storage.create_document("a/b: c?", "u").await.unwrap();
        assert!(document.path().ends_with("a_b_ c_.md"));
    }

    #[tokio::test]
    async fn test_save_topic_writes_single_file() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());

        let path = storage
            .save_topic(
                "Форум",
                "https://forum.awd.ru/viewforum.php?f=1",
                "Тема",
                "https://forum.awd.ru/viewtopic.php?t=9",
                &[sample_post("carol", "пост")],
            )
            .await
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("# Форум\n"));
        assert!(content.contains("## Тема\n"));
        assert!(content.contains("### carol"));
    }

    #[tokio::test]
    async fn test_report_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());

        let report = CrawlReport {
            forum_title: "t".to_string(),
            forum_url: "u".to_string(),
            total_topics: 2,
            total_posts: 10,
            failed_topics: vec!["x".to_string()],
            document_path: "d".to_string(),
            success: true,
            error_message: String::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            cached_hits: 3,
        };
        storage.write_report(&report).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("report.json")).unwrap();
        let loaded: CrawlReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.total_posts, 10);
        assert_eq!(loaded.failed_topics, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_append_to_missing_file_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let storage = MarkdownStorage::with_root(tmp.path());
        let document = DocumentHandle::new(tmp.path().join("missing.md"));

        let result = storage.append_post(&document, &sample_post("x", "y")).await;
        assert!(matches!(result, Err(AppError::Persistence { .. })));
    }
}
