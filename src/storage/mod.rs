//! Persistence for extracted forum content.
//!
//! Archives are plain markdown files: one document per forum with a section
//! per topic, posts appended in extraction order. All writes are append-only;
//! each append fully flushes or fails, so a reader between calls never sees a
//! partial record.

pub mod markdown;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CrawlReport, Post};

// Re-export for convenience
pub use markdown::MarkdownStorage;

/// Handle to an open archive document.
#[derive(Debug)]
pub struct DocumentHandle {
    path: PathBuf,
    sections: u32,
}

impl DocumentHandle {
    fn new(path: PathBuf) -> Self {
        Self { path, sections: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Topic sections appended so far.
    pub fn sections(&self) -> u32 {
        self.sections
    }
}

/// Append-only sink for extracted forum content.
#[async_trait]
pub trait ForumSink: Send + Sync {
    /// Create a fresh archive document with a forum header.
    async fn create_document(&self, title: &str, url: &str) -> Result<DocumentHandle>;

    /// Append a topic section header.
    async fn append_section(
        &self,
        document: &mut DocumentHandle,
        title: &str,
        url: &str,
    ) -> Result<()>;

    /// Append one post record.
    async fn append_post(&self, document: &DocumentHandle, post: &Post) -> Result<()>;

    /// Write the end-of-run report next to the archive.
    async fn write_report(&self, report: &CrawlReport) -> Result<()>;
}
