//! Pipeline entry points for archiver operations.
//!
//! - `Crawler`: traversal state machine over listings and topics
//! - `run_forum_crawl`: full-forum crawl into a persistence sink

pub mod forum;
pub mod traverse;

pub use forum::run_forum_crawl;
pub use traverse::{CrawlCursor, Crawler};
