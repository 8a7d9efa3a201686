//! Service layer for the archiver.
//!
//! - Resilient page retrieval (`Fetcher`)
//! - Page-to-page link resolution (`Paginator`)
//! - Markup-to-record mapping (`Extractor`)
//! - Post body conversion (`MarkdownConverter`)

mod extract;
mod fetcher;
mod markdown;
mod pagination;

pub use extract::{Extractor, RawPost};
pub use fetcher::{Fetcher, Page};
pub use markdown::MarkdownConverter;
pub use pagination::Paginator;
