//! # Salix
//!
//! A fast, embeddable full-text search library: a segmented on-disk
//! inverted index with BM25F ranking, a posting-list matcher algebra with
//! block-max pruning, snapshot-isolated readers and a single-writer
//! commit protocol.
//!
//! ## Features
//!
//! - Immutable segments with an atomic table-of-contents commit
//! - Boolean, phrase, range, prefix, wildcard, fuzzy and nested queries
//! - BM25F scoring with pluggable weighting models
//! - Top-K, sorted, grouped, collapsed and time-limited collection
//! - Pluggable storage: directory-backed or in-memory
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use salix::document::Document;
//! use salix::index::create_index;
//! use salix::query::Query;
//! use salix::schema::{FieldDef, Schema};
//! use salix::search::SearchRequest;
//! use salix::storage::memory::MemoryStorage;
//! use salix::writer::{CommitMode, WriterConfig};
//!
//! # fn main() -> salix::error::Result<()> {
//! let schema = Schema::builder()
//!     .field("title", FieldDef::text().stored(true))
//!     .field("body", FieldDef::text())
//!     .build()?;
//! let index = create_index(Arc::new(MemoryStorage::default()), schema)?;
//!
//! let mut writer = index.writer(WriterConfig::default())?;
//! writer.add_document(
//!     Document::builder()
//!         .add_text("title", "First document")
//!         .add_text("body", "salix is a search library")
//!         .build(),
//! )?;
//! writer.commit(CommitMode::Normal)?;
//!
//! let searcher = index.searcher()?;
//! let results = searcher.search(&Query::term("body", "search"), &SearchRequest::default())?;
//! assert_eq!(results.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod codec;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod reader;
pub mod schema;
pub mod scoring;
pub mod search;
pub mod segment;
pub mod storage;
pub mod util;
pub mod writer;

pub use document::Document;
pub use error::{Result, SalixError};
pub use index::{create_index, open_index, Index};
pub use query::Query;
pub use schema::{FieldDef, Schema};
pub use search::{Results, SearchRequest, Searcher};
pub use writer::{CommitMode, IndexWriter, WriterConfig};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
