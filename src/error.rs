//! Error types for the Salix library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`SalixError`] enum. Constructor helpers keep call sites short.

use std::io;

use thiserror::Error;

/// The main error type for Salix operations.
#[derive(Error, Debug)]
pub enum SalixError {
    /// I/O errors (file operations, syncing, locking).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No table of contents was found where an index was expected.
    #[error("Empty index: no table of contents in {0}")]
    EmptyIndex(String),

    /// The on-disk format version does not match this codec.
    #[error("Incompatible index format: found version {found}, expected {expected}")]
    IncompatibleFormat {
        /// Version found in the table of contents.
        found: u32,
        /// Version this library writes.
        expected: u32,
    },

    /// The operation required the latest generation but the handle was stale.
    #[error("Out of date: {0}")]
    OutOfDate(String),

    /// The writer lock is held by another writer.
    #[error("Index is locked: {0}")]
    Locked(String),

    /// A field name was not present in the schema.
    #[error("No such field: {0}")]
    NoSuchField(String),

    /// A field exists but is not configured for the requested operation.
    #[error("Field configuration error: {0}")]
    FieldConfiguration(String),

    /// Malformed or unexecutable query.
    #[error("Query error: {0}")]
    Query(String),

    /// An expanding query produced more terms than its cap allows.
    #[error("Too many terms: query on field '{field}' expanded past {limit} terms")]
    TooManyTerms {
        /// Field the expansion ran against.
        field: String,
        /// The configured expansion cap.
        limit: usize,
    },

    /// A matcher was advanced past the end of its stream.
    #[error("Read past end of matcher stream")]
    ReadTooFar,

    /// A collector exceeded its deadline.
    #[error("Search time limit exceeded")]
    TimeLimit,

    /// Codec or I/O failure while writing a segment.
    #[error("Indexing error: {0}")]
    Indexing(String),

    /// Schema definition or validation failure.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Tokenization or analysis failure.
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`SalixError`].
pub type Result<T> = std::result::Result<T, SalixError>;

impl SalixError {
    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        SalixError::Query(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        SalixError::Schema(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SalixError::Storage(msg.into())
    }

    /// Create a new analysis error.
    pub fn analysis<S: Into<String>>(msg: S) -> Self {
        SalixError::Analysis(msg.into())
    }

    /// Create a new indexing error.
    pub fn indexing<S: Into<String>>(msg: S) -> Self {
        SalixError::Indexing(msg.into())
    }

    /// Create a new field-configuration error.
    pub fn field<S: Into<String>>(msg: S) -> Self {
        SalixError::FieldConfiguration(msg.into())
    }

    /// Create a new locked error.
    pub fn locked<S: Into<String>>(msg: S) -> Self {
        SalixError::Locked(msg.into())
    }
}
