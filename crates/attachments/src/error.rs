//! Error types for the attachment store

use std::io;
use std::path::PathBuf;

use crate::models::AttachmentId;
use crate::storage::BlobRef;

/// Errors surfaced by the content store and blob handles
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection, transaction, query or blob-open failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema migration failed while opening the database
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    /// Reading a source file failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or writing the bytes of a large object failed
    #[error("Blob I/O error: {0}")]
    BlobIo(#[source] io::Error),

    /// Writing content to a caller-supplied sink failed
    #[error("Failed to write attachment content: {0}")]
    Output(#[source] io::Error),

    /// The attachment has no content record
    #[error("No content stored for attachment {0}")]
    ContentNotFound(AttachmentId),

    /// The content buffer could not be allocated
    #[error("Cannot allocate {size} bytes for attachment content")]
    OutOfMemory { size: u64 },

    /// The content is larger than a single large object can hold
    #[error("Content of {size} bytes exceeds the large object limit")]
    TooLarge { size: u64 },

    /// The stored blob does not hold the number of bytes the metadata declares
    #[error("Blob {blob} holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        blob: BlobRef,
        expected: u64,
        actual: u64,
    },

    /// The attachment needs an identifier but was never stored
    #[error("Attachment has not been stored")]
    NotStored,

    /// `store` was called on an attachment that already has an identifier
    #[error("Attachment {0} is already stored")]
    AlreadyStored(AttachmentId),

    /// A read was attempted on a closed blob handle
    #[error("Blob handle is closed")]
    HandleClosed,

    /// The metadata connection mutex was poisoned by a panicking holder
    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Wrap an I/O error together with the file it concerns
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "nothing stored" condition, as opposed to a backend failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContentNotFound(_))
    }
}

/// Convenience alias for `Result<T, StoreError>`
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
