//! Attachment storage on SQLite large objects
//!
//! - [`Database`]: connections and schema
//! - [`ContentStore`]: import with deduplication, whole and chunked reads
//! - [`BlobHandle`]: open read handle owning its own transaction
//! - [`Fingerprint`]: content digests used to share identical content

mod blob;
mod content;
mod database;
mod fingerprint;
mod metadata;

/// Transfer unit for hashing, importing and chunked reads
pub const CHUNK_SIZE: usize = 8192;

pub use blob::{BlobHandle, BlobRef, Chunk};
pub use content::{ContentStore, ImportOutcome};
pub use database::{ATTACHMENT_SEQUENCE, Database};
pub use fingerprint::{FINGERPRINT_LEN, Fingerprint};
pub use metadata::ContentRecord;
