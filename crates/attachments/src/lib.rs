//! Attachments crate - Content-addressed attachment storage
//!
//! This crate provides:
//! - Attachment models and per-message lists
//! - A SQLite-backed content store that shares identical content between
//!   attachments by fingerprint
//! - Whole-buffer and chunked reads of stored content
//! - A pull-based reply adapter for streaming content to a consumer
//! - MIME suffix mappings and viewer program lookup

pub mod config;
pub mod error;
pub mod mime;
pub mod models;
pub mod reply;
pub mod storage;
pub mod viewer;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use mime::{DEFAULT_MIME_TYPE, MimeTypes};
pub use models::{Attachment, AttachmentId, AttachmentList, Contents, MailId, is_binary};
pub use reply::{AttachmentReply, DeferredQueue, Pulled, ReplyError, ReplyListener, ReplyState};
pub use storage::{
    BlobHandle, BlobRef, CHUNK_SIZE, Chunk, ContentRecord, ContentStore, Database, Fingerprint,
    ImportOutcome,
};
pub use viewer::{Viewer, viewer_command};
