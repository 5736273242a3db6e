//! Attachment model with lazily fetched content

use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::mime::MimeTypes;
use crate::reply::{AttachmentReply, DeferredQueue, ReplyListener};
use crate::storage::{ContentStore, Fingerprint};

/// Domain appended to generated MIME content ids
const CONTENT_ID_DOMAIN: &str = "satchel";

/// Identifier of a stored attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachmentId(pub i64);

impl AttachmentId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the message owning an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MailId(pub i64);

impl MailId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attachment bytes held in memory
///
/// Owned by exactly one [`Attachment`]. The buffer keeps one spare byte of
/// capacity beyond the content length.
#[derive(Debug, PartialEq, Eq)]
pub struct Contents(Vec<u8>);

impl Contents {
    /// Allocate an empty buffer for `size` bytes, reporting allocation failure
    pub(crate) fn allocate(size: u64) -> Result<Self> {
        let capacity = usize::try_from(size)
            .ok()
            .and_then(|s| s.checked_add(1))
            .ok_or(StoreError::OutOfMemory { size })?;
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| StoreError::OutOfMemory { size })?;
        Ok(Self(data))
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Contents {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Classify bytes as binary
///
/// Anything outside printable ASCII, tab, carriage return and line feed
/// counts as binary.
pub fn is_binary(data: &[u8]) -> bool {
    data.iter()
        .any(|&b| b != b'\t' && b != b'\r' && b != b'\n' && !(0x20..0x7f).contains(&b))
}

/// A single mail attachment
///
/// Built either from a source (a file or an in-memory buffer) before
/// [`Attachment::store`], or from database rows before its content is
/// fetched. Content is pulled from the store on first use and cached until
/// [`Attachment::release_contents`].
#[derive(Debug, Default)]
pub struct Attachment {
    id: Option<AttachmentId>,
    mail_id: Option<MailId>,
    filename: Option<String>,
    mime_type: String,
    size: u64,
    charset: Option<String>,
    mime_content_id: Option<String>,
    fingerprint: Option<Fingerprint>,
    source: Option<PathBuf>,
    contents: Option<Contents>,
    metadata_fetched: bool,
}

impl Attachment {
    /// Create an empty attachment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an attachment whose content will be imported from a file
    ///
    /// Size and fingerprint are computed from the file when it is stored.
    pub fn from_file(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        let source = path.into();
        let filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self {
            filename,
            mime_type: mime_type.into(),
            source: Some(source),
            ..Self::default()
        }
    }

    /// Create an attachment from bytes already in memory
    pub fn from_bytes(
        filename: Option<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        let size = data.len() as u64;
        Self {
            filename,
            mime_type: mime_type.into(),
            size,
            contents: (!data.is_empty()).then(|| Contents::from_vec(data)),
            ..Self::default()
        }
    }

    /// Rebuild an attachment from its metadata row
    pub(crate) fn from_row(row: AttachmentRow) -> Self {
        Self {
            id: Some(row.id),
            mail_id: Some(row.mail_id),
            filename: row.filename,
            mime_type: row.mime_type,
            size: row.size,
            charset: row.charset,
            mime_content_id: row.mime_content_id,
            metadata_fetched: true,
            ..Self::default()
        }
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.mime_content_id = Some(content_id.into());
        self
    }

    /// Use a fingerprint computed elsewhere instead of hashing at store time
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn id(&self) -> Option<AttachmentId> {
        self.id
    }

    /// Identifier, or `NotStored` for an attachment that was never stored
    pub fn require_id(&self) -> Result<AttachmentId> {
        self.id.ok_or(StoreError::NotStored)
    }

    pub fn mail_id(&self) -> Option<MailId> {
        self.mail_id
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn set_mime_type(&mut self, mime_type: impl Into<String>) {
        self.mime_type = mime_type.into();
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn mime_content_id(&self) -> Option<&str> {
        self.mime_content_id.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// True when the metadata came from the database
    pub fn is_fetched(&self) -> bool {
        self.metadata_fetched
    }

    /// Cached content, without touching the store
    pub fn cached_contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    pub fn has_cached_contents(&self) -> bool {
        self.contents.is_some()
    }

    /// Generate a fresh `uuid@satchel` content id for inline references
    pub fn create_mime_content_id(&mut self) -> &str {
        let id = format!("{}@{}", uuid::Uuid::new_v4(), CONTENT_ID_DOMAIN);
        self.mime_content_id.insert(id)
    }

    /// Content bytes, fetched from the store on first use
    ///
    /// Returns `None` for empty attachments and when the fetch fails; the
    /// failure is logged and the cache stays empty.
    pub fn get_contents(&mut self, store: &ContentStore) -> Option<&[u8]> {
        if self.contents.is_none() {
            let fetched = store.fetch_all(self).map(|data| data.is_some());
            if let Err(e) = fetched {
                log::warn!(
                    "[STORE] Cannot fetch content of attachment {:?}: {}",
                    self.id,
                    e
                );
                return None;
            }
        }
        self.contents.as_deref()
    }

    /// Drop the cached content; safe to call repeatedly
    pub fn release_contents(&mut self) {
        self.contents = None;
    }

    /// Whether the content looks binary, or `None` when there is no content
    pub fn is_binary(&mut self, store: &ContentStore) -> Option<bool> {
        self.get_contents(store).map(is_binary)
    }

    /// Content decoded to text according to the declared charset
    ///
    /// Unknown charsets and us-ascii fall back to lossy UTF-8.
    pub fn decoded_text(&mut self, store: &ContentStore) -> Option<String> {
        let encoding = self
            .charset
            .as_deref()
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("us-ascii"))
            .and_then(|c| encoding_rs::Encoding::for_label(c.as_bytes()));
        let data = self.get_contents(store)?;

        let text = match encoding {
            Some(encoding) => encoding.decode(data).0.into_owned(),
            None => String::from_utf8_lossy(data).into_owned(),
        };
        Some(text)
    }

    /// Store metadata and content as an attachment of `mail_id`
    pub fn store(&mut self, store: &ContentStore, mail_id: MailId) -> Result<AttachmentId> {
        store.store(self, mail_id)
    }

    /// Path under `dir` (or the system temp dir) for handing the content to
    /// an external viewer
    ///
    /// Named `attch-<id>-<filename>`, or `attch-<id>.<ext>` with the
    /// extension looked up from the MIME type when there is no filename.
    pub fn temp_location(&self, dir: Option<&Path>, mime_types: &MimeTypes) -> Result<PathBuf> {
        let id = self.require_id()?;
        let name = match self.filename.as_deref().and_then(safe_file_name) {
            Some(filename) => format!("attch-{}-{}", id, filename),
            None => match mime_types.suffix_for(&self.mime_type) {
                Some(ext) => format!("attch-{}.{}", id, ext),
                None => format!("attch-{}", id),
            },
        };
        let dir = dir.map_or_else(std::env::temp_dir, Path::to_path_buf);
        Ok(dir.join(name))
    }

    /// Open a streaming reply over this attachment's content
    pub fn network_reply(
        &self,
        store: &ContentStore,
        queue: &DeferredQueue,
        listener: Rc<dyn ReplyListener>,
    ) -> AttachmentReply {
        let mut reply = AttachmentReply::new(queue.clone(), listener);
        reply.open(store, self);
        reply
    }

    pub(crate) fn assign_id(&mut self, id: AttachmentId, mail_id: MailId) {
        self.id = Some(id);
        self.mail_id = Some(mail_id);
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: Option<Fingerprint>) {
        self.fingerprint = fingerprint;
    }

    pub(crate) fn set_contents(&mut self, contents: Contents) {
        self.contents = Some(contents);
    }
}

/// Row of the `attachments` table
/// Final component of a declared filename, usable inside a chosen directory
///
/// Directory parts of either separator style are dropped; `.` and `..` and
/// names left empty yield `None`.
fn safe_file_name(filename: &str) -> Option<String> {
    let last = filename.rsplit(['/', '\\']).next()?;
    let name: String = last.chars().filter(|c| !c.is_control()).collect();
    match name.trim() {
        "" | "." | ".." => None,
        trimmed => Some(trimmed.to_string()),
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AttachmentRow {
    pub id: AttachmentId,
    pub mail_id: MailId,
    pub mime_type: String,
    pub size: u64,
    pub filename: Option<String>,
    pub charset: Option<String>,
    pub mime_content_id: Option<String>,
}
