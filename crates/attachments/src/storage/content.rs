//! Content-addressable attachment store
//!
//! Attachment bytes live in large objects. Content records link each
//! attachment to a large object and carry the content fingerprint, so
//! attachments with identical bytes share one large object.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::blob::ZeroBlob;

use super::blob::{BlobHandle, BlobRef};
use super::database::{
    ATTACHMENT_SEQUENCE, Database, LARGE_OBJECT_COLUMN, LARGE_OBJECT_TABLE, MAIN_SCHEMA,
};
use super::fingerprint::Fingerprint;
use super::metadata::{self, ContentRecord};
use super::CHUNK_SIZE;
use crate::error::{Result, StoreError};
use crate::mime::MimeTypes;
use crate::models::{Attachment, AttachmentId, AttachmentList, AttachmentRow, Contents, MailId};
use crate::viewer::Viewer;

/// What an import did with the attachment's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// An existing large object with the same fingerprint was linked
    Reused(BlobRef),
    /// The bytes were written to a new large object
    Created(BlobRef),
    /// There was nothing to store
    Nothing,
}

impl ImportOutcome {
    pub fn blob(&self) -> Option<BlobRef> {
        match self {
            ImportOutcome::Reused(blob) | ImportOutcome::Created(blob) => Some(*blob),
            ImportOutcome::Nothing => None,
        }
    }
}

/// Attachment store backed by SQLite large objects
pub struct ContentStore {
    db: Arc<Database>,
    chunk_size: usize,
}

impl ContentStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Open the database at `path` and wrap it in a store
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open(path)?)))
    }

    /// Use a different transfer chunk size for blob handles
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    // === Storing ===

    /// Store an attachment as part of message `mail_id`
    ///
    /// Assigns the identifier, computes size and fingerprint for file
    /// sources, then writes the metadata row and imports the content in one
    /// transaction. On failure nothing is committed, but the attachment keeps
    /// its newly assigned identifier.
    pub fn store(&self, attachment: &mut Attachment, mail_id: MailId) -> Result<AttachmentId> {
        if let Some(id) = attachment.id() {
            return Err(StoreError::AlreadyStored(id));
        }

        let id = AttachmentId(self.db.next_sequence_value(ATTACHMENT_SEQUENCE)?);
        attachment.assign_id(id, mail_id);

        if let Some(path) = attachment.source().map(Path::to_path_buf) {
            attachment.set_size(file_size(&path));
            if attachment.fingerprint().is_none() {
                attachment.set_fingerprint(Fingerprint::of_file(&path));
            }
        } else if attachment.fingerprint().is_none() {
            let fingerprint = attachment.cached_contents().map(Fingerprint::of_bytes);
            attachment.set_fingerprint(fingerprint);
        }

        match self.store_rows(attachment) {
            Ok((outcome, stored)) => {
                if let Some(size) = stored {
                    attachment.set_size(size);
                }
                log::info!(
                    "[STORE] Stored attachment {} of mail {} ({} bytes, {:?})",
                    id,
                    mail_id,
                    attachment.size(),
                    outcome
                );
                Ok(id)
            }
            Err(e) => {
                log::warn!("[STORE] Failed to store attachment {}: {}", id, e);
                Err(e)
            }
        }
    }

    fn store_rows(&self, attachment: &Attachment) -> Result<(ImportOutcome, Option<u64>)> {
        let row = AttachmentRow {
            id: attachment.require_id()?,
            mail_id: attachment.mail_id().ok_or(StoreError::NotStored)?,
            mime_type: attachment.mime_type().to_string(),
            size: attachment.size(),
            filename: attachment.filename().map(str::to_string),
            charset: attachment.charset().map(str::to_string),
            mime_content_id: attachment.mime_content_id().map(str::to_string),
        };

        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        metadata::insert_attachment(&tx, &row)?;
        let imported = self.import_with(&tx, attachment)?;
        tx.commit()?;
        Ok(imported)
    }

    /// Import the content of an attachment whose metadata row already exists
    ///
    /// The row's recorded size is corrected to the length of the linked
    /// large object.
    pub fn import(&self, attachment: &Attachment) -> Result<ImportOutcome> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let (outcome, _) = self.import_with(&tx, attachment)?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Resolve a large object for the content and record the link
    ///
    /// Runs on the caller's transaction. Returns the stored length when a
    /// large object was linked.
    fn import_with(
        &self,
        conn: &Connection,
        attachment: &Attachment,
    ) -> Result<(ImportOutcome, Option<u64>)> {
        let id = attachment.require_id()?;

        let existing = match attachment.fingerprint() {
            Some(fingerprint) => metadata::find_by_fingerprint(conn, fingerprint)?,
            None => None,
        };

        let outcome = if let Some(blob) = existing {
            log::debug!("[STORE] Attachment {} shares {}", id, blob);
            ImportOutcome::Reused(blob)
        } else if let Some(path) = attachment.source() {
            ImportOutcome::Created(write_file_blob(conn, path)?)
        } else if let Some(data) = attachment.cached_contents().filter(|d| !d.is_empty()) {
            ImportOutcome::Created(write_buffer_blob(conn, data)?)
        } else {
            log::debug!("[STORE] Attachment {} has no content to import", id);
            return Ok((ImportOutcome::Nothing, None));
        };

        let blob = outcome.blob().ok_or(StoreError::NotStored)?;
        let stored = blob_len(conn, blob)?;
        if stored != attachment.size() {
            log::debug!(
                "[STORE] Attachment {} declared {} bytes, {} holds {}",
                id,
                attachment.size(),
                blob,
                stored
            );
            metadata::set_content_size(conn, id, stored)?;
        }

        let record = ContentRecord {
            attachment_id: id,
            blob,
            fingerprint: attachment.fingerprint().cloned(),
        };
        metadata::insert_content_record(conn, &record)?;
        Ok((outcome, Some(stored)))
    }

    // === Reading ===

    /// Whole content of an attachment, cached on the attachment
    ///
    /// Cached bytes are returned without touching the database, and empty
    /// attachments yield `None` without opening anything. An attachment
    /// without a content record is a `ContentNotFound` error. On any error
    /// the cache stays empty.
    pub fn fetch_all<'a>(&self, attachment: &'a mut Attachment) -> Result<Option<&'a [u8]>> {
        if attachment.has_cached_contents() {
            return Ok(attachment.cached_contents());
        }
        if attachment.size() == 0 {
            return Ok(None);
        }

        let contents = self.read_all(attachment.require_id()?, attachment.size())?;
        attachment.set_contents(contents);
        Ok(attachment.cached_contents())
    }

    fn read_all(&self, id: AttachmentId, size: u64) -> Result<Contents> {
        let mut conn = self.db.lock()?;
        let record = metadata::content_record(&conn, id)?.ok_or(StoreError::ContentNotFound(id))?;
        let mut contents = Contents::allocate(size)?;

        let tx = conn.transaction()?;
        {
            let mut blob = tx.blob_open(
                MAIN_SCHEMA,
                LARGE_OBJECT_TABLE,
                LARGE_OBJECT_COLUMN,
                record.blob.0,
                true,
            )?;
            let actual = Read::by_ref(&mut blob)
                .take(size)
                .read_to_end(contents.buffer_mut())
                .map_err(StoreError::BlobIo)? as u64;
            if actual != size {
                return Err(StoreError::SizeMismatch {
                    blob: record.blob,
                    expected: size,
                    actual,
                });
            }
        }
        tx.commit()?;

        log::debug!("[STORE] Fetched {} bytes of attachment {}", size, id);
        Ok(contents)
    }

    /// Open a chunked read handle on an attachment's content
    ///
    /// Returns `None`, without starting a transaction, when the attachment is
    /// empty or has no content record. The handle owns a dedicated
    /// connection until it is closed.
    pub fn open(&self, attachment: &Attachment) -> Result<Option<BlobHandle>> {
        if attachment.size() == 0 {
            return Ok(None);
        }
        let id = attachment.require_id()?;

        let record = {
            let conn = self.db.lock()?;
            metadata::content_record(&conn, id)?
        };
        let Some(record) = record else {
            log::debug!("[STORE] No content record for attachment {}", id);
            return Ok(None);
        };

        let conn = self.db.connect()?;
        BlobHandle::open(conn, record.blob, self.chunk_size).map(Some)
    }

    /// Write an attachment's content to `out` chunk by chunk
    ///
    /// Cached bytes are written directly. Returns the number of bytes
    /// written.
    pub fn stream_to(&self, attachment: &Attachment, mut out: impl Write) -> Result<u64> {
        if let Some(data) = attachment.cached_contents() {
            out.write_all(data).map_err(StoreError::Output)?;
            return Ok(data.len() as u64);
        }

        let Some(mut handle) = self.open(attachment)? else {
            return Ok(0);
        };

        let mut buf = Vec::with_capacity(handle.chunk_size());
        let mut written = 0u64;
        loop {
            let chunk = handle.read_chunk(&mut buf)?;
            out.write_all(&buf).map_err(StoreError::Output)?;
            written += chunk.len as u64;
            if !chunk.more {
                break;
            }
        }
        handle.close()?;
        Ok(written)
    }

    // === Metadata ===

    /// Load one attachment's metadata
    pub fn attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        let conn = self.db.lock()?;
        Ok(metadata::get_attachment(&conn, id)?.map(Attachment::from_row))
    }

    /// Attachments of a message, ordered by identifier
    pub fn list_for_mail(&self, mail_id: MailId) -> Result<AttachmentList> {
        let conn = self.db.lock()?;
        let attachments = metadata::list_for_mail(&conn, mail_id)?
            .into_iter()
            .map(Attachment::from_row)
            .collect();
        Ok(AttachmentList::from_attachments(mail_id, attachments))
    }

    pub fn content_record(&self, id: AttachmentId) -> Result<Option<ContentRecord>> {
        let conn = self.db.lock()?;
        metadata::content_record(&conn, id)
    }

    /// Number of large objects in the database
    pub fn blob_count(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        metadata::count_blobs(&conn)
    }

    /// Load the suffix → MIME type table
    pub fn mime_types(&self) -> Result<MimeTypes> {
        let conn = self.db.lock()?;
        metadata::load_mime_types(&conn)
    }

    pub fn register_mime_type(&self, suffix: &str, mime_type: &str) -> Result<()> {
        let conn = self.db.lock()?;
        metadata::register_mime_type(&conn, suffix, mime_type)
    }

    /// Viewer program for a MIME type, falling back to viewers shared by
    /// every configuration
    pub fn viewer_for(&self, mime_type: &str, conf_name: Option<&str>) -> Result<Option<String>> {
        let conn = self.db.lock()?;
        metadata::viewer_for(&conn, mime_type, conf_name)
    }

    pub fn viewers(&self, conf_name: Option<&str>) -> Result<Vec<Viewer>> {
        let conn = self.db.lock()?;
        metadata::viewers(&conn, conf_name)
    }

    pub fn register_viewer(&self, viewer: &Viewer, conf_name: Option<&str>) -> Result<()> {
        let conn = self.db.lock()?;
        metadata::register_viewer(&conn, viewer, conf_name)
    }
}

/// Size of a file, or zero when it cannot be inspected
fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Length in bytes of an existing large object
fn blob_len(conn: &Connection, blob: BlobRef) -> Result<u64> {
    let opened = conn.blob_open(
        MAIN_SCHEMA,
        LARGE_OBJECT_TABLE,
        LARGE_OBJECT_COLUMN,
        blob.0,
        true,
    )?;
    Ok(opened.len() as u64)
}

/// Create a zero-filled large object of `size` bytes
fn create_blob(conn: &Connection, size: u64) -> Result<BlobRef> {
    let len = i32::try_from(size).map_err(|_| StoreError::TooLarge { size })?;
    conn.execute(
        "INSERT INTO large_objects (data) VALUES (?)",
        [ZeroBlob(len)],
    )?;
    Ok(BlobRef(conn.last_insert_rowid()))
}

/// Copy a file into a new large object, one chunk at a time
fn write_file_blob(conn: &Connection, path: &Path) -> Result<BlobRef> {
    let to_io = |e: io::Error| StoreError::io(PathBuf::from(path), e);

    let mut file = File::open(path).map_err(to_io)?;
    let size = file.metadata().map_err(to_io)?.len();
    let blob_ref = create_blob(conn, size)?;

    let mut blob = conn.blob_open(
        MAIN_SCHEMA,
        LARGE_OBJECT_TABLE,
        LARGE_OBJECT_COLUMN,
        blob_ref.0,
        false,
    )?;

    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(to_io(e)),
        };
        blob.write_all(&buf[..n]).map_err(StoreError::BlobIo)?;
        written += n as u64;
    }

    if written != size {
        return Err(StoreError::SizeMismatch {
            blob: blob_ref,
            expected: size,
            actual: written,
        });
    }

    log::debug!("[STORE] Imported {} ({} bytes) as {}", path.display(), size, blob_ref);
    Ok(blob_ref)
}

/// Write an in-memory buffer into a new large object
fn write_buffer_blob(conn: &Connection, data: &[u8]) -> Result<BlobRef> {
    let blob_ref = create_blob(conn, data.len() as u64)?;
    let mut blob = conn.blob_open(
        MAIN_SCHEMA,
        LARGE_OBJECT_TABLE,
        LARGE_OBJECT_COLUMN,
        blob_ref.0,
        false,
    )?;
    blob.write_all(data).map_err(StoreError::BlobIo)?;
    Ok(blob_ref)
}
