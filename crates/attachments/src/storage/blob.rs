//! Large object references and open read handles

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use rusqlite::Connection;

use super::database::{LARGE_OBJECT_COLUMN, LARGE_OBJECT_TABLE, MAIN_SCHEMA};
use crate::error::{Result, StoreError};

/// Opaque identifier of a stored large object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobRef(pub i64);

impl BlobRef {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid {}", self.0)
    }
}

/// Result of one chunk read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes obtained by this read
    pub len: usize,
    /// False once a read came back short, which marks the end of the blob
    pub more: bool,
}

/// Read position inside an open blob
#[derive(Debug)]
struct Descriptor {
    blob: BlobRef,
    offset: u64,
}

/// Open read handle on a large object
///
/// The handle owns its connection and the read transaction started on it;
/// both live until [`BlobHandle::close`]. Dropping an unclosed handle rolls
/// the transaction back.
pub struct BlobHandle {
    conn: Option<Connection>,
    descriptor: Option<Descriptor>,
    size: u64,
    chunk_size: usize,
    eof: bool,
}

impl BlobHandle {
    /// Start a transaction on `conn` and open `blob` for reading
    pub(crate) fn open(conn: Connection, blob: BlobRef, chunk_size: usize) -> Result<Self> {
        conn.execute_batch("BEGIN")?;

        let opened = conn
            .blob_open(MAIN_SCHEMA, LARGE_OBJECT_TABLE, LARGE_OBJECT_COLUMN, blob.0, true)
            .map(|b| b.len() as u64);

        let size = match opened {
            Ok(size) => size,
            Err(e) => {
                log::warn!("[BLOB] Failed to open large object {}: {}", blob, e);
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    log::warn!("[BLOB] Rollback after failed open: {}", rollback);
                }
                return Err(e.into());
            }
        };

        log::debug!("[BLOB] Opened {} ({} bytes)", blob, size);

        Ok(Self {
            conn: Some(conn),
            descriptor: Some(Descriptor { blob, offset: 0 }),
            size,
            chunk_size: chunk_size.max(1),
            eof: false,
        })
    }

    /// Reference of the blob being read, while the handle is open
    pub fn blob(&self) -> Option<BlobRef> {
        self.descriptor.as_ref().map(|d| d.blob)
    }

    /// Total size of the blob in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes delivered so far
    pub fn position(&self) -> u64 {
        self.descriptor.as_ref().map_or(self.size, |d| d.offset)
    }

    pub fn is_open(&self) -> bool {
        self.descriptor.is_some()
    }

    /// True once a read came back short or the handle was closed
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Read up to `buf.len()` bytes at the current position
    ///
    /// A read returning fewer bytes than requested (including zero) marks
    /// the handle as finished.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (Some(conn), Some(descriptor)) = (self.conn.as_ref(), self.descriptor.as_mut()) else {
            return Err(StoreError::HandleClosed);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let n = {
            let mut blob = conn.blob_open(
                MAIN_SCHEMA,
                LARGE_OBJECT_TABLE,
                LARGE_OBJECT_COLUMN,
                descriptor.blob.0,
                true,
            )?;
            blob.seek(SeekFrom::Start(descriptor.offset))
                .map_err(StoreError::BlobIo)?;
            read_full(&mut blob, buf)?
        };
        descriptor.offset += n as u64;

        if n < buf.len() {
            self.eof = true;
        }
        log::trace!("[BLOB] Read {} of {} requested bytes", n, buf.len());
        Ok(n)
    }

    #[cfg(test)]
    pub(crate) fn retarget(&mut self, blob: BlobRef) {
        if let Some(descriptor) = self.descriptor.as_mut() {
            descriptor.blob = blob;
        }
    }

    /// Read one chunk into `out`, replacing its contents
    pub fn read_chunk(&mut self, out: &mut Vec<u8>) -> Result<Chunk> {
        out.clear();
        out.resize(self.chunk_size, 0);
        let len = match self.read(out) {
            Ok(len) => len,
            Err(e) => {
                out.clear();
                return Err(e);
            }
        };
        out.truncate(len);
        Ok(Chunk {
            len,
            more: len == self.chunk_size,
        })
    }

    /// Close the blob, commit the read transaction and release the connection
    ///
    /// Calling this again, or on a handle whose descriptor is already gone,
    /// does nothing.
    pub fn close(&mut self) -> Result<()> {
        let descriptor = self.descriptor.take();
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.eof = true;

        if let Some(descriptor) = descriptor {
            log::debug!("[BLOB] Closing {}", descriptor.blob);
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            log::debug!("[BLOB] Handle dropped while open, rolling back");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                log::warn!("[BLOB] Rollback on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("descriptor", &self.descriptor)
            .field("size", &self.size)
            .field("chunk_size", &self.chunk_size)
            .field("eof", &self.eof)
            .finish()
    }
}

/// Fill as much of `buf` as the reader allows
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::BlobIo(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use rusqlite::blob::ZeroBlob;

    fn insert_blob(db: &Database, data: &[u8]) -> BlobRef {
        let conn = db.lock().unwrap();
        conn.execute(
            "INSERT INTO large_objects (data) VALUES (?)",
            [ZeroBlob(data.len() as i32)],
        )
        .unwrap();
        let oid = conn.last_insert_rowid();
        let mut blob = conn
            .blob_open(MAIN_SCHEMA, LARGE_OBJECT_TABLE, LARGE_OBJECT_COLUMN, oid, false)
            .unwrap();
        std::io::Write::write_all(&mut blob, data).unwrap();
        BlobRef(oid)
    }

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("attachments.test.sqlite")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_chunks_of_17000_byte_blob() {
        let (db, _dir) = test_db();
        let data: Vec<u8> = (0..17_000).map(|i| (i % 256) as u8).collect();
        let blob = insert_blob(&db, &data);

        let mut handle = BlobHandle::open(db.connect().unwrap(), blob, 8192).unwrap();
        assert_eq!(handle.size(), 17_000);

        let mut buf = Vec::new();
        let mut collected = Vec::new();
        let mut reads = Vec::new();
        loop {
            let chunk = handle.read_chunk(&mut buf).unwrap();
            collected.extend_from_slice(&buf);
            reads.push(chunk);
            if !chunk.more {
                break;
            }
        }

        assert_eq!(
            reads,
            vec![
                Chunk { len: 8192, more: true },
                Chunk { len: 8192, more: true },
                Chunk { len: 616, more: false },
            ]
        );
        assert!(handle.eof());
        assert_eq!(collected, data);
        handle.close().unwrap();
    }

    #[test]
    fn test_exact_multiple_ends_with_empty_read() {
        let (db, _dir) = test_db();
        let blob = insert_blob(&db, &[7u8; 8192]);

        let mut handle = BlobHandle::open(db.connect().unwrap(), blob, 4096).unwrap();
        let mut buf = Vec::new();
        assert!(handle.read_chunk(&mut buf).unwrap().more);
        assert!(handle.read_chunk(&mut buf).unwrap().more);
        assert_eq!(
            handle.read_chunk(&mut buf).unwrap(),
            Chunk { len: 0, more: false }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_open_missing_blob_fails() {
        let (db, _dir) = test_db();
        assert!(BlobHandle::open(db.connect().unwrap(), BlobRef(42), 8192).is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (db, _dir) = test_db();
        let blob = insert_blob(&db, b"hello");

        let mut handle = BlobHandle::open(db.connect().unwrap(), blob, 8192).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        assert!(!handle.is_open());
        assert!(handle.eof());
        assert!(matches!(
            handle.read(&mut [0u8; 4]),
            Err(StoreError::HandleClosed)
        ));
    }

    #[test]
    fn test_short_read_sets_eof() {
        let (db, _dir) = test_db();
        let blob = insert_blob(&db, b"hello world");

        let mut handle = BlobHandle::open(db.connect().unwrap(), blob, 8192).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(handle.read(&mut buf).unwrap(), 5);
        assert!(!handle.eof());
        assert_eq!(&buf, b"hello");

        let mut rest = [0u8; 16];
        assert_eq!(handle.read(&mut rest).unwrap(), 6);
        assert!(handle.eof());
        assert_eq!(&rest[..6], b" world");
        assert_eq!(handle.position(), 11);
    }
}
