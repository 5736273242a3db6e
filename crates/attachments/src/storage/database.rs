//! SQLite database holding attachment metadata and large objects

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

use crate::error::{Result, StoreError};

/// Table holding large object bytes, keyed by `oid`
pub(crate) const LARGE_OBJECT_TABLE: &str = "large_objects";
/// Column of [`LARGE_OBJECT_TABLE`] holding the bytes
pub(crate) const LARGE_OBJECT_COLUMN: &str = "data";
/// Schema name passed to incremental blob I/O
pub(crate) const MAIN_SCHEMA: &str = "main";

/// Sequence that hands out attachment identifiers
pub const ATTACHMENT_SEQUENCE: &str = "seq_attachment_id";

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Named counters, incremented outside of storing transactions
            CREATE TABLE sequences (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO sequences (name, value) VALUES ('seq_attachment_id', 0);

            -- Attachment metadata, one row per attachment
            CREATE TABLE attachments (
                attachment_id INTEGER PRIMARY KEY,
                mail_id INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                content_size INTEGER NOT NULL CHECK (content_size >= 0),
                filename TEXT,
                charset TEXT,
                mime_content_id TEXT
            );

            CREATE INDEX idx_attachments_mail_id ON attachments(mail_id, attachment_id);

            -- Large objects, written once and shared between attachments
            CREATE TABLE large_objects (
                oid INTEGER PRIMARY KEY,
                data BLOB NOT NULL
            );

            -- Link from an attachment to the large object holding its bytes
            CREATE TABLE attachment_contents (
                attachment_id INTEGER PRIMARY KEY,
                content INTEGER NOT NULL,
                fingerprint TEXT,
                FOREIGN KEY (attachment_id) REFERENCES attachments(attachment_id) ON DELETE CASCADE,
                FOREIGN KEY (content) REFERENCES large_objects(oid)
            );

            CREATE INDEX idx_attachment_contents_fingerprint
                ON attachment_contents(fingerprint);
            "#,
        ),
        // Migration 2: MIME suffixes and external viewers
        M::up(
            r#"
            CREATE TABLE mime_types (
                suffix TEXT PRIMARY KEY,
                mime_type TEXT NOT NULL
            );

            INSERT INTO mime_types (suffix, mime_type) VALUES
                ('txt', 'text/plain'),
                ('html', 'text/html'),
                ('htm', 'text/html'),
                ('csv', 'text/csv'),
                ('pdf', 'application/pdf'),
                ('zip', 'application/zip'),
                ('gz', 'application/gzip'),
                ('json', 'application/json'),
                ('xml', 'application/xml'),
                ('doc', 'application/msword'),
                ('png', 'image/png'),
                ('jpeg', 'image/jpeg'),
                ('jpg', 'image/jpeg'),
                ('gif', 'image/gif'),
                ('svg', 'image/svg+xml'),
                ('mp3', 'audio/mpeg'),
                ('eml', 'message/rfc822');

            -- conf_name NULL applies to every configuration
            CREATE TABLE programs (
                program_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                conf_name TEXT
            );

            CREATE INDEX idx_programs_content_type ON programs(content_type);
            "#,
        ),
    ])
}

/// Apply connection settings shared by the metadata and blob connections
///
/// WAL lets a blob handle hold a read transaction on its own connection
/// while the metadata connection keeps writing.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// SQLite database for attachments
///
/// Holds one long-lived connection for metadata work. Blob handles get their
/// own connection from [`Database::connect`] so a streaming transfer never
/// shares a transaction with unrelated queries.
pub struct Database {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and bring its schema up to date
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)?;
        configure(&conn)?;
        migrations().to_latest(&mut conn)?;

        log::debug!("[STORE] Opened attachment database at {}", path.display());

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection to the same database
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        configure(&conn)?;
        Ok(conn)
    }

    /// Lock the metadata connection
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Take the next value of a named sequence
    ///
    /// Runs in its own implicit transaction, so values are consumed even when
    /// the caller's later work rolls back.
    pub fn next_sequence_value(&self, name: &str) -> Result<i64> {
        let conn = self.lock()?;
        let value = conn.query_row(
            "UPDATE sequences SET value = value + 1 WHERE name = ? RETURNING value",
            [name],
            |row| row.get(0),
        )?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_sequence_increments() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("attachments.test.sqlite")).unwrap();

        assert_eq!(db.next_sequence_value(ATTACHMENT_SEQUENCE).unwrap(), 1);
        assert_eq!(db.next_sequence_value(ATTACHMENT_SEQUENCE).unwrap(), 2);
    }

    #[test]
    fn test_unknown_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("attachments.test.sqlite")).unwrap();

        assert!(db.next_sequence_value("seq_missing").is_err());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attachments.test.sqlite");

        {
            let db = Database::open(&path).unwrap();
            db.next_sequence_value(ATTACHMENT_SEQUENCE).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.next_sequence_value(ATTACHMENT_SEQUENCE).unwrap(), 2);
        assert_eq!(db.path(), path.as_path());
    }
}
