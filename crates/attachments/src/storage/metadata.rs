//! Row-level access to attachment metadata tables

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{BlobRef, Fingerprint};
use crate::error::Result;
use crate::mime::MimeTypes;
use crate::models::{AttachmentId, AttachmentRow, MailId};
use crate::viewer::Viewer;

/// Row of `attachment_contents`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub attachment_id: AttachmentId,
    pub blob: BlobRef,
    pub fingerprint: Option<Fingerprint>,
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<AttachmentRow> {
    Ok(AttachmentRow {
        id: AttachmentId(row.get(0)?),
        mail_id: MailId(row.get(1)?),
        mime_type: row.get(2)?,
        size: row.get::<_, i64>(3)?.max(0) as u64,
        filename: row.get(4)?,
        charset: row.get(5)?,
        mime_content_id: row.get(6)?,
    })
}

pub(crate) fn insert_attachment(conn: &Connection, row: &AttachmentRow) -> Result<()> {
    conn.execute(
        "INSERT INTO attachments
         (attachment_id, mail_id, content_type, content_size, filename, charset, mime_content_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            row.id.0,
            row.mail_id.0,
            row.mime_type,
            row.size as i64,
            row.filename,
            row.charset,
            row.mime_content_id,
        ],
    )?;
    Ok(())
}

pub(crate) fn set_content_size(conn: &Connection, id: AttachmentId, size: u64) -> Result<()> {
    conn.execute(
        "UPDATE attachments SET content_size = ? WHERE attachment_id = ?",
        params![size as i64, id.0],
    )?;
    Ok(())
}

pub(crate) fn get_attachment(conn: &Connection, id: AttachmentId) -> Result<Option<AttachmentRow>> {
    let row = conn
        .query_row(
            "SELECT attachment_id, mail_id, content_type, content_size, filename, charset,
                    mime_content_id
             FROM attachments WHERE attachment_id = ?",
            [id.0],
            attachment_from_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn list_for_mail(conn: &Connection, mail_id: MailId) -> Result<Vec<AttachmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT attachment_id, mail_id, content_type, content_size, filename, charset,
                mime_content_id
         FROM attachments WHERE mail_id = ?
         ORDER BY attachment_id",
    )?;

    let rows = stmt
        .query_map([mail_id.0], attachment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn content_record(conn: &Connection, id: AttachmentId) -> Result<Option<ContentRecord>> {
    let record = conn
        .query_row(
            "SELECT content, fingerprint FROM attachment_contents WHERE attachment_id = ?",
            [id.0],
            |row| {
                Ok(ContentRecord {
                    attachment_id: id,
                    blob: BlobRef(row.get(0)?),
                    fingerprint: row.get::<_, Option<String>>(1)?.map(Fingerprint::new),
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Blob already holding content with this fingerprint, if any
pub(crate) fn find_by_fingerprint(
    conn: &Connection,
    fingerprint: &Fingerprint,
) -> Result<Option<BlobRef>> {
    let blob = conn
        .query_row(
            "SELECT content FROM attachment_contents WHERE fingerprint = ?
             ORDER BY attachment_id LIMIT 1",
            [fingerprint.as_str()],
            |row| row.get(0).map(BlobRef),
        )
        .optional()?;
    Ok(blob)
}

pub(crate) fn insert_content_record(conn: &Connection, record: &ContentRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO attachment_contents (attachment_id, content, fingerprint) VALUES (?, ?, ?)",
        params![
            record.attachment_id.0,
            record.blob.0,
            record.fingerprint.as_ref().map(Fingerprint::as_str),
        ],
    )?;
    Ok(())
}

pub(crate) fn count_blobs(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM large_objects", [], |row| row.get(0))?;
    Ok(count as usize)
}

pub(crate) fn load_mime_types(conn: &Connection) -> Result<MimeTypes> {
    let mut stmt = conn.prepare("SELECT suffix, mime_type FROM mime_types")?;
    let types = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<MimeTypes, _>>()?;
    Ok(types)
}

pub(crate) fn register_mime_type(conn: &Connection, suffix: &str, mime_type: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO mime_types (suffix, mime_type) VALUES (?, ?)
         ON CONFLICT(suffix) DO UPDATE SET mime_type = excluded.mime_type",
        params![suffix, mime_type],
    )?;
    Ok(())
}

/// Viewer program for `mime_type`, preferring one specific to `conf_name`
pub(crate) fn viewer_for(
    conn: &Connection,
    mime_type: &str,
    conf_name: Option<&str>,
) -> Result<Option<String>> {
    if let Some(conf_name) = conf_name {
        let program = conn
            .query_row(
                "SELECT program_name FROM programs WHERE content_type = ? AND conf_name = ?
                 ORDER BY rowid LIMIT 1",
                params![mime_type, conf_name],
                |row| row.get(0),
            )
            .optional()?;
        if program.is_some() {
            return Ok(program);
        }
    }

    let program = conn
        .query_row(
            "SELECT program_name FROM programs WHERE content_type = ? AND conf_name IS NULL
             ORDER BY rowid LIMIT 1",
            [mime_type],
            |row| row.get(0),
        )
        .optional()?;
    Ok(program)
}

/// Every viewer visible to `conf_name`, including those shared by all
/// configurations
pub(crate) fn viewers(conn: &Connection, conf_name: Option<&str>) -> Result<Vec<Viewer>> {
    let mut stmt = conn.prepare(
        "SELECT program_name, content_type FROM programs
         WHERE conf_name IS NULL OR conf_name = ?
         ORDER BY rowid",
    )?;
    let viewers = stmt
        .query_map([conf_name], |row| {
            Ok(Viewer {
                program: row.get(0)?,
                mime_type: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(viewers)
}

pub(crate) fn register_viewer(
    conn: &Connection,
    viewer: &Viewer,
    conf_name: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO programs (program_name, content_type, conf_name) VALUES (?, ?, ?)",
        params![viewer.program, viewer.mime_type, conf_name],
    )?;
    Ok(())
}
