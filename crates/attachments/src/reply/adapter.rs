//! Streaming reply state machine
//!
//! ```text
//! Unopened ──open──▶ Opened ──read──▶ Reading ──▶ Idle ──read──▶ …
//!     │                                  │
//!     └──open fails──▶ Failed            ├──short read──▶ Eof
//!                                        └──read error──▶ Failed
//!
//! any non-terminal ──abort──▶ Aborted
//! Eof | Aborted | Failed ──close──▶ Closed
//! ```

use std::fmt;
use std::rc::Rc;

use super::DeferredQueue;
use crate::models::{Attachment, AttachmentId};
use crate::storage::{BlobHandle, ContentStore};

/// Status reported to the consumer once the reply starts
const STATUS_OK: u16 = 200;
const REASON_OK: &str = "OK";

/// Consumer-side notifications, always delivered from the deferred queue
pub trait ReplyListener {
    /// Status line is available
    fn metadata_changed(&self, _status: u16, _reason: &str) {}

    /// More data can be pulled
    fn ready_read(&self);

    /// The reply will deliver nothing more
    fn finished(&self);
}

/// Why a reply delivered less than the whole content
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("Content not found in database")]
    ContentNotFound,

    /// The stream stopped early; `delivered` bytes reached the consumer
    #[error("Reading content failed after {delivered} bytes")]
    ReadFailed { delivered: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    Unopened,
    Opened,
    Reading,
    Idle,
    Eof,
    Closed,
    Failed,
    Aborted,
}

impl ReplyState {
    /// States from which no more data will ever be read
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplyState::Closed | ReplyState::Failed | ReplyState::Aborted)
    }
}

/// Outcome of one pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulled {
    /// Bytes copied into the caller's buffer
    pub bytes: usize,
    /// No further pull will return data
    pub end_of_stream: bool,
}

impl Pulled {
    fn end() -> Self {
        Self {
            bytes: 0,
            end_of_stream: true,
        }
    }
}

/// Pull-based reader over one attachment's content
///
/// Open failures do not surface as errors: the reply moves to `Failed`,
/// records [`ReplyError::ContentNotFound`] and still reports a status and
/// `finished`, so consumers waiting on the lifecycle are released.
pub struct AttachmentReply {
    attachment_id: Option<AttachmentId>,
    state: ReplyState,
    handle: Option<BlobHandle>,
    error: Option<ReplyError>,
    queue: DeferredQueue,
    listener: Rc<dyn ReplyListener>,
}

impl AttachmentReply {
    pub fn new(queue: DeferredQueue, listener: Rc<dyn ReplyListener>) -> Self {
        Self {
            attachment_id: None,
            state: ReplyState::Unopened,
            handle: None,
            error: None,
            queue,
            listener,
        }
    }

    pub fn state(&self) -> ReplyState {
        self.state
    }

    pub fn error(&self) -> Option<&ReplyError> {
        self.error.as_ref()
    }

    pub fn attachment_id(&self) -> Option<AttachmentId> {
        self.attachment_id
    }

    /// Open the attachment's content and schedule the start notifications
    pub fn open(&mut self, store: &ContentStore, attachment: &Attachment) {
        if self.state != ReplyState::Unopened {
            log::warn!("[REPLY] open called in state {:?}", self.state);
            return;
        }
        self.attachment_id = attachment.id();

        match store.open(attachment) {
            Ok(Some(handle)) => {
                log::debug!("[REPLY] Attachment {:?} opened", self.attachment_id);
                self.handle = Some(handle);
                self.state = ReplyState::Opened;
            }
            Ok(None) => {
                log::debug!("[REPLY] Attachment {:?} has no content", self.attachment_id);
                self.fail();
            }
            Err(e) => {
                log::warn!(
                    "[REPLY] Error opening attachment {:?}: {}",
                    self.attachment_id,
                    e
                );
                self.fail();
            }
        }

        let listener = self.listener.clone();
        let failed = self.error.is_some();
        self.queue.schedule(move || {
            listener.metadata_changed(STATUS_OK, REASON_OK);
            if failed {
                listener.finished();
            } else {
                listener.ready_read();
            }
        });
    }

    fn fail(&mut self) {
        self.state = ReplyState::Failed;
        self.error = Some(ReplyError::ContentNotFound);
    }

    /// Pull up to `buf.len()` bytes
    ///
    /// After each full read a `ready_read` is scheduled; the read that
    /// reaches the end schedules `finished` instead. Once the end has been
    /// reached, or after an abort or failure, pulls return end-of-stream.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Pulled {
        if !matches!(self.state, ReplyState::Opened | ReplyState::Idle) {
            return Pulled::end();
        }
        let Some(handle) = self.handle.as_mut() else {
            self.state = ReplyState::Eof;
            return Pulled::end();
        };
        if handle.eof() {
            self.state = ReplyState::Eof;
            return Pulled::end();
        }
        if buf.is_empty() {
            return Pulled {
                bytes: 0,
                end_of_stream: false,
            };
        }

        self.state = ReplyState::Reading;
        let (bytes, end_of_stream) = match handle.read(buf) {
            Ok(bytes) => (bytes, handle.eof()),
            Err(e) => {
                log::warn!(
                    "[REPLY] Read failed on attachment {:?}: {}",
                    self.attachment_id,
                    e
                );
                let delivered = handle.position();
                self.error = Some(ReplyError::ReadFailed { delivered });
                self.state = ReplyState::Failed;
                (0, true)
            }
        };
        log::trace!("[REPLY] Read {} of {} bytes", bytes, buf.len());

        let listener = self.listener.clone();
        if self.state == ReplyState::Failed {
            self.release_handle();
            self.queue.schedule(move || listener.finished());
        } else if end_of_stream {
            self.state = ReplyState::Eof;
            self.release_handle();
            self.queue.schedule(move || listener.finished());
        } else {
            self.state = ReplyState::Idle;
            self.queue.schedule(move || listener.ready_read());
        }

        Pulled {
            bytes,
            end_of_stream,
        }
    }

    /// True once no more data will be delivered
    pub fn at_end(&self) -> bool {
        matches!(self.state, ReplyState::Eof) || self.state.is_terminal()
    }

    /// Bytes left to pull
    pub fn bytes_available(&self) -> u64 {
        match (&self.handle, self.state) {
            (Some(handle), ReplyState::Opened | ReplyState::Idle) => {
                handle.size().saturating_sub(handle.position())
            }
            _ => 0,
        }
    }

    /// Cancel the transfer, closing the blob handle at once
    pub fn abort(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        log::debug!("[REPLY] Aborting attachment {:?}", self.attachment_id);
        self.release_handle();
        self.state = ReplyState::Aborted;
    }

    /// Release the blob handle; safe to call in any state, any number of times
    pub fn close(&mut self) {
        self.release_handle();
        self.state = ReplyState::Closed;
    }

    fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take()
            && let Err(e) = handle.close()
        {
            log::warn!(
                "[REPLY] Closing attachment {:?} failed: {}",
                self.attachment_id,
                e
            );
        }
    }
}

impl Drop for AttachmentReply {
    fn drop(&mut self) {
        self.release_handle();
    }
}

impl fmt::Debug for AttachmentReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentReply")
            .field("attachment_id", &self.attachment_id)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MailId;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Meta(u16),
        ReadyRead,
        Finished,
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<Event>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }

    impl ReplyListener for Recorder {
        fn metadata_changed(&self, status: u16, _reason: &str) {
            self.events.borrow_mut().push(Event::Meta(status));
        }

        fn ready_read(&self) {
            self.events.borrow_mut().push(Event::ReadyRead);
        }

        fn finished(&self) {
            self.events.borrow_mut().push(Event::Finished);
        }
    }

    fn store_with(data: &[u8]) -> (ContentStore, Attachment, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open_path(dir.path().join("attachments.test.sqlite")).unwrap();
        let mut attachment = Attachment::from_bytes(None, "application/octet-stream", data.to_vec());
        let id = attachment.store(&store, MailId(1)).unwrap();
        let loaded = store.attachment(id).unwrap().unwrap();
        (store, loaded, dir)
    }

    fn open_reply(store: &ContentStore, attachment: &Attachment) -> (AttachmentReply, DeferredQueue, Rc<Recorder>) {
        let queue = DeferredQueue::new();
        let recorder = Rc::new(Recorder::default());
        let reply = attachment.network_reply(store, &queue, recorder.clone());
        (reply, queue, recorder)
    }

    #[test]
    fn test_notifications_are_deferred() {
        let (store, attachment, _dir) = store_with(&[1u8; 100]);
        let (mut reply, queue, recorder) = open_reply(&store, &attachment);

        assert_eq!(reply.state(), ReplyState::Opened);
        assert!(recorder.take().is_empty());
        queue.run_pending();
        assert_eq!(recorder.take(), vec![Event::Meta(200), Event::ReadyRead]);

        let mut buf = [0u8; 40];
        let pulled = reply.read_data(&mut buf);
        assert_eq!(pulled, Pulled { bytes: 40, end_of_stream: false });
        assert_eq!(reply.state(), ReplyState::Idle);
        assert!(recorder.take().is_empty());
        queue.run_pending();
        assert_eq!(recorder.take(), vec![Event::ReadyRead]);
    }

    #[test]
    fn test_reads_to_end_then_reports_end_of_stream() {
        let (store, attachment, _dir) = store_with(&[9u8; 100]);
        let (mut reply, queue, recorder) = open_reply(&store, &attachment);
        queue.run_pending();
        recorder.take();

        let mut buf = [0u8; 64];
        assert_eq!(reply.read_data(&mut buf).bytes, 64);
        assert_eq!(reply.bytes_available(), 36);

        let last = reply.read_data(&mut buf);
        assert_eq!(last, Pulled { bytes: 36, end_of_stream: true });
        assert_eq!(reply.state(), ReplyState::Eof);
        assert!(reply.at_end());

        queue.run_pending();
        assert_eq!(recorder.take(), vec![Event::ReadyRead, Event::Finished]);

        assert_eq!(reply.read_data(&mut buf), Pulled { bytes: 0, end_of_stream: true });
        reply.close();
        reply.close();
        assert_eq!(reply.state(), ReplyState::Closed);
    }

    #[test]
    fn test_missing_content_fails_softly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open_path(dir.path().join("attachments.test.sqlite")).unwrap();
        let mut attachment = Attachment::from_bytes(Some("empty.txt".into()), "text/plain", vec![]);
        attachment.store(&store, MailId(1)).unwrap();

        let (mut reply, queue, recorder) = open_reply(&store, &attachment);
        assert_eq!(reply.state(), ReplyState::Failed);
        assert_eq!(reply.error(), Some(&ReplyError::ContentNotFound));

        queue.run_pending();
        assert_eq!(recorder.take(), vec![Event::Meta(200), Event::Finished]);
        assert!(reply.read_data(&mut [0u8; 8]).end_of_stream);
        assert!(reply.at_end());
    }

    #[test]
    fn test_abort_ends_stream() {
        let (store, attachment, _dir) = store_with(&[3u8; 30_000]);
        let (mut reply, queue, _recorder) = open_reply(&store, &attachment);
        queue.run_pending();

        let mut buf = [0u8; 8192];
        assert_eq!(reply.read_data(&mut buf).bytes, 8192);
        reply.abort();
        assert_eq!(reply.state(), ReplyState::Aborted);
        assert_eq!(reply.bytes_available(), 0);

        for _ in 0..3 {
            assert_eq!(reply.read_data(&mut buf), Pulled { bytes: 0, end_of_stream: true });
        }
        reply.abort();
        assert_eq!(reply.state(), ReplyState::Aborted);
    }

    #[test]
    fn test_read_error_marks_stream_truncated() {
        let (store, attachment, _dir) = store_with(&[5u8; 100]);
        let (mut reply, queue, recorder) = open_reply(&store, &attachment);
        queue.run_pending();
        recorder.take();

        let mut buf = [0u8; 40];
        assert_eq!(reply.read_data(&mut buf).bytes, 40);

        // Next read targets a large object that does not exist
        reply.handle.as_mut().unwrap().retarget(crate::storage::BlobRef(9_999));
        let pulled = reply.read_data(&mut buf);
        assert_eq!(pulled, Pulled { bytes: 0, end_of_stream: true });
        assert_eq!(reply.state(), ReplyState::Failed);
        assert_eq!(reply.error(), Some(&ReplyError::ReadFailed { delivered: 40 }));
        assert!(reply.at_end());

        queue.run_pending();
        assert_eq!(recorder.take(), vec![Event::ReadyRead, Event::Finished]);
        assert!(reply.read_data(&mut buf).end_of_stream);
    }

    #[test]
    fn test_empty_buffer_pull() {
        let (store, attachment, _dir) = store_with(b"abc");
        let (mut reply, _queue, _recorder) = open_reply(&store, &attachment);
        assert_eq!(
            reply.read_data(&mut []),
            Pulled { bytes: 0, end_of_stream: false }
        );
        assert_eq!(reply.state(), ReplyState::Opened);
    }

    #[test]
    fn test_read_before_open() {
        let queue = DeferredQueue::new();
        let mut reply = AttachmentReply::new(queue.clone(), Rc::new(Recorder::default()));
        assert!(reply.read_data(&mut [0u8; 4]).end_of_stream);
        assert!(!reply.at_end());
        assert!(queue.is_empty());
    }
}
