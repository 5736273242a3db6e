//! Domain models for attachments

mod attachment;
mod list;

pub(crate) use attachment::AttachmentRow;
pub use attachment::{Attachment, AttachmentId, Contents, MailId, is_binary};
pub use list::AttachmentList;
