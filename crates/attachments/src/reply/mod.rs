//! Pull-based streaming of attachment content
//!
//! [`AttachmentReply`] exposes a blob handle to a consumer that asks for
//! bytes when it is ready for them. Notifications toward the consumer go
//! through a [`DeferredQueue`] so they never re-enter it synchronously.

mod adapter;
mod deferred;

pub use adapter::{AttachmentReply, Pulled, ReplyError, ReplyListener, ReplyState};
pub use deferred::DeferredQueue;
