//! Attachments of one message

use super::{Attachment, MailId};
use crate::error::Result;
use crate::storage::ContentStore;

/// The attachments of a message, ordered by attachment identifier
#[derive(Debug)]
pub struct AttachmentList {
    mail_id: MailId,
    attachments: Vec<Attachment>,
}

impl AttachmentList {
    pub fn new(mail_id: MailId) -> Self {
        Self {
            mail_id,
            attachments: Vec::new(),
        }
    }

    pub(crate) fn from_attachments(mail_id: MailId, attachments: Vec<Attachment>) -> Self {
        Self {
            mail_id,
            attachments,
        }
    }

    pub fn mail_id(&self) -> MailId {
        self.mail_id
    }

    pub fn push(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attachment> {
        self.attachments.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Attachment> {
        self.attachments.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Attachment> {
        self.attachments.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Attachment> {
        self.attachments.get_mut(index)
    }

    /// Find the attachment an inline `cid:` reference points to
    pub fn get_by_content_id(&mut self, content_id: &str) -> Option<&mut Attachment> {
        if content_id.is_empty() {
            return None;
        }
        let found = self
            .attachments
            .iter_mut()
            .find(|a| a.mime_content_id() == Some(content_id));
        if found.is_none() {
            log::debug!("[STORE] No attachment with content id {}", content_id);
        }
        found
    }

    /// Store every attachment under this list's message, stopping at the
    /// first failure
    pub fn store_all(&mut self, store: &ContentStore) -> Result<()> {
        for attachment in &mut self.attachments {
            attachment.store(store, self.mail_id)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a AttachmentList {
    type Item = &'a Attachment;
    type IntoIter = std::slice::Iter<'a, Attachment>;

    fn into_iter(self) -> Self::IntoIter {
        self.attachments.iter()
    }
}

impl IntoIterator for AttachmentList {
    type Item = Attachment;
    type IntoIter = std::vec::IntoIter<Attachment>;

    fn into_iter(self) -> Self::IntoIter {
        self.attachments.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_content_id() {
        let mut list = AttachmentList::new(MailId(3));
        list.push(Attachment::from_bytes(None, "image/png", vec![1, 2]).with_content_id("logo@mm"));
        list.push(Attachment::from_bytes(None, "image/gif", vec![3]).with_content_id("spacer@mm"));

        let found = list.get_by_content_id("spacer@mm").unwrap();
        assert_eq!(found.mime_type(), "image/gif");
        assert!(list.get_by_content_id("missing@mm").is_none());
        assert!(list.get_by_content_id("").is_none());
    }
}
