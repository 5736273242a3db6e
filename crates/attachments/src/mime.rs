//! Filename suffix to MIME type mapping
//!
//! Loaded once from the `mime_types` table through
//! [`ContentStore::mime_types`](crate::ContentStore::mime_types) and passed
//! by reference to whatever needs it.

use std::collections::BTreeMap;

/// Type reported when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Suffix → MIME type table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeTypes {
    by_suffix: BTreeMap<String, String>,
}

impl MimeTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, suffix: impl Into<String>, mime_type: impl Into<String>) {
        self.by_suffix.insert(suffix.into(), mime_type.into());
    }

    pub fn len(&self) -> usize {
        self.by_suffix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_suffix.is_empty()
    }

    /// MIME type for a bare suffix, trying an exact then a lowercase match
    pub fn for_suffix(&self, suffix: &str) -> Option<&str> {
        self.by_suffix
            .get(suffix)
            .or_else(|| self.by_suffix.get(&suffix.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Guess the type of a file from its extension
    pub fn guess(&self, filename: &str) -> &str {
        filename
            .rfind('.')
            .map(|dot| &filename[dot + 1..])
            .filter(|ext| !ext.is_empty())
            .and_then(|ext| self.for_suffix(ext))
            .unwrap_or(DEFAULT_MIME_TYPE)
    }

    /// First suffix, in sorted order, registered for `mime_type`
    pub fn suffix_for(&self, mime_type: &str) -> Option<&str> {
        if mime_type.is_empty() {
            return None;
        }
        self.by_suffix
            .iter()
            .find(|(_, mt)| mt.as_str() == mime_type)
            .map(|(suffix, _)| suffix.as_str())
    }
}

impl FromIterator<(String, String)> for MimeTypes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            by_suffix: iter.into_iter().collect(),
        }
    }
}
