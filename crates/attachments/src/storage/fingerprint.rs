//! Content fingerprints used for deduplication
//!
//! A fingerprint is the SHA-1 digest of the content, written in the
//! standard radix-64 alphabet without padding. The 160 digest bits always
//! yield 27 characters, the last one carrying 4 bits and two zero bits.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha1::{Digest, Sha1};

use super::CHUNK_SIZE;

/// Length of an encoded fingerprint
pub const FINGERPRINT_LEN: usize = 27;

/// Digest of an attachment's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an encoded fingerprint read back from the database
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fingerprint an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self::encode(hasher)
    }

    /// Fingerprint everything a reader yields, in `CHUNK_SIZE` pieces
    pub fn of_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha1::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(Self::encode(hasher))
    }

    /// Fingerprint a file
    ///
    /// Returns `None` if the file cannot be read. The caller then stores the
    /// content without deduplication.
    pub fn of_file(path: &Path) -> Option<Self> {
        let result = File::open(path).and_then(Self::of_reader);
        match result {
            Ok(fp) => Some(fp),
            Err(e) => {
                log::warn!("[HASH] Cannot fingerprint {}: {}", path.display(), e);
                None
            }
        }
    }

    fn encode(hasher: Sha1) -> Self {
        Self(STANDARD_NO_PAD.encode(hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        // sha1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        assert_eq!(Fingerprint::of_bytes(b"").as_str(), "2jmj7l5rSw0yVb/vlWAYkK/YBwk");
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(Fingerprint::of_bytes(b"abc").as_str(), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0");
    }

    #[test]
    fn test_fixed_length() {
        for data in [&b""[..], b"x", &[0xffu8; 10_000][..]] {
            assert_eq!(Fingerprint::of_bytes(data).as_str().len(), FINGERPRINT_LEN);
        }
    }

    #[test]
    fn test_reader_matches_buffer_across_chunks() {
        let data: Vec<u8> = (0..3 * CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let from_reader = Fingerprint::of_reader(data.as_slice()).unwrap();
        assert_eq!(from_reader, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[b'X'; 20_000]).unwrap();
        drop(file);

        let fp = Fingerprint::of_file(&path).unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(&[b'X'; 20_000]));
    }

    #[test]
    fn test_of_file_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Fingerprint::of_file(&dir.path().join("missing.bin")).is_none());
    }
}
