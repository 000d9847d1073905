// src/hash.rs

//! Content hashing for the package file inventory
//!
//! Every file placed in an installer is recorded in the manifest under a
//! 40-hex-char SHA-1 digest of its full content. The same digest is used to
//! content-address Helm charts (`<chartId>-<hash>.tgz`), to key downloads by
//! URL, and to detect changed image directories on import.
//!
//! Hashing is streaming: callers hand in any `Read` and the content is read
//! exactly once.

use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Length of a digest as a hex string
pub const HEX_LEN: usize = 40;

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Hash string has the wrong length
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A validated, lowercase content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hex digest, normalizing to lowercase
    pub fn new(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();

        if value.len() != HEX_LEN {
            return Err(HashError::InvalidLength {
                expected: HEX_LEN,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self(value.to_lowercase()))
    }

    /// Get the digest as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the hex string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental hasher
#[derive(Default)]
pub struct Hasher {
    state: Sha1,
    bytes: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finalize and return the digest
    pub fn finalize(self) -> ContentHash {
        ContentHash(hex::encode(self.state.finalize()))
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute the digest of everything a reader yields
///
/// Returns the digest together with the number of bytes read.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<(ContentHash, u64)> {
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let bytes = hasher.bytes();
    Ok((hasher.finalize(), bytes))
}

/// Compute the digest of a file on disk
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    hash_reader(&mut file).map(|(hash, _)| hash)
}

/// Hex digest of a string, used for cache keys
#[inline]
pub fn hash_str(value: &str) -> String {
    hash_bytes(value.as_bytes()).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(
            hash_bytes(b"").as_str(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            hash_bytes(b"abc").as_str(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(hash_bytes(b"abc").as_str().len(), HEX_LEN);
    }

    #[test]
    fn test_hasher_incremental() {
        let full = hash_bytes(b"Hello, World!");

        let mut hasher = Hasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.bytes(), 13);

        assert_eq!(full, hasher.finalize());
    }

    #[test]
    fn test_hash_reader_counts_bytes() {
        let data = vec![7u8; 200_000];
        let mut cursor = std::io::Cursor::new(&data);

        let (hash, bytes) = hash_reader(&mut cursor).unwrap();
        assert_eq!(bytes, 200_000);
        assert_eq!(hash, hash_bytes(&data));
    }

    #[test]
    fn test_hash_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"abc").unwrap();

        assert_eq!(hash_file(temp.path()).unwrap(), hash_bytes(b"abc"));
    }

    #[test]
    fn test_hash_validation() {
        let upper = "A9993E364706816ABA3E25717850C26C9CD0D89D";
        let parsed = ContentHash::new(upper).unwrap();
        assert_eq!(parsed.as_str(), upper.to_lowercase());

        assert!(matches!(
            ContentHash::new("abc123"),
            Err(HashError::InvalidLength { expected: 40, got: 6 })
        ));
        assert!(matches!(
            ContentHash::new("g9993e364706816aba3e25717850c26c9cd0d89d"),
            Err(HashError::InvalidHex(_))
        ));
    }
}
