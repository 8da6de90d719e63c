//! Content reference types

use serde::{Deserialize, Serialize};

/// BLAKE3 digest and size of an uploaded blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub hash: [u8; 32],
    pub size: u64,
}

impl ContentRef {
    /// Compute a content reference from data
    pub fn from_data(data: &[u8]) -> Self {
        Self {
            hash: *blake3::hash(data).as_bytes(),
            size: data.len() as u64,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// First 8 hex chars, for logs
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash[..4])
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.short_hash(), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bytes_same_ref() {
        let a = ContentRef::from_data(b"clip.webm");
        let b = ContentRef::from_data(b"clip.webm");
        let c = ContentRef::from_data(b"other");

        assert_eq!(a, b);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash_hex().len(), 64);
        assert_eq!(a.short_hash().len(), 8);
    }

    #[test]
    fn test_display() {
        let display = ContentRef::from_data(b"test").to_string();
        assert!(display.ends_with("(4 bytes)"));
    }
}
