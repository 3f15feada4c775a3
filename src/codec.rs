//! Compression service for cached range files
//!
//! The cache treats compression as an opaque byte-to-byte service. The
//! default implementation is zstd.

use std::io;

/// Byte compression boundary used by the range cache.
pub trait Codec: Send + Sync {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// Check that `data` is a well-formed compressed payload.
    fn validate(&self, data: &[u8]) -> io::Result<()> {
        self.decompress(data).map(|_| ())
    }
}

/// zstd codec with a configurable level.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Codec for ZstdCodec {
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::decode_all(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let codec = ZstdCodec::default();
        let data = br#"[{"blockNum":1,"diffs":[]}]"#.repeat(20);
        let compressed = codec.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decompress(&compressed).unwrap(), data);
        assert!(codec.validate(&compressed).is_ok());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let codec = ZstdCodec::default();
        assert!(codec.validate(b"definitely not zstd").is_err());
    }
}
