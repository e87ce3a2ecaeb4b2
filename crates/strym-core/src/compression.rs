//! Payload compression codecs
//!
//! Send payloads are compressed according to the producer configuration; the
//! algorithm and the uncompressed size travel in the message metadata, so the
//! payload itself carries no compression header.
//!
//! - **None**: passthrough for tiny or already-compressed payloads
//! - **LZ4**: ultra-fast block compression for latency-sensitive paths
//! - **Zlib**: higher ratio for bandwidth-constrained links

use bytes::Bytes;
use std::io::{Read, Write};
use strym_protocol::CompressionType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("LZ4 compression failed: {0}")]
    Lz4(String),

    #[error("Zlib compression failed: {0}")]
    Zlib(String),

    #[error("Missing uncompressed size for {0} payload")]
    MissingUncompressedSize(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CompressionError>;

/// A compression codec bound to one algorithm.
///
/// Cheap to copy; producers keep one per configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    compression: CompressionType,
}

impl Codec {
    pub fn new(compression: CompressionType) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Compress a payload. `CompressionType::None` returns the input handle
    /// without copying.
    pub fn compress(&self, data: Bytes) -> Result<Bytes> {
        match self.compression {
            CompressionType::None => Ok(data),
            CompressionType::Lz4 => {
                let compressed = lz4::block::compress(&data, None, false)
                    .map_err(|e| CompressionError::Lz4(e.to_string()))?;
                Ok(Bytes::from(compressed))
            }
            CompressionType::Zlib => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&data)?;
                let compressed = encoder
                    .finish()
                    .map_err(|e| CompressionError::Zlib(e.to_string()))?;
                Ok(Bytes::from(compressed))
            }
        }
    }

    /// Decompress a payload. LZ4 block decompression needs the original size
    /// from the message metadata.
    pub fn decompress(&self, data: Bytes, uncompressed_size: Option<usize>) -> Result<Bytes> {
        match self.compression {
            CompressionType::None => Ok(data),
            CompressionType::Lz4 => {
                let size = uncompressed_size
                    .ok_or(CompressionError::MissingUncompressedSize("lz4"))?;
                let decompressed = lz4::block::decompress(&data, Some(size as i32))
                    .map_err(|e| CompressionError::Lz4(e.to_string()))?;
                Ok(Bytes::from(decompressed))
            }
            CompressionType::Zlib => {
                let mut decoder = flate2::read::ZlibDecoder::new(&data[..]);
                let mut decompressed = Vec::with_capacity(uncompressed_size.unwrap_or(data.len() * 4));
                decoder.read_to_end(&mut decompressed)?;
                Ok(Bytes::from(decompressed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(compression: CompressionType) {
        let data = Bytes::from(b"Strym payload compression test. ".repeat(64));
        let codec = Codec::new(compression);

        let compressed = codec.compress(data.clone()).unwrap();
        if compression != CompressionType::None {
            assert!(compressed.len() < data.len());
        }

        let decompressed = codec
            .decompress(compressed, Some(data.len()))
            .unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_none() {
        roundtrip(CompressionType::None);
    }

    #[test]
    fn roundtrip_lz4() {
        roundtrip(CompressionType::Lz4);
    }

    #[test]
    fn roundtrip_zlib() {
        roundtrip(CompressionType::Zlib);
    }

    #[test]
    fn none_is_passthrough() {
        let data = Bytes::from_static(b"untouched");
        let codec = Codec::new(CompressionType::None);
        let out = codec.compress(data.clone()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn lz4_requires_size_hint() {
        let codec = Codec::new(CompressionType::Lz4);
        let compressed = codec.compress(Bytes::from(vec![0u8; 256])).unwrap();
        assert!(matches!(
            codec.decompress(compressed, None),
            Err(CompressionError::MissingUncompressedSize(_))
        ));
    }
}
