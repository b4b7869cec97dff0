//! Event encoding and in-buffer compression.
//!
//! Items are encoded once, on arrival, as compact JSON. Large encodings are
//! zstd-compressed while they sit in a channel buffer and restored to the
//! exact original bytes when the buffer is flushed, so compression never
//! reaches the wire.

use bytes::Bytes;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, warn};
use vigil_settings::StreamSettings;

use crate::errors::CodecError;

/// Serialize a value to compact JSON.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// zstd-compress `bytes` at the default level.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(bytes, zstd::DEFAULT_COMPRESSION_LEVEL).map_err(CodecError::Compress)
}

/// Inverse of [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(bytes).map_err(CodecError::Decompress)
}

/// Reinterpret restored bytes as a JSON document for embedding in a batch.
pub fn to_raw_json(bytes: &[u8]) -> Result<Box<RawValue>, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|e| CodecError::Corrupt(e.to_string()))?;
    RawValue::from_string(text.to_owned()).map_err(|e| CodecError::Corrupt(e.to_string()))
}

/// How a buffered item is held in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredForm {
    /// The encoded bytes as produced by [`encode`].
    Raw(Bytes),
    /// zstd-compressed encoding.
    Compressed {
        /// Compressed bytes.
        bytes: Bytes,
        /// Length of the encoding before compression.
        original_len: usize,
    },
}

impl StoredForm {
    /// Whether the item is held compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed { .. })
    }

    /// Bytes occupied in the buffer.
    pub fn stored_len(&self) -> usize {
        match self {
            Self::Raw(bytes) | Self::Compressed { bytes, .. } => bytes.len(),
        }
    }

    /// Recover the original encoding.
    pub fn restore(&self) -> Result<Bytes, CodecError> {
        match self {
            Self::Raw(bytes) => Ok(bytes.clone()),
            Self::Compressed { bytes, original_len } => {
                let restored = decompress(bytes)?;
                if restored.len() != *original_len {
                    return Err(CodecError::Corrupt(format!(
                        "expected {original_len} bytes, got {}",
                        restored.len()
                    )));
                }
                Ok(Bytes::from(restored))
            }
        }
    }
}

/// Compression policy for buffered items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    enabled: bool,
    threshold: usize,
}

impl Codec {
    /// Create a codec that compresses encodings longer than `threshold` bytes.
    pub fn new(enabled: bool, threshold: usize) -> Self {
        Self { enabled, threshold }
    }

    /// Codec configured from stream settings.
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self::new(
            settings.compression_enabled,
            settings.compression_threshold_bytes,
        )
    }

    /// True iff compression is enabled and `bytes` exceeds the threshold.
    pub fn should_compress(&self, bytes: &[u8]) -> bool {
        self.enabled && bytes.len() > self.threshold
    }

    /// Choose the stored form for an encoded item.
    ///
    /// Compression is kept only when it shrinks the item. A compression
    /// failure is logged and the raw form is stored instead.
    pub fn store(&self, encoded: Bytes) -> StoredForm {
        if !self.should_compress(&encoded) {
            return StoredForm::Raw(encoded);
        }
        match compress(&encoded) {
            Ok(compressed) if compressed.len() < encoded.len() => {
                metrics::histogram!("vigil_buffer_compression_ratio")
                    .record(compressed.len() as f64 / encoded.len() as f64);
                StoredForm::Compressed {
                    original_len: encoded.len(),
                    bytes: Bytes::from(compressed),
                }
            }
            Ok(compressed) => {
                debug!(
                    raw = encoded.len(),
                    compressed = compressed.len(),
                    "compression not beneficial, storing raw"
                );
                StoredForm::Raw(encoded)
            }
            Err(error) => {
                warn!(%error, len = encoded.len(), "compression failed, storing raw");
                StoredForm::Raw(encoded)
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default())
    }
}
