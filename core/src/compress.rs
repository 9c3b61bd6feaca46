//! Optional request body compression.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::TransportError;

/// Transforms an outgoing body. Returns the new body and the
/// `Content-Encoding` to advertise, or `None` to send the body unchanged.
pub trait Compressor: Send + Sync {
    fn maybe_wrap(&self, body: &[u8]) -> Result<Option<(Vec<u8>, &'static str)>, TransportError>;
}

/// Gzip-compresses every non-empty body.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipCompressor {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Compressor for GzipCompressor {
    fn maybe_wrap(&self, body: &[u8]) -> Result<Option<(Vec<u8>, &'static str)>, TransportError> {
        if body.is_empty() {
            return Ok(None);
        }
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), self.level);
        encoder
            .write_all(body)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Some((compressed, "gzip")))
    }
}
