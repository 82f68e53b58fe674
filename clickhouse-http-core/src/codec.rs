//! Compression codec trait and implementations.
//!
//! This module provides the [`Codec`] trait for whole-buffer compression and
//! the gzip implementation used by the HTTP interface:
//! - [`GzipCodec`]: Whole-buffer gzip compression
//! - [`GzipStreamEncoder`] / [`GzipStreamDecoder`]: Incremental gzip for bodies
//!   that arrive or leave in chunks

use bytes::Bytes;
use std::io::{self, Read, Write};

use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::{GzDecoder as GzWriteDecoder, GzEncoder};

/// Codec trait for whole-buffer compression.
///
/// Used when a complete body is in memory: full request bodies on the way
/// out and error bodies on the way in.
pub trait Codec: Send + Sync + 'static {
    /// Compress data.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// Gzip codec using flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipCodec {
    /// Create a new GzipCodec with the specified compression level.
    ///
    /// Level ranges from 0 (no compression) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for GzipCodec {
    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Bytes::from(decompressed))
    }
}

/// Incremental gzip compressor for request bodies produced in chunks.
///
/// Each call to [`push`](Self::push) returns whatever compressed output is
/// ready; the output may be empty while the deflate window fills.
pub struct GzipStreamEncoder {
    inner: GzEncoder<Vec<u8>>,
}

impl GzipStreamEncoder {
    /// Create an encoder with the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            inner: GzEncoder::new(Vec::new(), GzipLevel::new(level.min(9))),
        }
    }

    /// Feed one chunk and take the compressed bytes produced so far.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(chunk)?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }

    /// Write the gzip trailer and return the remaining output.
    pub fn finish(self) -> io::Result<Bytes> {
        self.inner.finish().map(Bytes::from)
    }
}

impl std::fmt::Debug for GzipStreamEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipStreamEncoder").finish_non_exhaustive()
    }
}

/// Incremental gzip decompressor for response bodies read chunk by chunk.
///
/// Chunk boundaries of the compressed input are unrelated to line boundaries
/// of the output; callers feed the output into a row cursor.
pub struct GzipStreamDecoder {
    inner: GzWriteDecoder<Vec<u8>>,
}

impl GzipStreamDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            inner: GzWriteDecoder::new(Vec::new()),
        }
    }

    /// Feed one compressed chunk and take the decompressed bytes produced.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.inner.write_all(chunk)?;
        self.inner.flush()?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }

    /// Verify the gzip trailer and return any remaining output.
    pub fn finish(mut self) -> io::Result<Bytes> {
        self.inner.try_finish()?;
        Ok(Bytes::from(std::mem::take(self.inner.get_mut())))
    }
}

impl Default for GzipStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GzipStreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipStreamDecoder").finish_non_exhaustive()
    }
}
