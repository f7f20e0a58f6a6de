//! Append-only, seekable byte store for the rewind replay index.
//!
//! The index never keeps a whole replay in memory. Every tree it builds is serialized into a
//! region of this cache and addressed afterwards by a [`Handle`], the byte offset of the
//! region. Readers seek back to a handle whenever a tree is loaded.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Builder                                                            │
//! │    - cache.deferred()  → Deferred (in-memory buffer)                │
//! │    - encode count, Δtime, values into the Deferred                  │
//! │    - cache.commit(deferred) → Handle                                │
//! └─────────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Cache bytes (MemoryCache: Vec<u8>, FileCache: file on disk)        │
//! │    [ region 0 ][ region 1 ][ region 2 ] ...                         │
//! │    ^ handle 0  ^ handle n  ^ handle m                               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Loader                                                             │
//! │    - cache.seek(handle) → CacheReader (impl Read)                   │
//! │    - decode the region front to back                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Committed regions are immutable; reading the same handle twice yields the same bytes.

use std::io::{self, Read, Write};

use serde::Deserialize;

mod error;
mod file;
mod memory;

pub use error::{CacheError, CacheResult};
pub use file::FileCache;
pub use memory::MemoryCache;

/// Byte offset of a committed region.
pub type Handle = u64;

/// Frames at least this long are zlib-compressed by default.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 256;

/// Read side of the cache.
pub trait ReadCache {
    /// Cursor positioned at the start of the region at `handle`.
    fn seek(&self, handle: Handle) -> CacheResult<CacheReader<'_>>;
}

/// Write side of the cache.
pub trait WriteCache {
    /// Fresh region buffer carrying this cache's compression threshold.
    fn deferred(&self) -> Deferred;

    /// Append `region` and return its handle.
    fn commit(&mut self, region: Deferred) -> CacheResult<Handle>;
}

/// Byte cursor over committed cache contents.
///
/// Reading may continue past the end of the region it was opened at; decoders stop on their own.
pub struct CacheReader<'a> {
    inner: Box<dyn Read + 'a>,
}

impl<'a> CacheReader<'a> {
    pub(crate) fn new(inner: impl Read + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Read for CacheReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for CacheReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader").finish_non_exhaustive()
    }
}

/// A region being written; nothing reaches the cache until [`WriteCache::commit`].
#[derive(Debug, Clone, Default)]
pub struct Deferred {
    buf: Vec<u8>,
    compression_threshold: Option<usize>,
}

impl Deferred {
    #[must_use]
    pub fn new(compression_threshold: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            compression_threshold,
        }
    }

    /// Threshold to pass to the frame codec for packets written into this region.
    #[must_use]
    pub fn compression_threshold(&self) -> Option<usize> {
        self.compression_threshold
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for Deferred {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Cache tuning.
///
/// ```json
/// { "compression_threshold": 512 }
/// ```
///
/// `null` disables frame compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: Option<usize>,
}

fn default_compression_threshold() -> Option<usize> {
    Some(DEFAULT_COMPRESSION_THRESHOLD)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compression_threshold: default_compression_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_buffers_writes() {
        let mut region = Deferred::new(Some(64));
        assert!(region.is_empty());
        region.write_all(&[1, 2, 3]).unwrap();
        region.write_all(&[4]).unwrap();
        assert_eq!(region.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(region.len(), 4);
        assert_eq!(region.compression_threshold(), Some(64));
    }

    #[test]
    fn test_config_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.compression_threshold, Some(256));

        let config: CacheConfig =
            serde_json::from_str(r#"{"compression_threshold": null}"#).unwrap();
        assert_eq!(config.compression_threshold, None);
    }
}
