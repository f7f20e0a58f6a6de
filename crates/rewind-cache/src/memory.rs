//! In-memory cache, used by tests and short recordings.

use crate::{
    CacheConfig, CacheError, CacheReader, CacheResult, Deferred, Handle, ReadCache, WriteCache,
};

#[derive(Debug, Default)]
pub struct MemoryCache {
    bytes: Vec<u8>,
    config: CacheConfig,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            bytes: Vec::new(),
            config,
        }
    }

    /// Total committed bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ReadCache for MemoryCache {
    fn seek(&self, handle: Handle) -> CacheResult<CacheReader<'_>> {
        let start = usize::try_from(handle)
            .ok()
            .filter(|&start| start <= self.bytes.len())
            .ok_or(CacheError::OutOfBounds {
                handle,
                len: self.len(),
            })?;
        Ok(CacheReader::new(&self.bytes[start..]))
    }
}

impl WriteCache for MemoryCache {
    fn deferred(&self) -> Deferred {
        Deferred::new(self.config.compression_threshold)
    }

    fn commit(&mut self, region: Deferred) -> CacheResult<Handle> {
        let handle = self.len();
        self.bytes.extend_from_slice(&region.into_bytes());
        Ok(handle)
    }
}
