//! File-backed cache for recordings too large to index in memory.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::{
    CacheConfig, CacheError, CacheReader, CacheResult, Deferred, Handle, ReadCache, WriteCache,
};

#[derive(Debug)]
pub struct FileCache {
    file: File,
    len: u64,
    config: CacheConfig,
}

impl FileCache {
    /// Create (or truncate) the cache file at `path`.
    pub fn create(path: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), "created cache file");
        Ok(Self {
            file,
            len: 0,
            config,
        })
    }

    /// Open an existing cache file; new regions are appended after its contents.
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, "opened cache file");
        Ok(Self { file, len, config })
    }

    /// Total committed bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ReadCache for FileCache {
    fn seek(&self, handle: Handle) -> CacheResult<CacheReader<'_>> {
        if handle > self.len {
            return Err(CacheError::OutOfBounds {
                handle,
                len: self.len,
            });
        }
        let region = RegionReader {
            file: &self.file,
            pos: handle,
            end: self.len,
        };
        Ok(CacheReader::new(BufReader::new(region)))
    }
}

impl WriteCache for FileCache {
    fn deferred(&self) -> Deferred {
        Deferred::new(self.config.compression_threshold)
    }

    fn commit(&mut self, region: Deferred) -> CacheResult<Handle> {
        let handle = self.len;
        let bytes = region.into_bytes();
        self.file.seek(SeekFrom::Start(handle))?;
        self.file.write_all(&bytes)?;
        self.len += bytes.len() as u64;
        Ok(handle)
    }
}

/// Reads through a shared file handle, re-seeking before every read so that several readers
/// can be interleaved.
struct RegionReader<'a> {
    file: &'a File,
    pos: u64,
    end: u64,
}

impl Read for RegionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let mut file = self.file;
        file.seek(SeekFrom::Start(self.pos))?;
        let n = file.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(cache: &FileCache, bytes: &[u8]) -> Deferred {
        let mut region = cache.deferred();
        region.write_all(bytes).unwrap();
        region
    }

    #[test]
    fn test_commit_and_seek() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::create(dir.path().join("replay.cache"), CacheConfig::default())
            .unwrap();

        let a = region(&cache, b"first");
        let b = region(&cache, b"second");
        let first = cache.commit(a).unwrap();
        let second = cache.commit(b).unwrap();
        assert_eq!((first, second), (0, 5));

        let mut out = Vec::new();
        cache.seek(second).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"second");
    }

    #[test]
    fn test_interleaved_readers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::create(dir.path().join("replay.cache"), CacheConfig::default())
            .unwrap();
        let a = region(&cache, &[1, 2, 3, 4]);
        let b = region(&cache, &[5, 6, 7, 8]);
        let first = cache.commit(a).unwrap();
        let second = cache.commit(b).unwrap();

        let mut left = cache.seek(first).unwrap();
        let mut right = cache.seek(second).unwrap();
        let mut byte = [0u8; 1];
        left.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 1);
        right.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 5);
        left.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], 2);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.cache");
        {
            let mut cache = FileCache::create(&path, CacheConfig::default()).unwrap();
            let a = region(&cache, b"kept");
            cache.commit(a).unwrap();
        }

        let mut cache = FileCache::open(&path, CacheConfig::default()).unwrap();
        assert_eq!(cache.len(), 4);
        let b = region(&cache, b"more");
        assert_eq!(cache.commit(b).unwrap(), 4);

        let mut out = Vec::new();
        cache.seek(0).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"keptmore");
    }

    #[test]
    fn test_seek_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::create(dir.path().join("empty.cache"), CacheConfig::default())
            .unwrap();
        assert!(matches!(
            cache.seek(1),
            Err(CacheError::OutOfBounds { handle: 1, len: 0 })
        ));
    }
}
