//! Local on-disk cache of downloaded file content.
//!
//! Every cached file is stored as one blob directly under a private temporary
//! root directory. The blob name is the lowercase hex MD5 digest of the file's
//! absolute path, so the same path always maps to the same blob. MD5 is used
//! only to build a stable file name, not for integrity or security.
//!
//! # Integrity
//!
//! A download is kept only if its length equals the size the backend
//! reported for the entry. A short or long download is discarded: the caller
//! still receives the bytes that were fetched, but nothing is persisted, so
//! the next read goes back to the backend. A stored blob whose length no
//! longer matches the backend size is treated as a miss.
//!
//! # Teardown
//!
//! The whole root is deleted by [`ContentCache::dispose`] or when the cache is
//! dropped. Nothing survives a restart.

use crate::error::Result;
use crate::path::VfsPath;
use crate::stats::CacheStats;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{debug, trace, warn};

const ROOT_PREFIX: &str = "cachedfs-";

/// Disk-backed content cache keyed by path.
///
/// # Thread Safety
///
/// Concurrent misses for the same path each download into their own
/// temporary file and atomically rename it over the blob, so readers never
/// see a partially written blob. The last rename wins.
#[derive(Debug)]
pub struct ContentCache {
    /// `None` when caching is disabled or the cache has been disposed.
    dir: Mutex<Option<TempDir>>,
    stats: CacheStats,
}

impl ContentCache {
    /// Create a cache rooted in a fresh directory under the system temp dir.
    pub fn new() -> Result<Self> {
        let dir = Builder::new().prefix(ROOT_PREFIX).tempdir()?;
        debug!(root = %dir.path().display(), "Content cache created");
        Ok(Self::with_dir(Some(dir)))
    }

    /// Create a cache rooted in a fresh directory below `parent`.
    pub fn new_in(parent: impl AsRef<Path>) -> Result<Self> {
        let dir = Builder::new().prefix(ROOT_PREFIX).tempdir_in(parent)?;
        debug!(root = %dir.path().display(), "Content cache created");
        Ok(Self::with_dir(Some(dir)))
    }

    /// Create a pass-through cache that never stores anything.
    pub fn disabled() -> Self {
        debug!("Content cache disabled");
        Self::with_dir(None)
    }

    fn with_dir(dir: Option<TempDir>) -> Self {
        Self {
            dir: Mutex::new(dir),
            stats: CacheStats::new(),
        }
    }

    /// Blob file name for `path`.
    ///
    /// # Example
    ///
    /// ```
    /// use cachedfs::{ContentCache, VfsPath};
    ///
    /// let key = ContentCache::key_for(&VfsPath::new("/a/b"));
    /// assert_eq!(key.len(), 32);
    /// assert_eq!(key, format!("{:x}", md5::compute("/a/b")));
    /// ```
    pub fn key_for(path: &VfsPath) -> String {
        format!("{:x}", md5::compute(path.to_absolute_string().as_bytes()))
    }

    /// Root directory holding the blobs, or `None` if disabled or disposed.
    pub fn root(&self) -> Option<PathBuf> {
        self.dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Whether content is being cached.
    pub fn is_enabled(&self) -> bool {
        self.dir.lock().is_some()
    }

    /// Location of the blob for `path`, whether or not it exists yet.
    pub fn blob_path(&self, path: &VfsPath) -> Option<PathBuf> {
        self.root().map(|root| root.join(Self::key_for(path)))
    }

    /// Whether a valid blob is stored for `path`.
    pub fn contains(&self, path: &VfsPath) -> bool {
        self.blob_path(path).is_some_and(|blob| blob.is_file())
    }

    /// Return a reader over the content of `path`.
    ///
    /// On a hit the blob is read and `open` is not called. On a miss `open`
    /// supplies the backend stream, which is copied into the cache when its
    /// length equals `expected_size`.
    pub fn fetch<F>(
        &self,
        path: &VfsPath,
        expected_size: u64,
        open: F,
    ) -> Result<Box<dyn Read + Send>>
    where
        F: FnOnce() -> Result<Box<dyn Read + Send>>,
    {
        let Some(root) = self.root() else {
            trace!(path = %path, "Content cache bypassed");
            return open();
        };
        let blob = root.join(Self::key_for(path));

        match File::open(&blob) {
            Ok(file) if file.metadata()?.len() == expected_size => {
                trace!(path = %path, "Content cache hit");
                self.stats.record_hit();
                return Ok(Box::new(file));
            }
            Ok(file) => {
                drop(file);
                debug!(path = %path, "Cached blob has a stale size, downloading again");
                self.invalidate(path)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.stats.record_miss();
        debug!(path = %path, key = %blob.display(), "Downloading into content cache");

        let mut source = open()?;
        let mut temp = NamedTempFile::new_in(&root)?;
        let copied = io::copy(&mut source, &mut temp)?;

        let mut file = if copied == expected_size {
            let file = temp.persist(&blob).map_err(io::Error::from)?;
            self.stats.record_insert();
            debug!(path = %path, size = copied, "Content cached");
            file
        } else {
            warn!(
                path = %path,
                local = copied,
                expected = expected_size,
                "Downloaded size does not match backend size, not caching"
            );
            self.stats.record_rejected();
            temp.into_file()
        };
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }

    /// Delete the blob for `path`.
    ///
    /// Returns `true` if a blob was removed.
    pub fn invalidate(&self, path: &VfsPath) -> Result<bool> {
        let Some(blob) = self.blob_path(path) else {
            return Ok(false);
        };
        match std::fs::remove_file(&blob) {
            Ok(()) => {
                trace!(path = %path, "Content blob invalidated");
                self.stats.record_eviction();
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Invalidate the blob for `path`, logging instead of failing.
    pub(crate) fn discard(&self, path: &VfsPath) {
        if let Err(e) = self.invalidate(path) {
            warn!(path = %path, error = %e, "Failed to remove cached content");
        }
    }

    /// Remove the cache root and everything in it.
    ///
    /// Later fetches pass straight through to the backend. Calling this more
    /// than once is a no-op.
    pub fn dispose(&self) -> Result<()> {
        let Some(dir) = self.dir.lock().take() else {
            return Ok(());
        };
        debug!(root = %dir.path().display(), "Cleaning content cache");
        dir.close()?;
        Ok(())
    }

    /// Hit, miss and rejection counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(bytes: &'static [u8]) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_key_is_md5_of_absolute_path() {
        assert_eq!(
            ContentCache::key_for(&VfsPath::root()),
            "6666cd76f96956469e7be39d750cc7d9"
        );
        assert_eq!(
            ContentCache::key_for(&VfsPath::new("a/b")),
            ContentCache::key_for(&VfsPath::new("/a/./b"))
        );
    }

    #[test]
    fn test_miss_then_hit() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/doc.txt");
        let calls = AtomicUsize::new(0);

        let first = cache
            .fetch(&path, 5, || {
                calls.fetch_add(1, Ordering::SeqCst);
                source(b"hello")
            })
            .unwrap();
        assert_eq!(read_all(first), b"hello");
        assert!(cache.contains(&path));

        let second = cache
            .fetch(&path, 5, || {
                calls.fetch_add(1, Ordering::SeqCst);
                source(b"other")
            })
            .unwrap();
        assert_eq!(read_all(second), b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().snapshot();
        assert_eq!((stats.hits, stats.misses, stats.inserts), (1, 1, 1));
    }

    #[test]
    fn test_size_mismatch_serves_bytes_but_does_not_persist() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/short.bin");

        let reader = cache.fetch(&path, 10, || source(b"abc")).unwrap();
        assert_eq!(read_all(reader), b"abc");
        assert!(!cache.contains(&path));
        assert_eq!(cache.stats().rejected_count(), 1);

        let root = cache.root().unwrap();
        assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
    }

    #[test]
    fn test_stale_blob_is_replaced() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/grown.txt");

        read_all(cache.fetch(&path, 3, || source(b"old")).unwrap());
        let reader = cache.fetch(&path, 5, || source(b"newer")).unwrap();
        assert_eq!(read_all(reader), b"newer");

        let reader = cache.fetch(&path, 5, || source(b"xxxxx")).unwrap();
        assert_eq!(read_all(reader), b"newer");
    }

    #[test]
    fn test_disabled_passes_through() {
        let cache = ContentCache::disabled();
        let path = VfsPath::new("/x");
        assert!(!cache.is_enabled());
        assert!(cache.root().is_none());

        let reader = cache.fetch(&path, 3, || source(b"xyz")).unwrap();
        assert_eq!(read_all(reader), b"xyz");
        assert!(!cache.contains(&path));
        assert!(!cache.invalidate(&path).unwrap());
    }

    #[test]
    fn test_invalidate() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/f");

        read_all(cache.fetch(&path, 1, || source(b"1")).unwrap());
        assert!(cache.invalidate(&path).unwrap());
        assert!(!cache.contains(&path));
        assert!(!cache.invalidate(&path).unwrap());

        let reader = cache.fetch(&path, 1, || source(b"2")).unwrap();
        assert_eq!(read_all(reader), b"2");
    }

    #[test]
    fn test_backend_error_propagates() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/broken");

        let result = cache.fetch(&path, 1, || Err(io::Error::other("network down").into()));
        assert!(result.is_err());
        assert!(!cache.contains(&path));
    }

    #[test]
    fn test_dispose_removes_root() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ContentCache::new_in(temp.path()).unwrap();
        let path = VfsPath::new("/f");
        read_all(cache.fetch(&path, 1, || source(b"1")).unwrap());

        let root = cache.root().unwrap();
        assert!(root.starts_with(temp.path()));
        assert!(root.file_name().unwrap().to_string_lossy().starts_with(ROOT_PREFIX));

        cache.dispose().unwrap();
        assert!(!root.exists());
        assert!(!cache.is_enabled());
        cache.dispose().unwrap();
    }

    #[test]
    fn test_drop_removes_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = {
            let cache = ContentCache::new_in(temp.path()).unwrap();
            cache.root().unwrap()
        };
        assert!(!root.exists());
    }
}
