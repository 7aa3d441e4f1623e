use cachedfs::{
    CachingDriver, ContentCache, DriverOptions, MemoryBackend, PathEntryCache, UploadOptions,
    UploadTracker, VfsPath,
};
use std::io::{Read, Write};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn p(path: &str) -> VfsPath {
    VfsPath::new(path)
}

/// Driver over a fresh in-memory backend with its content cache in a
/// private temp dir.
pub struct Fixture {
    pub backend: MemoryBackend,
    pub driver: CachingDriver<MemoryBackend>,
    // Declared last so the cache root is removed after the driver
    _cache_root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(DriverOptions::default())
    }

    pub fn with_options(options: DriverOptions) -> Self {
        init_tracing();
        let cache_root = TempDir::new().expect("Failed to create cache root");
        let backend = MemoryBackend::new();
        let content =
            ContentCache::new_in(cache_root.path()).expect("Failed to create content cache");
        let driver = CachingDriver::from_parts(
            Arc::new(backend.clone()),
            Arc::new(PathEntryCache::new()),
            Arc::new(content),
            Arc::new(UploadTracker::new()),
            options,
        );
        Self {
            backend,
            driver,
            _cache_root: cache_root,
        }
    }

    /// Upload `data` to `path` through the driver.
    #[allow(dead_code)]
    pub fn write(&self, path: &str, data: &[u8]) {
        let mut upload = self
            .driver
            .open_write(&p(path), UploadOptions::replace())
            .expect("Failed to open upload");
        upload.write_all(data).expect("Failed to write");
        upload.commit().expect("Failed to commit");
    }

    /// Read the whole file at `path` through the driver.
    #[allow(dead_code)]
    pub fn read(&self, path: &str) -> Vec<u8> {
        let mut reader = self.driver.open_read(&p(path)).expect("Failed to open");
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).expect("Failed to read");
        buf
    }

    /// Cached children of `dir`, or `None` if never listed.
    #[allow(dead_code)]
    pub fn cached_children(&self, dir: &str) -> Option<Vec<VfsPath>> {
        self.driver.entry_cache().get_children(&p(dir))
    }
}
