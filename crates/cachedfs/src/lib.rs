//! Caching filesystem layer over remote storage backends.
//!
//! This crate presents a flat-API storage service (cloud drives, object
//! stores, ...) as a hierarchical filesystem addressed by absolute paths, and
//! keeps round trips to the service down with a metadata cache and a local
//! content cache.
//!
//! # Components
//!
//! ## Driver
//!
//! - [`CachingDriver`] - Filesystem operations composed from backend primitives
//! - [`Metadata`] - Resolved entry or provisional upload metadata
//! - [`UploadStream`] - In-flight write returned by [`CachingDriver::open_write`]
//! - [`DriverOptions`] - Behavior switches, loadable from an environment map
//!
//! ## Backend Abstraction
//!
//! - [`Backend`] - Primitives one storage service must provide
//! - [`UploadSink`] - Backend write stream that materializes an entry on commit
//! - [`MemoryBackend`] - In-memory reference backend with call counters
//!
//! ## Caches
//!
//! - [`PathEntryCache`] - Path to entry map plus per-folder child listings
//! - [`ContentCache`] - Downloaded file content stored on local disk
//! - [`UploadTracker`] - Paths with an upload in progress
//! - [`stats`] - Hit, miss and eviction counters
//!
//! ## Shared Types
//!
//! - [`VfsPath`] - Normalized absolute path
//! - [`Error`] / [`ErrorCategory`] - Error type and its POSIX classification
//!
//! # Why These Components?
//!
//! ## PathEntryCache
//!
//! Remote services address objects by id, not by path. Resolving
//! `/a/b/c` without a cache costs one lookup per component. The entry cache
//! remembers every resolved path and every listed folder, so repeated
//! resolution and listing cost no backend calls. Entries never expire; stale
//! ones are evicted when the backend reports them missing.
//!
//! ## ContentCache
//!
//! Downloads are slow and often repeated (thumbnails, editors re-reading a
//! file). Completed downloads whose length matches the backend's reported
//! size are kept in a private temporary directory until the cache is
//! disposed.
//!
//! ## UploadTracker
//!
//! A file being written does not exist on the backend until the upload is
//! committed, but callers still stat it. The tracker answers those stats with
//! the bytes written so far.
//!
//! # Example
//!
//! ```
//! use cachedfs::{CachingDriver, DriverOptions, MemoryBackend, UploadOptions, VfsPath};
//! use std::io::{Read, Write};
//!
//! let backend = MemoryBackend::new();
//! let driver = CachingDriver::new(backend, DriverOptions::default()).unwrap();
//!
//! driver.create_dir(&VfsPath::new("/notes")).unwrap();
//!
//! let path = VfsPath::new("/notes/todo.txt");
//! let mut upload = driver.open_write(&path, UploadOptions::default()).unwrap();
//! upload.write_all(b"buy milk").unwrap();
//! upload.commit().unwrap();
//!
//! let mut content = String::new();
//! driver.open_read(&path).unwrap().read_to_string(&mut content).unwrap();
//! assert_eq!(content, "buy milk");
//!
//! assert_eq!(driver.list(&VfsPath::new("/notes"), true).unwrap(), vec![path]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod content_cache;
mod driver;
mod entry_cache;
mod error;
mod options;
mod path;
pub mod stats;
mod stream;
mod upload;

// Driver exports
pub use driver::{CachingDriver, Metadata};
pub use options::{DriverOptions, ENV_DISABLE_FILE_CACHE, ENV_IGNORE_APPLE_DOUBLE, ENV_READ_ONLY};
pub use stream::UploadStream;

// Backend abstraction exports
pub use backend::{
    AccessMode, Backend, BackendCalls, CopyOptions, MemoryBackend, MemoryEntry, MoveOptions,
    UploadOptions, UploadSink,
};

// Cache exports
pub use content_cache::ContentCache;
pub use entry_cache::PathEntryCache;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use upload::{ProvisionalMetadata, UploadTracker};

// Shared types
pub use error::{Error, ErrorCategory, Result};
pub use path::{VfsPath, is_apple_double_name, is_component_name};
