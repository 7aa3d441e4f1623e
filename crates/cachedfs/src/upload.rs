//! Provisional metadata for in-flight uploads.
//!
//! While a write handle is open the backend has not yet materialized the
//! target entry, so metadata queries for that path are answered from the
//! [`UploadTracker`] instead.
//!
//! # Upload Lifecycle
//!
//! 1. **Start**: a write handle opens and registers the target path
//! 2. **Observe**: each write raises the provisional size (never lowers it)
//! 3. **Finish**: commit, failure or drop removes the record

use crate::path::VfsPath;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::trace;

/// Snapshot of an in-flight upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalMetadata {
    /// Target path of the upload.
    pub path: VfsPath,
    /// Bytes known to be written so far.
    pub size: u64,
    /// When the write handle was opened.
    pub started: SystemTime,
}

#[derive(Debug)]
struct UploadState {
    ticket: u64,
    size: AtomicU64,
    started: SystemTime,
}

/// Concurrent registry of uploads keyed by target path.
///
/// Each [`start`](Self::start) hands out a ticket. Only the holder of the
/// current ticket for a path can [`finish`](Self::finish) it, so a stale
/// handle being dropped never erases a newer upload of the same path.
///
/// # Example
///
/// ```
/// use cachedfs::{UploadTracker, VfsPath};
///
/// let tracker = UploadTracker::new();
/// let path = VfsPath::new("/notes.txt");
///
/// let ticket = tracker.start(path.clone(), 0);
/// tracker.observe(&path, 128);
/// assert_eq!(tracker.entry(&path).unwrap().size, 128);
///
/// tracker.finish(&path, ticket);
/// assert!(!tracker.is_uploading(&path));
/// ```
#[derive(Debug)]
pub struct UploadTracker {
    uploads: DashMap<VfsPath, UploadState>,
    /// Starts at 1 (0 is never issued).
    next_ticket: AtomicU64,
}

impl Default for UploadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            uploads: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Register an upload to `path` with `initial_size` bytes already present.
    ///
    /// A second `start` for the same path replaces the first record.
    pub fn start(&self, path: VfsPath, initial_size: u64) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        trace!(path = %path, ticket, initial_size, "Upload started");
        self.uploads.insert(
            path,
            UploadState {
                ticket,
                size: AtomicU64::new(initial_size),
                started: SystemTime::now(),
            },
        );
        ticket
    }

    /// Provisional metadata for `path`, if an upload is in flight.
    pub fn entry(&self, path: &VfsPath) -> Option<ProvisionalMetadata> {
        self.uploads.get(path).map(|state| ProvisionalMetadata {
            path: path.clone(),
            size: state.size.load(Ordering::Acquire),
            started: state.started,
        })
    }

    /// Report that `path` now holds at least `size` bytes.
    ///
    /// The provisional size never decreases.
    #[inline]
    pub fn observe(&self, path: &VfsPath, size: u64) {
        if let Some(state) = self.uploads.get(path) {
            state.size.fetch_max(size, Ordering::AcqRel);
        }
    }

    /// Remove the record for `path` if it still belongs to `ticket`.
    ///
    /// Returns `true` if a record was removed.
    pub fn finish(&self, path: &VfsPath, ticket: u64) -> bool {
        match self.uploads.entry(path.clone()) {
            Entry::Occupied(occupied) if occupied.get().ticket == ticket => {
                occupied.remove();
                trace!(path = %path, ticket, "Upload finished");
                true
            }
            _ => false,
        }
    }

    /// Whether an upload to `path` is in flight.
    #[inline]
    pub fn is_uploading(&self, path: &VfsPath) -> bool {
        self.uploads.contains_key(path)
    }

    /// Number of uploads in flight.
    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    /// Whether no upload is in flight.
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}
