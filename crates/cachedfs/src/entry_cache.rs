//! Path-keyed metadata cache.
//!
//! [`PathEntryCache`] keeps two concurrent maps:
//!
//! - `entries`: path → backend entry (last writer wins)
//! - `children`: directory path → ordered list of child paths
//!
//! Neither map expires anything by time. Entries are created by lookups and
//! listings, overwritten by mutations and removed by delete, rename and move.
//!
//! # Consistency
//!
//! Each map is safe per key, but there is no transaction across the two maps.
//! A reader may observe an entry whose parent has no children list yet; that
//! is allowed and is reconciled by the next listing of the parent.

use crate::path::VfsPath;
use crate::stats::CacheStats;
use dashmap::DashMap;
use tracing::trace;

/// Thread-safe cache of backend entries and directory listings.
///
/// Shared between a [`CachingDriver`](crate::CachingDriver) and any
/// asynchronous backend adapter through `Arc<PathEntryCache<E>>`.
#[derive(Debug)]
pub struct PathEntryCache<E> {
    entries: DashMap<VfsPath, E>,
    children: DashMap<VfsPath, Vec<VfsPath>>,
    stats: CacheStats,
}

impl<E> Default for PathEntryCache<E> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            children: DashMap::new(),
            stats: CacheStats::new(),
        }
    }
}

impl<E: Clone> PathEntryCache<E> {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry is cached for `path`.
    #[inline]
    pub fn has_entry(&self, path: &VfsPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Get the cached entry for `path`.
    pub fn get_entry(&self, path: &VfsPath) -> Option<E> {
        let entry = self.entries.get(path).map(|e| e.value().clone());
        if entry.is_some() {
            trace!(path = %path, "Entry cache hit");
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        entry
    }

    /// Store `entry` for `path` without touching any children list.
    #[inline]
    pub fn put_entry(&self, path: VfsPath, entry: E) {
        self.entries.insert(path, entry);
        self.stats.record_insert();
    }

    /// Remove the entry for `path` without touching any children list.
    ///
    /// Returns the removed entry, if any.
    pub fn evict_entry(&self, path: &VfsPath) -> Option<E> {
        let removed = self.entries.remove(path).map(|(_, e)| e);
        if removed.is_some() {
            self.stats.record_eviction();
        }
        removed
    }

    /// Whether a children list is cached for `dir`.
    #[inline]
    pub fn has_children(&self, dir: &VfsPath) -> bool {
        self.children.contains_key(dir)
    }

    /// Get a copy of the cached children list of `dir`.
    pub fn get_children(&self, dir: &VfsPath) -> Option<Vec<VfsPath>> {
        self.children.get(dir).map(|c| c.value().clone())
    }

    /// Replace the children list of `dir`. Lists are never merged.
    pub fn put_children(&self, dir: VfsPath, children: Vec<VfsPath>) {
        self.children.insert(dir, children);
    }

    /// Number of cached children of `dir`, or `None` if `dir` was never listed.
    pub fn child_count(&self, dir: &VfsPath) -> Option<usize> {
        self.children.get(dir).map(|c| c.len())
    }

    /// Whether the cached children list of `dir` contains `path`.
    ///
    /// Returns `false` when `dir` has no cached list.
    pub fn children_contains(&self, dir: &VfsPath, path: &VfsPath) -> bool {
        self.children
            .get(dir)
            .is_some_and(|c| c.iter().any(|p| p == path))
    }

    /// Insert `entry` for `path` and record it in its parent's children list.
    ///
    /// The parent list is created if absent. A path is never listed twice.
    pub fn add_entry(&self, path: VfsPath, entry: E) {
        if let Some(parent) = path.parent() {
            let mut list = self.children.entry(parent).or_default();
            if !list.contains(&path) {
                list.push(path.clone());
            }
        }
        self.put_entry(path, entry);
    }

    /// Remove `path` from the entry map, from its parent's children list and
    /// drop its own children list.
    ///
    /// Idempotent: removing an uncached path is a no-op.
    pub fn remove_entry(&self, path: &VfsPath) {
        self.evict_entry(path);
        if let Some(parent) = path.parent()
            && let Some(mut list) = self.children.get_mut(&parent)
        {
            list.retain(|p| p != path);
        }
        self.children.remove(path);
    }

    /// Relocate a cached folder from `source` to `target`.
    ///
    /// The direct children of `source` are rewritten to live under `target`.
    /// Deeper descendants keep their old keys; they become unreachable from
    /// the moved folder's listing and are refreshed on the next lookup.
    pub fn move_entry(&self, source: &VfsPath, target: VfsPath, entry: E) {
        let detached = self.children.remove(source).map(|(_, list)| list);
        self.remove_entry(source);
        self.add_entry(target.clone(), entry);

        if let Some(list) = detached {
            let rewritten = list
                .iter()
                .filter_map(|child| child.file_name().map(|name| target.join(name)))
                .collect();
            self.put_children(target, rewritten);
        }
    }

    /// Drop every entry and listing strictly below `ancestor`.
    ///
    /// `ancestor` itself is untouched. Returns the number of entries removed.
    ///
    /// Scans every cached entry and listing, so the cost grows with the
    /// whole cache rather than with the size of the subtree.
    pub fn remove_descendants(&self, ancestor: &VfsPath) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.starts_with(ancestor));
        self.children.retain(|path, _| !path.starts_with(ancestor));
        before.saturating_sub(self.entries.len())
    }

    /// Drop every cached entry and listing.
    pub fn clear(&self) {
        self.entries.clear();
        self.children.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached directory listings.
    pub fn listing_count(&self) -> usize {
        self.children.len()
    }

    /// Hit and miss counters for entry lookups.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
