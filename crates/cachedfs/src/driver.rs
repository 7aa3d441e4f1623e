//! Filesystem operations over a cached backend.
//!
//! [`CachingDriver`] answers path-based filesystem requests from the
//! [`PathEntryCache`] where it can and goes to the [`Backend`] where it must.
//! Every mutation is applied to the backend first and then mirrored into the
//! cache.
//!
//! # Staleness
//!
//! The backend is the source of truth and may change behind the cache's back.
//! Staleness is discovered reactively:
//!
//! - a backend call that reports not-found for a cached entry evicts it
//! - a lookup miss for a child the parent's cached listing still names forces
//!   one fresh listing of the parent before giving up
//! - a fresh listing evicts children that have disappeared
//!
//! Nothing is expired by time.
//!
//! # Key Methods
//!
//! - **Lookup**: [`resolve`](CachingDriver::resolve), [`exists`](CachingDriver::exists), [`metadata`](CachingDriver::metadata)
//! - **Listing**: [`list`](CachingDriver::list), [`list_filtered`](CachingDriver::list_filtered)
//! - **Mutation**: [`create_dir`](CachingDriver::create_dir), [`delete`](CachingDriver::delete), [`copy`](CachingDriver::copy), [`move_path`](CachingDriver::move_path), [`rename`](CachingDriver::rename)
//! - **Content**: [`open_read`](CachingDriver::open_read), [`open_write`](CachingDriver::open_write)

use crate::backend::{AccessMode, Backend, CopyOptions, MoveOptions, UploadOptions};
use crate::content_cache::ContentCache;
use crate::entry_cache::PathEntryCache;
use crate::error::{Error, Result};
use crate::options::DriverOptions;
use crate::path::{VfsPath, is_component_name};
use crate::stream::UploadStream;
use crate::upload::{ProvisionalMetadata, UploadTracker};
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Metadata for a path: either the backend entry or, while an upload to the
/// path is in flight, the provisional view.
#[derive(Debug, Clone)]
pub enum Metadata<E> {
    /// Resolved backend entry.
    Entry(E),
    /// In-flight upload; always a regular file.
    Provisional(ProvisionalMetadata),
}

impl<E> Metadata<E> {
    /// Whether this is provisional upload metadata.
    pub fn is_provisional(&self) -> bool {
        matches!(self, Metadata::Provisional(_))
    }

    /// The backend entry, if resolved.
    pub fn entry(&self) -> Option<&E> {
        match self {
            Metadata::Entry(entry) => Some(entry),
            Metadata::Provisional(_) => None,
        }
    }
}

/// Caching filesystem driver over a [`Backend`].
///
/// # Thread Safety
///
/// The driver is `Send + Sync` and meant to be shared by many request
/// threads. Backend calls run on the calling thread; no cache lock is held
/// while the backend is working.
///
/// # Example
///
/// ```
/// use cachedfs::{CachingDriver, DriverOptions, MemoryBackend, VfsPath};
///
/// let backend = MemoryBackend::new();
/// backend.external_write("/docs/report.txt", b"quarterly");
///
/// let driver = CachingDriver::new(backend, DriverOptions::default()).unwrap();
/// let docs = driver.list(&VfsPath::new("/docs"), true).unwrap();
/// assert_eq!(docs, vec![VfsPath::new("/docs/report.txt")]);
/// ```
#[derive(Debug)]
pub struct CachingDriver<B: Backend> {
    backend: Arc<B>,
    entries: Arc<PathEntryCache<B::Entry>>,
    content: Arc<ContentCache>,
    uploads: Arc<UploadTracker>,
    options: DriverOptions,
}

impl<B: Backend> CachingDriver<B> {
    /// Create a driver with fresh caches.
    ///
    /// A content cache directory is created under the system temp dir unless
    /// [`DriverOptions::disable_file_cache`] is set.
    pub fn new(backend: B, options: DriverOptions) -> Result<Self> {
        let content = if options.disable_file_cache {
            ContentCache::disabled()
        } else {
            ContentCache::new()?
        };
        Ok(Self::from_parts(
            Arc::new(backend),
            Arc::new(PathEntryCache::new()),
            Arc::new(content),
            Arc::new(UploadTracker::new()),
            options,
        ))
    }

    /// Assemble a driver from shared components.
    ///
    /// Useful when an asynchronous backend needs a handle to the same entry
    /// cache, or when the content cache should live in a specific directory.
    pub fn from_parts(
        backend: Arc<B>,
        entries: Arc<PathEntryCache<B::Entry>>,
        content: Arc<ContentCache>,
        uploads: Arc<UploadTracker>,
        options: DriverOptions,
    ) -> Self {
        debug!(?options, content_cache = content.is_enabled(), "Creating caching driver");
        Self {
            backend,
            entries,
            content,
            uploads,
            options,
        }
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The shared entry cache.
    pub fn entry_cache(&self) -> &Arc<PathEntryCache<B::Entry>> {
        &self.entries
    }

    /// The shared content cache.
    pub fn content_cache(&self) -> &Arc<ContentCache> {
        &self.content
    }

    /// The shared upload tracker.
    pub fn uploads(&self) -> &Arc<UploadTracker> {
        &self.uploads
    }

    /// The options this driver was built with.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    // ==================== Lookup ====================

    /// Resolve `path` to its backend entry.
    ///
    /// Cached entries are returned without a backend call. Otherwise the
    /// parent is resolved first and the child looked up by name.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the path does not exist, or if it names an OS
    ///   metadata sidecar while `ignore_apple_double` is set
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn resolve(&self, path: &VfsPath) -> Result<B::Entry> {
        self.resolve_inner(path)
    }

    fn resolve_inner(&self, path: &VfsPath) -> Result<B::Entry> {
        if self.options.ignore_apple_double && path.is_apple_double() {
            trace!(path = %path, "Ignoring AppleDouble file");
            return Err(Error::not_found(path));
        }

        if let Some(entry) = self.entries.get_entry(path) {
            return Ok(entry);
        }

        let Some((parent_path, name)) = path.split() else {
            let root = self.backend.root()?;
            debug!("Cached root entry");
            self.entries.put_entry(VfsPath::root(), root.clone());
            return Ok(root);
        };

        let parent = self.resolve_inner(&parent_path)?;
        if !self.backend.is_folder(&parent) {
            return Err(Error::not_found(path));
        }

        let found = self.evict_on_not_found(
            &[&parent_path],
            self.backend.lookup_child(&parent, &parent_path, name),
        )?;
        match found {
            Some(entry) if self.backend.exists(&entry) => {
                debug!(path = %path, "Cached entry from backend");
                self.entries.add_entry(path.clone(), entry.clone());
                Ok(entry)
            }
            _ => self.heal_missing(path, &parent_path),
        }
    }

    /// The backend says `path` is gone. Make sure it is not left cached, and
    /// if the parent's listing still names it, re-list the parent once.
    fn heal_missing(&self, path: &VfsPath, parent_path: &VfsPath) -> Result<B::Entry> {
        let was_listed = self.entries.children_contains(parent_path, path);
        self.entries.remove_entry(path);

        if was_listed {
            warn!(path = %path, "Cached listing names a missing entry, re-listing parent");
            self.list_inner(parent_path, false)?;
            if let Some(entry) = self.entries.get_entry(path) {
                return Ok(entry);
            }
        }
        Err(Error::not_found(path))
    }

    /// Whether `path` exists.
    ///
    /// Absence is `Ok(false)`; other failures are propagated.
    pub fn exists(&self, path: &VfsPath) -> Result<bool> {
        match self.resolve(path) {
            Ok(entry) => Ok(self.backend.exists(&entry)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the cached entry for `path` and resolve it again.
    ///
    /// The path stays in its parent's cached listing, so if the backend no
    /// longer has it the parent is re-listed.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn refresh(&self, path: &VfsPath) -> Result<B::Entry> {
        self.entries.evict_entry(path);
        self.resolve_inner(path)
    }

    /// Metadata for `path`.
    ///
    /// While an upload to `path` is in flight the provisional view is
    /// returned without consulting the cache or the backend.
    pub fn metadata(&self, path: &VfsPath) -> Result<Metadata<B::Entry>> {
        if let Some(provisional) = self.uploads.entry(path) {
            trace!(path = %path, size = provisional.size, "Serving provisional metadata");
            return Ok(Metadata::Provisional(provisional));
        }
        self.resolve(path).map(Metadata::Entry)
    }

    /// Check whether `path` may be accessed with `modes`.
    ///
    /// Paths being uploaded always pass. Folders pass any mode. Files are
    /// never executable. A read-only driver denies [`AccessMode::Write`].
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn check_access(&self, path: &VfsPath, modes: &[AccessMode]) -> Result<()> {
        if self.uploads.is_uploading(path) {
            trace!(path = %path, "Uploading, access granted");
            return Ok(());
        }

        let entry = self.resolve_inner(path)?;
        if self.options.read_only && modes.contains(&AccessMode::Write) {
            return Err(Error::ReadOnly { path: path.clone() });
        }
        if self.backend.is_folder(&entry) {
            return Ok(());
        }
        if modes.contains(&AccessMode::Execute) {
            return Err(Error::AccessDenied { path: path.clone() });
        }
        Ok(())
    }

    // ==================== Listing ====================

    /// List the children of `dir`.
    ///
    /// With `use_cache` a cached listing is returned as is, without a backend
    /// call. Otherwise the backend is asked, every child entry is cached, and
    /// the cached listing is replaced.
    ///
    /// # Errors
    ///
    /// - [`Error::NotADirectory`] if `dir` is a file
    #[instrument(level = "debug", skip(self), fields(path = %dir))]
    pub fn list(&self, dir: &VfsPath, use_cache: bool) -> Result<Vec<VfsPath>> {
        self.list_inner(dir, use_cache)
    }

    fn list_inner(&self, dir: &VfsPath, use_cache: bool) -> Result<Vec<VfsPath>> {
        let entry = self.resolve_inner(dir)?;
        if !self.backend.is_folder(&entry) {
            return Err(Error::NotADirectory { path: dir.clone() });
        }

        if use_cache && let Some(children) = self.entries.get_children(dir) {
            trace!(path = %dir, count = children.len(), "Listing cache hit");
            return Ok(children);
        }

        let listed = self.evict_on_not_found(&[dir], self.backend.list_children(&entry, dir))?;
        let mut paths: Vec<VfsPath> = Vec::with_capacity(listed.len());
        let mut seen: HashSet<VfsPath> = HashSet::with_capacity(listed.len());
        for child in listed {
            let name = self.backend.file_name(&child);
            if !is_component_name(&name) {
                warn!(path = %dir, name = %name, "Skipping child with unusable name");
                continue;
            }
            let path = dir.join(&name);
            if self.options.ignore_apple_double && path.is_apple_double() {
                continue;
            }
            if !seen.insert(path.clone()) {
                continue;
            }
            self.entries.put_entry(path.clone(), child);
            paths.push(path);
        }

        if let Some(previous) = self.entries.get_children(dir) {
            for gone in previous.iter().filter(|p| !seen.contains(*p)) {
                trace!(path = %gone, "Evicting vanished child");
                self.entries.remove_entry(gone);
            }
        }

        debug!(path = %dir, count = paths.len(), "Listed directory from backend");
        self.entries.put_children(dir.clone(), paths.clone());
        Ok(paths)
    }

    /// List the children of `dir` that match `filter`, using the cached
    /// listing when present.
    pub fn list_filtered<F>(&self, dir: &VfsPath, filter: F) -> Result<Vec<VfsPath>>
    where
        F: Fn(&VfsPath) -> bool,
    {
        Ok(self
            .list(dir, true)?
            .into_iter()
            .filter(|p| filter(p))
            .collect())
    }

    // ==================== Mutation ====================

    /// Create the folder `dir`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if something already exists at `dir`
    /// - [`Error::NotADirectory`] if the parent is a file
    #[instrument(level = "debug", skip(self), fields(path = %dir))]
    pub fn create_dir(&self, dir: &VfsPath) -> Result<B::Entry> {
        self.check_writable(dir)?;
        if self.resolve_existing(dir)?.is_some() {
            return Err(Error::already_exists(dir));
        }

        let (parent_path, parent) = self.resolve_parent_folder(dir)?;
        let entry = self.evict_on_not_found(
            &[&parent_path],
            self.backend.create_folder(&parent, dir),
        )?;
        debug!(path = %dir, "Created folder");
        self.entries.add_entry(dir.clone(), entry.clone());
        Ok(entry)
    }

    /// Delete the file or empty folder at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::DirectoryNotEmpty`] if `path` is a folder with children
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn delete(&self, path: &VfsPath) -> Result<()> {
        self.check_writable(path)?;
        if path.is_root() {
            return Err(Error::Unsupported {
                path: path.clone(),
                reason: "the root cannot be deleted",
            });
        }

        let entry = self.resolve_inner(path)?;
        if self.backend.is_folder(&entry)
            && self.evict_on_not_found(&[path], self.backend.has_children(&entry, path))?
        {
            return Err(Error::DirectoryNotEmpty { path: path.clone() });
        }

        self.evict_on_not_found(&[path], self.backend.remove(&entry, path))?;
        debug!(path = %path, "Deleted");
        self.entries.remove_entry(path);
        self.content.discard(path);
        Ok(())
    }

    /// Copy the file `source` to `target`.
    ///
    /// If the backend completes the copy asynchronously nothing is cached for
    /// `target`; the backend registers the entry when it is done.
    ///
    /// # Errors
    ///
    /// - [`Error::Unsupported`] if `source` is a folder
    /// - [`Error::AlreadyExists`] if `target` exists and `replace_existing`
    ///   is not set
    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    pub fn copy(&self, source: &VfsPath, target: &VfsPath, options: CopyOptions) -> Result<()> {
        self.check_writable(target)?;

        let source_entry = self.resolve_inner(source)?;
        if self.backend.is_folder(&source_entry) {
            return Err(Error::Unsupported {
                path: source.clone(),
                reason: "source can not be a folder",
            });
        }

        if self.resolve_existing(target)?.is_some() {
            if !options.replace_existing {
                return Err(Error::already_exists(target));
            }
            self.delete(target)?;
        }

        let (parent_path, parent) = self.resolve_parent_folder(target)?;
        let copied = self.evict_on_not_found(
            &[source, &parent_path],
            self.backend.copy(&source_entry, &parent, source, target, &options),
        )?;
        match copied {
            Some(entry) => {
                debug!("Copied");
                self.entries.add_entry(target.clone(), entry);
            }
            None => debug!("Copy continues asynchronously"),
        }
        self.content.discard(target);
        Ok(())
    }

    /// Move `source` to `target`.
    ///
    /// | `target` is         | `replace_existing` | result                               |
    /// |---------------------|--------------------|--------------------------------------|
    /// | an empty folder     | yes                | target deleted, source moved there   |
    /// | a non-empty folder  | yes                | [`Error::DirectoryNotEmpty`]         |
    /// | a folder            | no                 | source moved *into* the folder       |
    /// | a file              | yes                | target deleted, source moved there   |
    /// | a file              | no                 | [`Error::AlreadyExists`]             |
    /// | absent, same parent | -                  | rename                               |
    /// | absent, elsewhere   | -                  | move                                 |
    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    pub fn move_path(&self, source: &VfsPath, target: &VfsPath, options: MoveOptions) -> Result<()> {
        self.check_writable(source)?;
        if source == target {
            return Ok(());
        }
        if source.is_root() || target.starts_with(source) {
            return Err(Error::Unsupported {
                path: target.clone(),
                reason: "cannot move a folder into itself",
            });
        }

        let source_entry = self.resolve_inner(source)?;

        if let Some(target_entry) = self.resolve_existing(target)? {
            if self.backend.is_folder(&target_entry) {
                if options.replace_existing {
                    if self.evict_on_not_found(
                        &[target],
                        self.backend.has_children(&target_entry, target),
                    )? {
                        return Err(Error::DirectoryNotEmpty {
                            path: target.clone(),
                        });
                    }
                    self.delete(target)?;
                    return self.relocate(source, &source_entry, target, false);
                }
                return self.relocate(source, &source_entry, target, true);
            }

            if !options.replace_existing {
                return Err(Error::already_exists(target));
            }
            self.delete(target)?;
            return self.relocate(source, &source_entry, target, false);
        }

        if source.parent() == target.parent() {
            self.rename(source, target).map(|_| ())
        } else {
            self.relocate(source, &source_entry, target, false)
        }
    }

    /// Ask the backend to move `source`, then mirror the move in the cache.
    fn relocate(
        &self,
        source: &VfsPath,
        source_entry: &B::Entry,
        target: &VfsPath,
        target_is_parent: bool,
    ) -> Result<()> {
        let final_path = if target_is_parent {
            match source.file_name() {
                Some(name) => target.join(name),
                None => return Err(Error::not_found(source)),
            }
        } else {
            target.clone()
        };
        let (parent_path, parent) = self.resolve_parent_folder(&final_path)?;

        if self.backend.is_folder(source_entry) {
            let moved = self.evict_on_not_found(
                &[source, &parent_path],
                self.backend.move_folder(
                    source_entry,
                    &parent,
                    source,
                    &final_path,
                    target_is_parent,
                ),
            )?;
            debug!(target = %final_path, "Moved folder");
            self.entries.remove_descendants(source);
            self.entries.move_entry(source, final_path.clone(), moved);
        } else {
            let moved = self.evict_on_not_found(
                &[source, &parent_path],
                self.backend.move_entry(
                    source_entry,
                    &parent,
                    source,
                    &final_path,
                    target_is_parent,
                ),
            )?;
            debug!(target = %final_path, "Moved file");
            self.entries.remove_entry(source);
            self.entries.add_entry(final_path.clone(), moved);
        }

        self.content.discard(source);
        self.content.discard(&final_path);
        Ok(())
    }

    /// Rename `source` to `target`.
    ///
    /// A renamed folder keeps its cached listing, rewritten under the new
    /// name; deeper cached entries are dropped.
    #[instrument(level = "debug", skip(self), fields(source = %source, target = %target))]
    pub fn rename(&self, source: &VfsPath, target: &VfsPath) -> Result<B::Entry> {
        self.check_writable(source)?;

        let source_entry = self.resolve_inner(source)?;
        let (parent_path, parent) = self.resolve_parent_folder(target)?;
        let renamed = self.evict_on_not_found(
            &[source, &parent_path],
            self.backend.rename(&source_entry, &parent, source, target),
        )?;

        debug!("Renamed");
        if self.backend.is_folder(&source_entry) {
            self.entries.remove_descendants(source);
            self.entries.move_entry(source, target.clone(), renamed.clone());
        } else {
            self.entries.remove_entry(source);
            self.entries.add_entry(target.clone(), renamed.clone());
        }
        self.content.discard(source);
        self.content.discard(target);
        Ok(renamed)
    }

    /// Record an entry that an asynchronous backend operation produced.
    pub fn register_entry(&self, path: VfsPath, entry: B::Entry) {
        debug!(path = %path, "Registering asynchronously completed entry");
        self.content.discard(&path);
        self.entries.add_entry(path, entry);
    }

    // ==================== Content ====================

    /// Open the file at `path` for reading.
    ///
    /// Content goes through the content cache unless it is disabled.
    ///
    /// # Errors
    ///
    /// - [`Error::IsADirectory`] if `path` is a folder
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn open_read(&self, path: &VfsPath) -> Result<Box<dyn Read + Send>> {
        let entry = self.resolve_inner(path)?;
        if self.backend.is_folder(&entry) {
            return Err(Error::IsADirectory { path: path.clone() });
        }

        let download = || self.evict_on_not_found(&[path], self.backend.download(&entry, path));
        if self.options.disable_file_cache {
            return download();
        }
        self.content.fetch(path, self.backend.size(&entry), download)
    }

    /// Open the file at `path` for writing.
    ///
    /// The upload is tracked until the returned stream is committed or
    /// dropped; meanwhile [`metadata`](Self::metadata) reports its progress.
    ///
    /// # Errors
    ///
    /// - [`Error::IsADirectory`] if `path` is a folder
    /// - [`Error::AlreadyExists`] if `path` is a file and neither
    ///   `replace_existing` nor `append` is set
    /// - [`Error::NotADirectory`] if the parent is a file
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub fn open_write(
        &self,
        path: &VfsPath,
        options: UploadOptions,
    ) -> Result<UploadStream<B::Entry>> {
        self.check_writable(path)?;

        let mut initial_size = 0;
        if let Some(existing) = self.resolve_existing(path)? {
            if self.backend.is_folder(&existing) {
                return Err(Error::IsADirectory { path: path.clone() });
            }
            if !options.replace_existing && !options.append {
                return Err(Error::already_exists(path));
            }
            if options.append {
                initial_size = self.backend.size(&existing);
            }
        }

        let (parent_path, parent) = self.resolve_parent_folder(path)?;
        let sink = self.evict_on_not_found(
            &[&parent_path],
            self.backend.upload(&parent, path, &options),
        )?;

        let ticket = self.uploads.start(path.clone(), initial_size);
        debug!(ticket, initial_size, "Upload opened");
        Ok(UploadStream::new(
            sink,
            path.clone(),
            ticket,
            initial_size,
            Arc::clone(&self.entries),
            Arc::clone(&self.content),
            Arc::clone(&self.uploads),
        ))
    }

    // ==================== Helpers ====================

    fn check_writable(&self, path: &VfsPath) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly { path: path.clone() });
        }
        Ok(())
    }

    /// Resolve `path`, mapping absence and non-existent entries to `None`.
    fn resolve_existing(&self, path: &VfsPath) -> Result<Option<B::Entry>> {
        match self.resolve_inner(path) {
            Ok(entry) if self.backend.exists(&entry) => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve the parent of `path`, which must be a folder.
    fn resolve_parent_folder(&self, path: &VfsPath) -> Result<(VfsPath, B::Entry)> {
        let Some(parent_path) = path.parent() else {
            return Err(Error::already_exists(path));
        };
        let parent = self.resolve_inner(&parent_path)?;
        if !self.backend.is_folder(&parent) {
            return Err(Error::NotADirectory { path: parent_path });
        }
        Ok((parent_path, parent))
    }

    /// Evict `paths` from the cache if the backend reports not-found.
    fn evict_on_not_found<T>(&self, paths: &[&VfsPath], result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_not_found()
        {
            for path in paths {
                warn!(path = %path, "Backend no longer has cached entry, evicting");
                self.entries.remove_entry(path);
            }
        }
        result
    }
}
