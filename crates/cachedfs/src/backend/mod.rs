//! Storage backend abstraction.
//!
//! A [`Backend`] exposes the primitives of one remote storage service. The
//! [`CachingDriver`](crate::CachingDriver) composes these primitives into
//! filesystem operations and keeps the caches in step with them.
//!
//! # Architecture
//!
//! - [`Backend`]: per-service primitives over an opaque entry type
//! - [`UploadSink`]: a write stream that materializes an entry when committed
//!
//! Backend calls block the calling thread. Adapters that talk to a network
//! service are expected to do their own retries and timeouts; the driver
//! surfaces their errors unchanged.
//!
//! # Asynchronous completion
//!
//! Some services finish a copy or upload in the background. Such adapters
//! return `None` from [`Backend::copy`] or [`UploadSink::commit`] and later
//! register the finished entry through
//! [`CachingDriver::register_entry`](crate::CachingDriver::register_entry) or
//! [`PathEntryCache::add_entry`](crate::PathEntryCache::add_entry) on a shared
//! cache handle.

mod memory;

pub use memory::{BackendCalls, MemoryBackend, MemoryEntry};

use crate::error::Result;
use crate::path::VfsPath;
use std::fmt::Debug;
use std::io::{Read, Write};

/// Options for [`CachingDriver::copy`](crate::CachingDriver::copy).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing target instead of failing with `AlreadyExists`.
    pub replace_existing: bool,
}

impl CopyOptions {
    /// Options that replace an existing target.
    pub fn replace() -> Self {
        Self {
            replace_existing: true,
        }
    }
}

/// Options for [`CachingDriver::move_path`](crate::CachingDriver::move_path).
pub type MoveOptions = CopyOptions;

/// Options for opening a write stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Overwrite an existing file.
    pub replace_existing: bool,
    /// Append to an existing file instead of truncating it.
    pub append: bool,
}

impl UploadOptions {
    /// Options that overwrite an existing file.
    pub fn replace() -> Self {
        Self {
            replace_existing: true,
            append: false,
        }
    }

    /// Options that append to an existing file.
    pub fn append() -> Self {
        Self {
            replace_existing: false,
            append: true,
        }
    }
}

/// Access modes checked by
/// [`CachingDriver::check_access`](crate::CachingDriver::check_access).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read permission.
    Read,
    /// Write permission.
    Write,
    /// Execute permission.
    Execute,
}

/// A write stream into the backend.
///
/// Bytes written are not visible until [`commit`](UploadSink::commit)
/// succeeds. Dropping the sink without committing discards the upload.
pub trait UploadSink<E>: Write + Send {
    /// Finish the upload.
    ///
    /// Returns the materialized entry, or `None` if the backend completes the
    /// upload asynchronously and will register the entry itself.
    fn commit(self: Box<Self>) -> Result<Option<E>>;
}

/// Primitives of one storage service.
///
/// The entry type is an opaque handle (a remote object id, a metadata record,
/// ...). The driver only inspects it through [`is_folder`](Backend::is_folder),
/// [`exists`](Backend::exists), [`file_name`](Backend::file_name) and
/// [`size`](Backend::size).
///
/// Path arguments are always the paths the driver was asked to operate on,
/// so adapters that address objects by path can ignore the entries.
///
/// # Thread Safety
///
/// Backends must be `Send + Sync`; one instance is shared by every thread
/// using the driver.
pub trait Backend: Send + Sync {
    /// Opaque backend handle for one file or folder.
    type Entry: Clone + Send + Sync + Debug;

    /// Fetch the root folder.
    fn root(&self) -> Result<Self::Entry>;

    /// Whether the entry is a folder.
    fn is_folder(&self, entry: &Self::Entry) -> bool;

    /// Whether the entry refers to a live object.
    ///
    /// Services that return tombstones or placeholder records can override
    /// this.
    fn exists(&self, _entry: &Self::Entry) -> bool {
        true
    }

    /// The entry's name within its parent folder.
    fn file_name(&self, entry: &Self::Entry) -> String;

    /// Content length in bytes as reported by the service.
    fn size(&self, entry: &Self::Entry) -> u64;

    /// Enumerate the direct children of a folder.
    fn list_children(&self, dir: &Self::Entry, dir_path: &VfsPath) -> Result<Vec<Self::Entry>>;

    /// Find one child of a folder by name.
    ///
    /// Returns `Ok(None)` if no child has that name. The default
    /// implementation lists the folder; adapters with a cheaper single-item
    /// query should override it.
    fn lookup_child(
        &self,
        parent: &Self::Entry,
        parent_path: &VfsPath,
        name: &str,
    ) -> Result<Option<Self::Entry>> {
        Ok(self
            .list_children(parent, parent_path)?
            .into_iter()
            .find(|child| self.file_name(child) == name))
    }

    /// Create a folder at `path` inside `parent`.
    fn create_folder(&self, parent: &Self::Entry, path: &VfsPath) -> Result<Self::Entry>;

    /// Remove a file or empty folder.
    fn remove(&self, entry: &Self::Entry, path: &VfsPath) -> Result<()>;

    /// Whether a folder has at least one child.
    fn has_children(&self, dir: &Self::Entry, dir_path: &VfsPath) -> Result<bool>;

    /// Copy a file into `target_parent` as `target`.
    ///
    /// Returns `None` if the copy completes asynchronously.
    fn copy(
        &self,
        source: &Self::Entry,
        target_parent: &Self::Entry,
        source_path: &VfsPath,
        target: &VfsPath,
        options: &CopyOptions,
    ) -> Result<Option<Self::Entry>>;

    /// Move a file to `target`.
    ///
    /// `target` is the final path of the file. `target_is_parent` is set when
    /// the caller asked to move the file *into* an existing folder, in which
    /// case the name is unchanged and `target_parent` is that folder.
    fn move_entry(
        &self,
        source: &Self::Entry,
        target_parent: &Self::Entry,
        source_path: &VfsPath,
        target: &VfsPath,
        target_is_parent: bool,
    ) -> Result<Self::Entry>;

    /// Move a folder and its contents to `target`.
    ///
    /// Arguments have the same meaning as for [`move_entry`](Backend::move_entry).
    fn move_folder(
        &self,
        source: &Self::Entry,
        target_parent: &Self::Entry,
        source_path: &VfsPath,
        target: &VfsPath,
        target_is_parent: bool,
    ) -> Result<Self::Entry>;

    /// Rename an entry within the same folder.
    fn rename(
        &self,
        source: &Self::Entry,
        target_parent: &Self::Entry,
        source_path: &VfsPath,
        target: &VfsPath,
    ) -> Result<Self::Entry>;

    /// Open a reader over a file's content.
    fn download(&self, entry: &Self::Entry, path: &VfsPath) -> Result<Box<dyn Read + Send>>;

    /// Open a write stream for `path` inside `parent`.
    fn upload(
        &self,
        parent: &Self::Entry,
        path: &VfsPath,
        options: &UploadOptions,
    ) -> Result<Box<dyn UploadSink<Self::Entry>>>;
}
