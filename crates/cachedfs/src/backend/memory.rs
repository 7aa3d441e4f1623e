//! In-memory reference backend.
//!
//! [`MemoryBackend`] keeps a tree of folders and byte files behind a single
//! mutex. It behaves like a remote service from the driver's point of view:
//! entries are snapshots that can go stale, every primitive is counted, and
//! test hooks can change the tree behind the cache's back.

use super::{Backend, CopyOptions, UploadOptions, UploadSink};
use crate::entry_cache::PathEntryCache;
use crate::error::{Error, Result};
use crate::path::VfsPath;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::mem;
use std::sync::Arc;
use tracing::trace;

/// Snapshot of one object in a [`MemoryBackend`].
///
/// The id is stable for the object's lifetime; an entry whose id no longer
/// matches the object at its path is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    /// Object id.
    pub id: u64,
    /// Name within the parent folder (empty for the root).
    pub name: String,
    /// Whether the object is a folder.
    pub is_folder: bool,
    /// Content length (zero for folders).
    pub size: u64,
}

/// Number of calls made to each backend primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct BackendCalls {
    pub root: u64,
    /// Folder listings, including those made by `lookup_child`.
    pub list: u64,
    pub create_folder: u64,
    pub remove: u64,
    pub has_children: u64,
    pub copy: u64,
    pub move_entry: u64,
    pub move_folder: u64,
    pub rename: u64,
    pub download: u64,
    pub upload: u64,
}

impl BackendCalls {
    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.root
            + self.list
            + self.create_folder
            + self.remove
            + self.has_children
            + self.copy
            + self.move_entry
            + self.move_folder
            + self.rename
            + self.download
            + self.upload
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    /// Child names in creation order.
    Folder(Vec<String>),
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    id: u64,
    kind: NodeKind,
}

impl Node {
    fn entry(&self, path: &VfsPath) -> MemoryEntry {
        let (is_folder, size) = match &self.kind {
            NodeKind::Folder(_) => (true, 0),
            NodeKind::File(data) => (false, data.len() as u64),
        };
        MemoryEntry {
            id: self.id,
            name: path.file_name().unwrap_or_default().to_string(),
            is_folder,
            size,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<VfsPath, Node>,
    next_id: u64,
    calls: BackendCalls,
    download_limit: Option<usize>,
    async_copy: Option<Arc<PathEntryCache<MemoryEntry>>>,
    pending_copies: Vec<(VfsPath, MemoryEntry)>,
    /// Names reported in listings instead of the real ones.
    reported_names: HashMap<VfsPath, String>,
    /// Paths that `lookup_child` fails to find while listings still show them.
    lookup_misses: HashSet<VfsPath>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            VfsPath::root(),
            Node {
                id: 0,
                kind: NodeKind::Folder(Vec::new()),
            },
        );
        Self {
            nodes,
            next_id: 1,
            calls: BackendCalls::default(),
            download_limit: None,
            async_copy: None,
            pending_copies: Vec::new(),
            reported_names: HashMap::new(),
            lookup_misses: HashSet::new(),
        }
    }

    /// The node at `path`, provided `entry` still refers to it.
    fn live(&self, path: &VfsPath, entry: &MemoryEntry) -> Result<&Node> {
        match self.nodes.get(path) {
            Some(node) if node.id == entry.id => Ok(node),
            _ => Err(Error::not_found(path)),
        }
    }

    fn live_folder(&self, path: &VfsPath, entry: &MemoryEntry) -> Result<&[String]> {
        match &self.live(path, entry)?.kind {
            NodeKind::Folder(children) => Ok(children.as_slice()),
            NodeKind::File(_) => Err(Error::NotADirectory { path: path.clone() }),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn link(&mut self, path: &VfsPath) -> Result<()> {
        let Some((parent, name)) = path.split() else {
            return Err(Error::already_exists(path));
        };
        match self.nodes.get_mut(&parent).map(|n| &mut n.kind) {
            Some(NodeKind::Folder(children)) => {
                children.push(name.to_string());
                Ok(())
            }
            Some(NodeKind::File(_)) => Err(Error::NotADirectory { path: parent }),
            None => Err(Error::not_found(&parent)),
        }
    }

    fn unlink(&mut self, path: &VfsPath) {
        if let Some((parent, name)) = path.split()
            && let Some(NodeKind::Folder(children)) = self.nodes.get_mut(&parent).map(|n| &mut n.kind)
        {
            children.retain(|c| c != name);
        }
    }

    fn insert(&mut self, path: &VfsPath, kind: NodeKind) -> Result<MemoryEntry> {
        if self.nodes.contains_key(path) {
            return Err(Error::already_exists(path));
        }
        self.link(path)?;
        let node = Node {
            id: self.alloc_id(),
            kind,
        };
        let entry = node.entry(path);
        self.nodes.insert(path.clone(), node);
        Ok(entry)
    }

    /// Remove `path` and everything below it.
    fn detach(&mut self, path: &VfsPath) -> Vec<(VfsPath, Node)> {
        self.unlink(path);
        let doomed: Vec<VfsPath> = self
            .nodes
            .keys()
            .filter(|p| *p == path || p.starts_with(path))
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|p| self.nodes.remove(&p).map(|n| (p, n)))
            .collect()
    }

    /// Move `source` and its subtree to `target`, keeping object ids.
    fn relocate(&mut self, source: &VfsPath, target: &VfsPath) -> Result<MemoryEntry> {
        if self.nodes.contains_key(target) {
            return Err(Error::already_exists(target));
        }
        if target.starts_with(source) {
            return Err(Error::Unsupported {
                path: target.clone(),
                reason: "cannot move a folder into itself",
            });
        }
        self.link(target)?;
        let prefix = source.as_str().len();
        for (path, node) in self.detach(source) {
            let new_path = if path == *source {
                target.clone()
            } else {
                target.join(&path.as_str()[prefix..])
            };
            self.nodes.insert(new_path, node);
        }
        self.nodes
            .get(target)
            .map(|n| n.entry(target))
            .ok_or_else(|| Error::not_found(target))
    }

    fn ensure_folders(&mut self, dir: &VfsPath) -> Result<()> {
        let mut current = VfsPath::root();
        for name in dir.components() {
            current = current.join(name);
            if !self.nodes.contains_key(&current) {
                self.insert(&current, NodeKind::Folder(Vec::new()))?;
            }
        }
        Ok(())
    }
}

/// Thread-safe in-memory storage service.
///
/// # Example
///
/// ```
/// use cachedfs::{Backend, MemoryBackend, VfsPath};
///
/// let backend = MemoryBackend::new();
/// backend.external_write("/docs/a.txt", b"hello");
///
/// let root = backend.root().unwrap();
/// let children = backend.list_children(&root, &VfsPath::root()).unwrap();
/// assert_eq!(children[0].name, "docs");
/// assert_eq!(backend.calls().total(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a backend holding only an empty root folder.
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Call counters since creation or the last [`reset_calls`](Self::reset_calls).
    pub fn calls(&self) -> BackendCalls {
        self.tree.lock().calls
    }

    /// Zero all call counters.
    pub fn reset_calls(&self) {
        self.tree.lock().calls = BackendCalls::default();
    }

    /// Create a folder and any missing ancestors, bypassing the counters.
    ///
    /// # Panics
    ///
    /// Panics if a file is in the way.
    pub fn external_mkdir(&self, path: impl Into<VfsPath>) {
        let path = path.into();
        self.tree
            .lock()
            .ensure_folders(&path)
            .unwrap_or_else(|e| panic!("external_mkdir({path}) failed: {e}"));
    }

    /// Create or overwrite a file, creating missing ancestors.
    ///
    /// Overwriting keeps the object id, so cached entries stay valid but
    /// report the old size.
    ///
    /// # Panics
    ///
    /// Panics if a file is in the way of an ancestor or if `path` is a folder.
    pub fn external_write(&self, path: impl Into<VfsPath>, data: &[u8]) {
        let path = path.into();
        let mut tree = self.tree.lock();
        if let Some(parent) = path.parent() {
            tree.ensure_folders(&parent)
                .unwrap_or_else(|e| panic!("external_write({path}) failed: {e}"));
        }
        if let Some(node) = tree.nodes.get_mut(&path) {
            assert!(
                matches!(node.kind, NodeKind::File(_)),
                "external_write({path}) would replace a folder"
            );
            node.kind = NodeKind::File(data.to_vec());
            return;
        }
        tree.insert(&path, NodeKind::File(data.to_vec()))
            .unwrap_or_else(|e| panic!("external_write({path}) failed: {e}"));
    }

    /// Report the object at `path` under `name` in folder listings.
    ///
    /// Simulates services that allow names which are not valid path
    /// components, such as names containing `/`.
    pub fn report_name(&self, path: impl Into<VfsPath>, name: impl Into<String>) {
        self.tree.lock().reported_names.insert(path.into(), name.into());
    }

    /// Make [`Backend::lookup_child`] miss `path` while listings of its parent
    /// still include it (`false` restores normal lookups).
    ///
    /// Simulates a single-item query that lags behind the folder listing.
    pub fn set_lookup_miss(&self, path: impl Into<VfsPath>, miss: bool) {
        let path = path.into();
        let mut tree = self.tree.lock();
        if miss {
            tree.lookup_misses.insert(path);
        } else {
            tree.lookup_misses.remove(&path);
        }
    }

    /// Remove an object and its subtree without going through the driver.
    pub fn external_remove(&self, path: impl Into<VfsPath>) {
        let path = path.into();
        self.tree.lock().detach(&path);
    }

    /// Whether an object exists at `path`.
    pub fn contains(&self, path: impl Into<VfsPath>) -> bool {
        self.tree.lock().nodes.contains_key(&path.into())
    }

    /// Content of the file at `path`.
    pub fn read_file(&self, path: impl Into<VfsPath>) -> Option<Vec<u8>> {
        match self.tree.lock().nodes.get(&path.into()).map(|n| &n.kind) {
            Some(NodeKind::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Names of the children of the folder at `path`, in creation order.
    pub fn child_names(&self, path: impl Into<VfsPath>) -> Option<Vec<String>> {
        match self.tree.lock().nodes.get(&path.into()).map(|n| &n.kind) {
            Some(NodeKind::Folder(children)) => Some(children.clone()),
            _ => None,
        }
    }

    /// Cut every download short after `limit` bytes (`None` restores full
    /// downloads).
    pub fn truncate_downloads(&self, limit: Option<usize>) {
        self.tree.lock().download_limit = limit;
    }

    /// Complete copies asynchronously.
    ///
    /// While set, [`Backend::copy`] performs the copy but returns `None`. The
    /// new entries are handed to `cache` by
    /// [`complete_async_copies`](Self::complete_async_copies).
    pub fn set_async_copy(&self, cache: Option<Arc<PathEntryCache<MemoryEntry>>>) {
        self.tree.lock().async_copy = cache;
    }

    /// Register finished asynchronous copies in the shared cache.
    ///
    /// Returns the number of entries registered.
    pub fn complete_async_copies(&self) -> usize {
        let (cache, pending) = {
            let mut tree = self.tree.lock();
            (tree.async_copy.clone(), mem::take(&mut tree.pending_copies))
        };
        let Some(cache) = cache else {
            return 0;
        };
        let count = pending.len();
        for (path, entry) in pending {
            cache.add_entry(path, entry);
        }
        count
    }
}

impl Backend for MemoryBackend {
    type Entry = MemoryEntry;

    fn root(&self) -> Result<MemoryEntry> {
        let mut tree = self.tree.lock();
        tree.calls.root += 1;
        let root = VfsPath::root();
        tree.nodes
            .get(&root)
            .map(|n| n.entry(&root))
            .ok_or_else(|| Error::not_found(&root))
    }

    fn is_folder(&self, entry: &MemoryEntry) -> bool {
        entry.is_folder
    }

    fn file_name(&self, entry: &MemoryEntry) -> String {
        entry.name.clone()
    }

    fn size(&self, entry: &MemoryEntry) -> u64 {
        entry.size
    }

    fn list_children(&self, dir: &MemoryEntry, dir_path: &VfsPath) -> Result<Vec<MemoryEntry>> {
        let mut tree = self.tree.lock();
        tree.calls.list += 1;
        trace!(path = %dir_path, "MemoryBackend list");
        let names = tree.live_folder(dir_path, dir)?;
        Ok(names
            .iter()
            .filter_map(|name| {
                let path = dir_path.join(name);
                let mut entry = tree.nodes.get(&path).map(|n| n.entry(&path))?;
                if let Some(reported) = tree.reported_names.get(&path) {
                    entry.name.clone_from(reported);
                }
                Some(entry)
            })
            .collect())
    }

    fn lookup_child(
        &self,
        parent: &MemoryEntry,
        parent_path: &VfsPath,
        name: &str,
    ) -> Result<Option<MemoryEntry>> {
        let found = self
            .list_children(parent, parent_path)?
            .into_iter()
            .find(|child| child.name == name);
        if self.tree.lock().lookup_misses.contains(&parent_path.join(name)) {
            trace!(path = %parent_path, name, "MemoryBackend lookup miss");
            return Ok(None);
        }
        Ok(found)
    }

    fn create_folder(&self, parent: &MemoryEntry, path: &VfsPath) -> Result<MemoryEntry> {
        let mut tree = self.tree.lock();
        tree.calls.create_folder += 1;
        let parent_path = path.parent().unwrap_or_default();
        tree.live_folder(&parent_path, parent)?;
        tree.insert(path, NodeKind::Folder(Vec::new()))
    }

    fn remove(&self, entry: &MemoryEntry, path: &VfsPath) -> Result<()> {
        let mut tree = self.tree.lock();
        tree.calls.remove += 1;
        if let NodeKind::Folder(children) = &tree.live(path, entry)?.kind
            && !children.is_empty()
        {
            return Err(Error::DirectoryNotEmpty { path: path.clone() });
        }
        tree.detach(path);
        Ok(())
    }

    fn has_children(&self, dir: &MemoryEntry, dir_path: &VfsPath) -> Result<bool> {
        let mut tree = self.tree.lock();
        tree.calls.has_children += 1;
        Ok(!tree.live_folder(dir_path, dir)?.is_empty())
    }

    fn copy(
        &self,
        source: &MemoryEntry,
        target_parent: &MemoryEntry,
        source_path: &VfsPath,
        target: &VfsPath,
        options: &CopyOptions,
    ) -> Result<Option<MemoryEntry>> {
        let mut tree = self.tree.lock();
        tree.calls.copy += 1;
        let data = match &tree.live(source_path, source)?.kind {
            NodeKind::File(data) => data.clone(),
            NodeKind::Folder(_) => {
                return Err(Error::Unsupported {
                    path: source_path.clone(),
                    reason: "source can not be a folder",
                });
            }
        };
        tree.live_folder(&target.parent().unwrap_or_default(), target_parent)?;
        if options.replace_existing && tree.nodes.contains_key(target) {
            tree.detach(target);
        }
        let entry = tree.insert(target, NodeKind::File(data))?;

        if tree.async_copy.is_some() {
            tree.pending_copies.push((target.clone(), entry));
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn move_entry(
        &self,
        source: &MemoryEntry,
        target_parent: &MemoryEntry,
        source_path: &VfsPath,
        target: &VfsPath,
        _target_is_parent: bool,
    ) -> Result<MemoryEntry> {
        let mut tree = self.tree.lock();
        tree.calls.move_entry += 1;
        tree.live(source_path, source)?;
        tree.live_folder(&target.parent().unwrap_or_default(), target_parent)?;
        tree.relocate(source_path, target)
    }

    fn move_folder(
        &self,
        source: &MemoryEntry,
        target_parent: &MemoryEntry,
        source_path: &VfsPath,
        target: &VfsPath,
        _target_is_parent: bool,
    ) -> Result<MemoryEntry> {
        let mut tree = self.tree.lock();
        tree.calls.move_folder += 1;
        tree.live_folder(source_path, source)?;
        tree.live_folder(&target.parent().unwrap_or_default(), target_parent)?;
        tree.relocate(source_path, target)
    }

    fn rename(
        &self,
        source: &MemoryEntry,
        target_parent: &MemoryEntry,
        source_path: &VfsPath,
        target: &VfsPath,
    ) -> Result<MemoryEntry> {
        let mut tree = self.tree.lock();
        tree.calls.rename += 1;
        tree.live(source_path, source)?;
        tree.live_folder(&target.parent().unwrap_or_default(), target_parent)?;
        tree.relocate(source_path, target)
    }

    fn download(&self, entry: &MemoryEntry, path: &VfsPath) -> Result<Box<dyn Read + Send>> {
        let mut tree = self.tree.lock();
        tree.calls.download += 1;
        let mut data = match &tree.live(path, entry)?.kind {
            NodeKind::File(data) => data.clone(),
            NodeKind::Folder(_) => return Err(Error::IsADirectory { path: path.clone() }),
        };
        if let Some(limit) = tree.download_limit {
            data.truncate(limit);
        }
        Ok(Box::new(Cursor::new(data)))
    }

    fn upload(
        &self,
        parent: &MemoryEntry,
        path: &VfsPath,
        options: &UploadOptions,
    ) -> Result<Box<dyn UploadSink<MemoryEntry>>> {
        let mut tree = self.tree.lock();
        tree.calls.upload += 1;
        tree.live_folder(&path.parent().unwrap_or_default(), parent)?;

        let buffer = match tree.nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::Folder(_)) => return Err(Error::IsADirectory { path: path.clone() }),
            Some(NodeKind::File(data)) if options.append => data.clone(),
            Some(NodeKind::File(_)) if options.replace_existing => Vec::new(),
            Some(NodeKind::File(_)) => return Err(Error::already_exists(path)),
            None => Vec::new(),
        };

        Ok(Box::new(MemorySink {
            tree: Arc::clone(&self.tree),
            path: path.clone(),
            buffer,
        }))
    }
}

/// Buffers an upload and publishes it on commit.
struct MemorySink {
    tree: Arc<Mutex<Tree>>,
    path: VfsPath,
    buffer: Vec<u8>,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl UploadSink<MemoryEntry> for MemorySink {
    fn commit(self: Box<Self>) -> Result<Option<MemoryEntry>> {
        let MemorySink { tree, path, buffer } = *self;
        let mut tree = tree.lock();
        if let Some(node) = tree.nodes.get_mut(&path) {
            node.kind = NodeKind::File(buffer);
            return Ok(Some(node.entry(&path)));
        }
        tree.insert(&path, NodeKind::File(buffer)).map(Some)
    }
}
