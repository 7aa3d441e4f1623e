//! Write stream returned by [`CachingDriver::open_write`](crate::CachingDriver::open_write).

use crate::backend::UploadSink;
use crate::content_cache::ContentCache;
use crate::entry_cache::PathEntryCache;
use crate::error::Result;
use crate::path::VfsPath;
use crate::upload::UploadTracker;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, trace};

/// An in-flight upload.
///
/// Bytes are forwarded to the backend sink and the upload tracker is kept
/// informed of the running size. [`commit`](UploadStream::commit) finishes the
/// upload and caches the resulting entry. Dropping the stream without
/// committing abandons it; the tracked upload ends either way.
pub struct UploadStream<E> {
    sink: Option<Box<dyn UploadSink<E>>>,
    path: VfsPath,
    ticket: u64,
    position: u64,
    entries: Arc<PathEntryCache<E>>,
    content: Arc<ContentCache>,
    uploads: Arc<UploadTracker>,
}

impl<E: Clone> UploadStream<E> {
    pub(crate) fn new(
        sink: Box<dyn UploadSink<E>>,
        path: VfsPath,
        ticket: u64,
        initial_size: u64,
        entries: Arc<PathEntryCache<E>>,
        content: Arc<ContentCache>,
        uploads: Arc<UploadTracker>,
    ) -> Self {
        Self {
            sink: Some(sink),
            path,
            ticket,
            position: initial_size,
            entries,
            content,
            uploads,
        }
    }

    /// Path being written.
    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    /// Bytes in the file so far, including any appended-to prefix.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Finish the upload.
    ///
    /// The materialized entry is added to the entry cache and any cached
    /// content for the path is dropped. `None` means the backend completes
    /// the upload asynchronously and registers the entry itself.
    pub fn commit(mut self) -> Result<Option<E>> {
        let Some(sink) = self.sink.take() else {
            return Ok(None);
        };
        let committed = sink.commit()?;

        self.content.discard(&self.path);
        match &committed {
            Some(entry) => {
                debug!(path = %self.path, size = self.position, "Upload committed");
                self.entries.add_entry(self.path.clone(), entry.clone());
            }
            None => debug!(path = %self.path, "Upload completes asynchronously"),
        }
        Ok(committed)
    }
}

impl<E> Write for UploadStream<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| io::Error::other("upload already finished"))?;
        let n = sink.write(buf)?;
        self.position += n as u64;
        self.uploads.observe(&self.path, self.position);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<E> Drop for UploadStream<E> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            trace!(path = %self.path, "Upload abandoned");
        }
        self.uploads.finish(&self.path, self.ticket);
    }
}

impl<E> fmt::Debug for UploadStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadStream")
            .field("path", &self.path)
            .field("ticket", &self.ticket)
            .field("position", &self.position)
            .field("finished", &self.sink.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend, UploadOptions};

    fn stream(
        backend: &MemoryBackend,
        path: &str,
        uploads: &Arc<UploadTracker>,
        entries: &Arc<PathEntryCache<crate::MemoryEntry>>,
    ) -> UploadStream<crate::MemoryEntry> {
        let path = VfsPath::new(path);
        let root = backend.root().unwrap();
        let sink = backend
            .upload(&root, &path, &UploadOptions::default())
            .unwrap();
        let ticket = uploads.start(path.clone(), 0);
        UploadStream::new(
            sink,
            path,
            ticket,
            0,
            Arc::clone(entries),
            Arc::new(ContentCache::disabled()),
            Arc::clone(uploads),
        )
    }

    #[test]
    fn test_write_updates_tracker() {
        let backend = MemoryBackend::new();
        let uploads = Arc::new(UploadTracker::new());
        let entries = Arc::new(PathEntryCache::new());
        let mut upload = stream(&backend, "/f", &uploads, &entries);

        upload.write_all(b"hello").unwrap();
        assert_eq!(upload.position(), 5);
        assert_eq!(uploads.entry(&VfsPath::new("/f")).unwrap().size, 5);

        let entry = upload.commit().unwrap().unwrap();
        assert_eq!(entry.size, 5);
        assert!(!uploads.is_uploading(&VfsPath::new("/f")));
        assert!(entries.has_entry(&VfsPath::new("/f")));
        assert_eq!(backend.read_file("/f").unwrap(), b"hello");
    }

    #[test]
    fn test_drop_abandons_upload() {
        let backend = MemoryBackend::new();
        let uploads = Arc::new(UploadTracker::new());
        let entries = Arc::new(PathEntryCache::new());
        {
            let mut upload = stream(&backend, "/f", &uploads, &entries);
            upload.write_all(b"partial").unwrap();
            assert!(uploads.is_uploading(&VfsPath::new("/f")));
        }
        assert!(!uploads.is_uploading(&VfsPath::new("/f")));
        assert!(!backend.contains("/f"));
        assert!(!entries.has_entry(&VfsPath::new("/f")));
    }
}
