//! Hierarchical path keys for the entry and content caches.
//!
//! [`VfsPath`] is the key type used throughout the crate. It is always
//! interpreted as absolute: leading slashes are stripped, `.` components are
//! dropped and `..` components pop their parent (never above the root). Two
//! paths are cache-equal iff their normalized component sequences are equal.

use relative_path::{Component, RelativePath, RelativePathBuf};
use std::fmt;

/// File names created by macOS for resource forks and folder metadata.
///
/// With `ignoreAppleDouble` enabled these never reach the backend.
const APPLE_DOUBLE_NAMES: &[&str] = &[".DS_Store", ".localized", ".hidden"];

/// Absolute path within the cached filesystem.
///
/// Paths use `/` as the separator regardless of the host OS.
///
/// # Examples
///
/// ```
/// use cachedfs::VfsPath;
///
/// let path = VfsPath::new("/Documents/report.txt");
/// assert_eq!(path.file_name(), Some("report.txt"));
/// assert_eq!(path.parent().unwrap().to_string(), "/Documents");
///
/// // Paths are normalized
/// let path2 = VfsPath::new("Documents/./drafts/../report.txt");
/// assert_eq!(path, path2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfsPath(RelativePathBuf);

impl VfsPath {
    /// The root path (no components).
    #[inline]
    pub fn root() -> Self {
        VfsPath(RelativePathBuf::new())
    }

    /// Create a path from a string, normalizing it.
    pub fn new(path: impl AsRef<str>) -> Self {
        let raw = RelativePath::new(path.as_ref().trim_start_matches('/'));
        let mut normalized = RelativePathBuf::new();
        for component in raw.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::Normal(name) => normalized.push(name),
            }
        }
        VfsPath(normalized)
    }

    /// Check if this is the root path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.as_str().is_empty()
    }

    /// The path without its leading slash (`""` for the root).
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The absolute form of the path, e.g. `/a/b`.
    ///
    /// This string is what the content cache hashes into a blob name, so its
    /// format must stay stable.
    pub fn to_absolute_string(&self) -> String {
        format!("/{}", self.0)
    }

    /// Join this path with a single name or a relative sub-path.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachedfs::VfsPath;
    ///
    /// let docs = VfsPath::new("Documents");
    /// assert_eq!(docs.join("report.txt").to_string(), "/Documents/report.txt");
    /// ```
    pub fn join(&self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim_start_matches('/');
        VfsPath::new(self.0.join(name).as_str())
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<VfsPath> {
        self.0.parent().map(|p| VfsPath(p.to_relative_path_buf()))
    }

    /// The final component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Iterate over the name components of this path.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.components().map(|c| c.as_str())
    }

    /// Number of name components (zero for the root).
    pub fn component_count(&self) -> usize {
        self.components().count()
    }

    /// Split this path into its parent and final component.
    ///
    /// Returns `None` for the root path.
    pub fn split(&self) -> Option<(VfsPath, &str)> {
        let parent = self.parent()?;
        let name = self.file_name()?;
        Some((parent, name))
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn starts_with(&self, ancestor: &VfsPath) -> bool {
        self != ancestor && self.0.starts_with(&ancestor.0)
    }

    /// Whether the final component names an OS metadata sidecar file.
    ///
    /// Matches AppleDouble resource forks (`._*`) and Finder metadata
    /// (`.DS_Store`, `.localized`, `.hidden`).
    pub fn is_apple_double(&self) -> bool {
        self.file_name().is_some_and(is_apple_double_name)
    }
}

/// Whether `name` is exactly one normal path component.
///
/// Empty names, `.`, `..` and names containing `/` would be rewritten by
/// [`VfsPath::join`] and end up somewhere other than directly below the
/// folder they were listed in.
///
/// ```
/// use cachedfs::is_component_name;
///
/// assert!(is_component_name("report.txt"));
/// assert!(!is_component_name(".."));
/// assert!(!is_component_name("a/b"));
/// ```
pub fn is_component_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// Whether a bare file name is an OS metadata sidecar name.
pub fn is_apple_double_name(name: &str) -> bool {
    name.starts_with("._") || APPLE_DOUBLE_NAMES.contains(&name)
}

impl Default for VfsPath {
    fn default() -> Self {
        Self::root()
    }
}

impl AsRef<str> for VfsPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        VfsPath::new(s)
    }
}

impl From<String> for VfsPath {
    fn from(s: String) -> Self {
        VfsPath::new(s)
    }
}
