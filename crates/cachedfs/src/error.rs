//! Error kinds surfaced by the caching driver.
//!
//! [`Error`] separates expected absence ([`Error::NotFound`]) from genuine
//! faults so callers can test for absence cheaply with
//! [`Error::is_not_found`]. Backend I/O failures are not translated or retried;
//! they surface as [`Error::Io`].
//!
//! [`ErrorCategory`] classifies every error into a semantic class that mount
//! front-ends can turn into a POSIX errno.

use crate::path::VfsPath;
use std::io;
use thiserror::Error;

/// Errors produced by the cache layer and by backend adapters.
#[derive(Error, Debug)]
pub enum Error {
    /// No entry exists at the path.
    #[error("Path not found: '{path}'")]
    NotFound {
        /// Path that was looked up.
        path: VfsPath,
    },

    /// An entry already exists at the path.
    #[error("Path already exists: '{path}'")]
    AlreadyExists {
        /// Path that is taken.
        path: VfsPath,
    },

    /// A directory was required but the entry is a file.
    #[error("Expected directory but found file: '{path}'")]
    NotADirectory {
        /// Path of the file.
        path: VfsPath,
    },

    /// The directory still has children.
    #[error("Directory not empty: '{path}'")]
    DirectoryNotEmpty {
        /// Path of the directory.
        path: VfsPath,
    },

    /// A file was required but the entry is a directory.
    #[error("Expected file but found directory: '{path}'")]
    IsADirectory {
        /// Path of the directory.
        path: VfsPath,
    },

    /// The operation is not supported for this kind of entry.
    #[error("Unsupported operation on '{path}': {reason}")]
    Unsupported {
        /// Path the operation was applied to.
        path: VfsPath,
        /// Why the operation was refused.
        reason: &'static str,
    },

    /// Access mode check failed.
    #[error("Access denied: '{path}'")]
    AccessDenied {
        /// Path whose access was checked.
        path: VfsPath,
    },

    /// A mutating operation was attempted on a read-only driver.
    #[error("Read-only filesystem: cannot modify '{path}'")]
    ReadOnly {
        /// Path the mutation targeted.
        path: VfsPath,
    },

    /// Backend or local I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn not_found(path: &VfsPath) -> Self {
        Error::NotFound { path: path.clone() }
    }

    pub(crate) fn already_exists(path: &VfsPath) -> Self {
        Error::AlreadyExists { path: path.clone() }
    }

    /// Whether this error reports expected absence rather than a fault.
    ///
    /// I/O errors of kind [`io::ErrorKind::NotFound`] coming from a backend
    /// count as absence as well.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// The semantic category of this error.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Result type for cache and driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic category for cache errors.
///
/// # Example
///
/// ```
/// use cachedfs::{Error, ErrorCategory, VfsPath};
///
/// let err = Error::NotFound { path: VfsPath::new("/test") };
/// assert_eq!(err.category(), ErrorCategory::NotFound);
/// assert_eq!(err.category().to_errno(), libc::ENOENT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Resource not found (ENOENT)
    NotFound,
    /// Resource already exists (EEXIST)
    AlreadyExists,
    /// Directory not empty (ENOTEMPTY)
    NotEmpty,
    /// Expected file but got directory (EISDIR)
    IsDirectory,
    /// Expected directory but got file (ENOTDIR)
    NotDirectory,
    /// Invalid path or argument (EINVAL)
    InvalidArgument,
    /// I/O failure (EIO)
    IoError,
    /// Permission denied (EACCES)
    PermissionDenied,
    /// Operation not supported (ENOTSUP)
    NotSupported,
    /// Read-only filesystem (EROFS)
    ReadOnly,
}

impl ErrorCategory {
    /// Converts this error category to a POSIX errno value.
    #[inline]
    pub fn to_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::InvalidArgument => libc::EINVAL,
            Self::IoError => libc::EIO,
            Self::PermissionDenied => libc::EACCES,
            Self::NotSupported => libc::ENOTSUP,
            Self::ReadOnly => libc::EROFS,
        }
    }

    /// Returns a human-readable name for this error category.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotEmpty => "NotEmpty",
            Self::IsDirectory => "IsDirectory",
            Self::NotDirectory => "NotDirectory",
            Self::InvalidArgument => "InvalidArgument",
            Self::IoError => "IoError",
            Self::PermissionDenied => "PermissionDenied",
            Self::NotSupported => "NotSupported",
            Self::ReadOnly => "ReadOnly",
        }
    }
}

impl From<&Error> for ErrorCategory {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound { .. } => Self::NotFound,
            Error::AlreadyExists { .. } => Self::AlreadyExists,
            Error::NotADirectory { .. } => Self::NotDirectory,
            Error::DirectoryNotEmpty { .. } => Self::NotEmpty,
            Error::IsADirectory { .. } => Self::IsDirectory,
            Error::Unsupported { .. } => Self::NotSupported,
            Error::AccessDenied { .. } => Self::PermissionDenied,
            Error::ReadOnly { .. } => Self::ReadOnly,
            Error::Io(source) => io_error_category(source),
        }
    }
}

impl From<&io::Error> for ErrorCategory {
    fn from(e: &io::Error) -> Self {
        io_error_category(e)
    }
}

/// Categorizes an I/O error based on its kind.
fn io_error_category(e: &io::Error) -> ErrorCategory {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCategory::NotFound,
        io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
        io::ErrorKind::AlreadyExists => ErrorCategory::AlreadyExists,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            ErrorCategory::InvalidArgument
        }
        io::ErrorKind::Unsupported => ErrorCategory::NotSupported,
        _ => ErrorCategory::IoError,
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(source) => source,
            other => {
                let kind = match other.category() {
                    ErrorCategory::NotFound => io::ErrorKind::NotFound,
                    ErrorCategory::AlreadyExists => io::ErrorKind::AlreadyExists,
                    ErrorCategory::PermissionDenied => io::ErrorKind::PermissionDenied,
                    ErrorCategory::NotSupported => io::ErrorKind::Unsupported,
                    ErrorCategory::IsDirectory => io::ErrorKind::IsADirectory,
                    ErrorCategory::NotDirectory => io::ErrorKind::NotADirectory,
                    ErrorCategory::NotEmpty => io::ErrorKind::DirectoryNotEmpty,
                    ErrorCategory::ReadOnly => io::ErrorKind::ReadOnlyFilesystem,
                    ErrorCategory::InvalidArgument => io::ErrorKind::InvalidInput,
                    ErrorCategory::IoError => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}
