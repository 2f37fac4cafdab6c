//! Storage error types.

use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached while resolving a path.
    #[error("not found: {path} ({message})")]
    NotFound {
        /// Full node path.
        path: String,
        /// Backend failure text.
        message: String,
    },

    /// Operation is not supported by the bound backend.
    #[error("backend does not support {operation}: {path}")]
    BackendUnsupported {
        /// Operation name (`write`, `list_versions`, ...).
        operation: &'static str,
        /// Full node path.
        path: String,
    },

    /// Path contains a `..` segment or otherwise escapes its mount.
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    /// Mutation attempted on a virtual node.
    #[error("virtual node is read-only: cannot {operation} {name}")]
    VirtualNode {
        /// Operation name.
        operation: &'static str,
        /// Virtual node description.
        name: String,
    },

    /// Virtual node references itself directly or transitively.
    #[error("cyclic virtual node: {0}")]
    CyclicVirtualNode(String),

    /// Mutation attempted on a node bound to a historical revision.
    #[error("cannot write to historical version {version_id} of {path}")]
    ImmutableVersion {
        /// Full node path.
        path: String,
        /// Bound revision identifier.
        version_id: String,
    },

    /// Ordinal selector outside the version list.
    #[error("{}", describe_version_index(*index, *n_versions))]
    VersionIndex {
        /// Requested ordinal.
        index: i64,
        /// Number of available versions.
        n_versions: usize,
    },

    /// Explicit version identifier not present in the version list.
    #[error("version {version_id} not found for {path}")]
    VersionNotFound {
        /// Full node path.
        path: String,
        /// Requested identifier.
        version_id: String,
    },

    /// No revision exists at or before the requested time.
    #[error("no version of {path} at or before {timestamp}")]
    NoVersionAtTime {
        /// Full node path.
        path: String,
        /// Requested point in time.
        timestamp: DateTime<Utc>,
    },

    /// Custom skip predicate failed.
    #[error("skip predicate failed for {path}: {message}")]
    SkipPredicate {
        /// Full source path.
        path: String,
        /// Predicate error text.
        message: String,
    },

    /// One side of a diff is not valid UTF-8 text.
    #[error("cannot diff binary content: {0}")]
    BinaryDiff(String),

    /// Per-file failure raised by a fail-fast copy.
    #[error("copy failed for {path}: {source}")]
    Copy {
        /// Full source path.
        path: String,
        /// Underlying failure.
        #[source]
        source: Box<StorageError>,
    },

    /// Mount name is not configured.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// Mount configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Mount permission level forbids the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation needs a file but the path is a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Operation needs a directory but the path is not one.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Path already exists where a new entry was requested.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Include/exclude pattern failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_version_index(index: i64, n_versions: usize) -> String {
    if n_versions == 0 {
        return format!("version index {index} out of range: no versions available");
    }
    format!(
        "version index {index} out of range: valid range is -{n_versions}..{}",
        n_versions - 1
    )
}

impl StorageError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a BackendUnsupported error.
    pub fn unsupported(operation: &'static str, path: impl Into<String>) -> Self {
        Self::BackendUnsupported {
            operation,
            path: path.into(),
        }
    }

    /// Create a PathTraversal error.
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap a per-file failure with the offending node path.
    pub fn copy(path: impl Into<String>, source: StorageError) -> Self {
        Self::Copy {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::StorageError;

    #[test]
    fn version_index_reports_requested_index_and_range() {
        let err = StorageError::VersionIndex {
            index: 5,
            n_versions: 3,
        };
        let txt = err.to_string();
        assert!(txt.contains('5'));
        assert!(txt.contains("-3..2"));
    }

    #[test]
    fn version_index_on_empty_history() {
        let err = StorageError::VersionIndex {
            index: -1,
            n_versions: 0,
        };
        assert!(err.to_string().contains("no versions available"));
    }

    #[test]
    fn copy_error_keeps_cause() {
        let err = StorageError::copy(
            "src:a.txt",
            StorageError::unsupported("write", "dst:a.txt"),
        );
        assert!(err.to_string().contains("src:a.txt"));
        assert!(err.to_string().contains("does not support write"));
    }
}
