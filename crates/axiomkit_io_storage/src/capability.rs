//! Backend capability descriptor.
//!
//! Each backend instance carries one [`SpecBackendCapabilities`] value computed at
//! construction time. Queries are plain field reads and never touch the backend.

use std::fmt;

/// Immutable set of operations a backend instance supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecBackendCapabilities {
    /// Content can be read.
    pub read: bool,
    /// Content can be written.
    pub write: bool,
    /// Files and directories can be deleted.
    pub delete: bool,
    /// Directories can be created explicitly.
    pub mkdir: bool,
    /// Directory contents can be listed.
    pub list_dir: bool,
    /// Writes keep historical revisions.
    pub versioning: bool,
    /// Historical revisions can be enumerated.
    pub version_listing: bool,
    /// A specific historical revision can be opened.
    pub version_access: bool,
    /// Custom key/value metadata is supported.
    pub metadata: bool,
    /// Content digest is available without reading the content.
    pub hash_on_metadata: bool,
    /// Temporary signed URLs can be generated.
    pub presigned_urls: bool,
    /// Symbolic links are supported.
    pub symbolic_links: bool,
    /// Server-side copy is available.
    pub copy_optimization: bool,
    /// Backend refuses every mutation.
    pub readonly: bool,
    /// Content does not survive the process.
    pub temporary: bool,
}

impl Default for SpecBackendCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

impl SpecBackendCapabilities {
    /// Plain read/write/delete/list storage without versioning or metadata.
    pub const fn full() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
            mkdir: true,
            list_dir: true,
            versioning: false,
            version_listing: false,
            version_access: false,
            metadata: false,
            hash_on_metadata: false,
            presigned_urls: false,
            symbolic_links: false,
            copy_optimization: false,
            readonly: false,
            temporary: false,
        }
    }

    /// Read-only view: every mutation flag is cleared.
    pub const fn read_only(self) -> Self {
        Self {
            write: false,
            delete: false,
            mkdir: false,
            readonly: true,
            ..self
        }
    }

    /// Capabilities of a node bound to one historical revision.
    ///
    /// The snapshot itself is not versioned: it is a fixed read-only view.
    pub const fn versioned_snapshot(self) -> Self {
        Self {
            versioning: false,
            version_listing: false,
            version_access: false,
            list_dir: false,
            ..self.read_only()
        }
    }

    /// Enable revision history (listing + access).
    pub const fn with_versioning(self) -> Self {
        Self {
            versioning: true,
            version_listing: true,
            version_access: true,
            ..self
        }
    }
}

impl fmt::Display for SpecBackendCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l_features: Vec<&str> = [
            (self.versioning, "versioning"),
            (self.metadata, "metadata"),
            (self.presigned_urls, "presigned URLs"),
            (self.copy_optimization, "server-side copy"),
            (self.hash_on_metadata, "fast hashing"),
            (self.symbolic_links, "symbolic links"),
            (self.readonly, "read-only"),
            (self.temporary, "temporary storage"),
        ]
        .into_iter()
        .filter_map(|(b_enabled, c_name)| b_enabled.then_some(c_name))
        .collect();

        if l_features.is_empty() {
            return write!(f, "basic file operations");
        }
        write!(f, "{}", l_features.join(", "))
    }
}
