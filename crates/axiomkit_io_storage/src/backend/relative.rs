//! Sub-tree view of another backend with a permission level.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{StorageBackend, StorageWriteStream, TypeReadStream};
use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::{EnumMountPermission, SpecNodeStat, SpecVersionDescriptor};

/// Backend exposing `prefix/...` of a parent backend.
#[derive(Debug, Clone)]
pub struct RelativeBackend {
    backend_parent: Arc<dyn StorageBackend>,
    path_prefix: String,
    enum_permission: EnumMountPermission,
    caps: SpecBackendCapabilities,
}

impl RelativeBackend {
    /// View of `path_prefix` inside `backend_parent`; the prefix must be normalised.
    pub fn new(
        backend_parent: Arc<dyn StorageBackend>,
        path_prefix: impl Into<String>,
        enum_permission: EnumMountPermission,
    ) -> Self {
        let caps_parent = backend_parent.capabilities();
        let caps = match enum_permission {
            EnumMountPermission::ReadOnly => caps_parent.read_only(),
            EnumMountPermission::ReadWrite => SpecBackendCapabilities {
                delete: false,
                ..caps_parent
            },
            EnumMountPermission::Delete => caps_parent,
        };
        Self {
            backend_parent,
            path_prefix: path_prefix.into().trim_matches('/').to_string(),
            enum_permission,
            caps,
        }
    }

    /// Permission level of this mount.
    pub fn permission(&self) -> EnumMountPermission {
        self.enum_permission
    }

    fn to_parent(&self, path: &str) -> String {
        match (self.path_prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.path_prefix.clone(),
            (false, false) => format!("{}/{path}", self.path_prefix),
        }
    }

    fn from_parent(&self, path_parent: String) -> String {
        if self.path_prefix.is_empty() {
            return path_parent;
        }
        match path_parent.strip_prefix(&self.path_prefix) {
            Some(c_rest) if c_rest.is_empty() => String::new(),
            Some(c_rest) if c_rest.starts_with('/') => c_rest[1..].to_string(),
            _ => path_parent,
        }
    }

    fn check_write(&self) -> StorageResult<()> {
        if !self.enum_permission.allows_write() {
            return Err(StorageError::permission_denied(
                "mount is read-only; write operations are not permitted",
            ));
        }
        Ok(())
    }

    fn check_delete(&self) -> StorageResult<()> {
        if !self.enum_permission.allows_delete() {
            return Err(StorageError::permission_denied(format!(
                "mount does not have delete permission (current: {:?})",
                self.enum_permission
            )));
        }
        Ok(())
    }
}

struct RelativeWriteStream {
    stream: Box<dyn StorageWriteStream>,
    backend: RelativeBackend,
}

impl std::io::Write for RelativeWriteStream {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.stream.write(data)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl StorageWriteStream for RelativeWriteStream {
    fn finish(self: Box<Self>) -> StorageResult<String> {
        let Self { stream, backend } = *self;
        Ok(backend.from_parent(stream.finish()?))
    }
}

impl StorageBackend for RelativeBackend {
    fn kind(&self) -> &'static str {
        "relative"
    }

    fn capabilities(&self) -> SpecBackendCapabilities {
        self.caps
    }

    fn refusal(&self, operation: &'static str, path: &str) -> StorageError {
        let res_check = match operation {
            "delete" | "delete_version" => self.check_delete(),
            "write" | "mkdir" | "set_metadata" => self.check_write(),
            _ => Ok(()),
        };
        match res_check {
            Err(e) => e,
            Ok(()) => self.backend_parent.refusal(operation, &self.to_parent(path)),
        }
    }

    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>> {
        self.backend_parent.stat(&self.to_parent(path))
    }

    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream> {
        self.backend_parent.open_read(&self.to_parent(path))
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        self.check_write()?;
        let stream = self.backend_parent.open_write(&self.to_parent(path))?;
        Ok(Box::new(RelativeWriteStream {
            stream,
            backend: self.clone(),
        }))
    }

    fn write_bytes(&self, path: &str, data: &[u8]) -> StorageResult<String> {
        self.check_write()?;
        let path_parent = self
            .backend_parent
            .write_bytes(&self.to_parent(path), data)?;
        Ok(self.from_parent(path_parent))
    }

    fn delete(&self, path: &str, if_recursive: bool) -> StorageResult<()> {
        self.check_delete()?;
        self.backend_parent
            .delete(&self.to_parent(path), if_recursive)
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.check_write()?;
        self.backend_parent.mkdir(&self.to_parent(path))
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        self.backend_parent.list_dir(&self.to_parent(path))
    }

    fn remote_digest(&self, path: &str) -> StorageResult<Option<String>> {
        self.backend_parent.remote_digest(&self.to_parent(path))
    }

    fn list_versions(&self, path: &str) -> StorageResult<Vec<SpecVersionDescriptor>> {
        self.backend_parent.list_versions(&self.to_parent(path))
    }

    fn open_version(&self, path: &str, version_id: &str) -> StorageResult<TypeReadStream> {
        self.backend_parent
            .open_version(&self.to_parent(path), version_id)
    }

    fn delete_version(&self, path: &str, version_id: &str) -> StorageResult<()> {
        self.check_delete()?;
        self.backend_parent
            .delete_version(&self.to_parent(path), version_id)
    }

    fn get_metadata(&self, path: &str) -> StorageResult<BTreeMap<String, String>> {
        self.backend_parent.get_metadata(&self.to_parent(path))
    }

    fn set_metadata(&self, path: &str, metadata: &BTreeMap<String, String>) -> StorageResult<()> {
        self.check_write()?;
        self.backend_parent
            .set_metadata(&self.to_parent(path), metadata)
    }

    fn local_fs_path(&self, path: &str) -> Option<PathBuf> {
        self.backend_parent.local_fs_path(&self.to_parent(path))
    }
}
