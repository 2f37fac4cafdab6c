//! Native local paths for tools that only read and write real files.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::spec::EnumLocalPathMode;
use crate::util::copy_stream_chunked;

enum EnumLocalFile {
    /// File already lives on local disk.
    Native(PathBuf),
    /// Staged copy, removed when dropped.
    Temporary(TempPath),
}

/// Local file standing in for a storage node.
///
/// Dropping the guard without [`LocalPathGuard::finish`] discards local changes
/// and removes any temporary copy.
pub struct LocalPathGuard<'a> {
    node: &'a StorageNode,
    enum_mode: EnumLocalPathMode,
    file_local: EnumLocalFile,
}

impl<'a> LocalPathGuard<'a> {
    pub(crate) fn open(
        node: &'a StorageNode,
        enum_mode: EnumLocalPathMode,
    ) -> StorageResult<Self> {
        if enum_mode.if_write() {
            node.guard_mutation("write", node.backend().capabilities().write)?;
        }
        match node.stat()? {
            Some(stat) if stat.is_dir => return Err(StorageError::IsADirectory(node.full_path())),
            None if enum_mode == EnumLocalPathMode::Read => {
                return Err(StorageError::not_found(
                    node.full_path(),
                    "no such file or directory",
                ));
            }
            _ => {}
        }

        if node.version().is_none()
            && let Some(path_native) = node.backend().local_fs_path(&node.path())
        {
            if enum_mode.if_write()
                && let Some(path_parent) = path_native.parent()
            {
                fs::create_dir_all(path_parent)?;
            }
            debug!(
                path = %node.full_path(),
                local = %path_native.display(),
                "native local path"
            );
            return Ok(Self {
                node,
                enum_mode,
                file_local: EnumLocalFile::Native(path_native),
            });
        }

        let mut file_tmp = tempfile::Builder::new()
            .prefix("axiomkit-")
            .suffix(node.suffix())
            .tempfile()?;
        if enum_mode.if_read() && node.is_file() {
            copy_stream_chunked(&mut node.open_read()?, file_tmp.as_file_mut())?;
        }
        let path_tmp = file_tmp.into_temp_path();
        debug!(path = %node.full_path(), local = %path_tmp.display(), "staged local copy");
        Ok(Self {
            node,
            enum_mode,
            file_local: EnumLocalFile::Temporary(path_tmp),
        })
    }

    /// Local file path.
    pub fn path(&self) -> &Path {
        match &self.file_local {
            EnumLocalFile::Native(path_native) => path_native.as_path(),
            EnumLocalFile::Temporary(path_tmp) => &**path_tmp,
        }
    }

    /// The path is a staged copy rather than the stored file itself.
    pub fn is_temporary(&self) -> bool {
        matches!(self.file_local, EnumLocalFile::Temporary(_))
    }

    /// Release the local path, uploading the local file in write modes.
    ///
    /// Returns the node the content now lives at.
    pub fn finish(self) -> StorageResult<StorageNode> {
        let Self {
            node,
            enum_mode,
            file_local,
        } = self;
        if !enum_mode.if_write() {
            return Ok(node.clone());
        }
        match file_local {
            EnumLocalFile::Native(_) => {
                node.invalidate_hash();
                Ok(node.clone())
            }
            EnumLocalFile::Temporary(path_tmp) => {
                let mut file = fs::File::open(&path_tmp)?;
                let node_new = node.write_from_reader(&mut file)?;
                drop(file);
                path_tmp.close()?;
                debug!(path = %node_new.full_path(), "uploaded staged local copy");
                Ok(node_new)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::backend::{Base64Backend, LocalBackend, MemoryBackend, RelativeBackend};
    use crate::error::StorageError;
    use crate::node::StorageNode;
    use crate::spec::{EnumLocalPathMode, EnumMountPermission};

    fn memory_node(path: &str) -> StorageNode {
        StorageNode::new("mem", Arc::new(MemoryBackend::new()), path).unwrap()
    }

    #[test]
    fn local_path_on_disk_is_the_file_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::new(tmp.path()));
        let node = StorageNode::new("disk", backend, "in/a.txt").unwrap();
        node.write_text("disk").unwrap();

        let guard = node.local_path(EnumLocalPathMode::Read).unwrap();
        assert!(!guard.is_temporary());
        assert_eq!(guard.path(), tmp.path().join("in/a.txt"));
        assert_eq!(fs::read_to_string(guard.path()).unwrap(), "disk");
        guard.finish().unwrap();
    }

    #[test]
    fn local_path_read_stages_content_and_cleans_up() {
        let node = memory_node("docs/report.csv");
        node.write_text("a,b\n1,2\n").unwrap();

        let guard = node.local_path(EnumLocalPathMode::Read).unwrap();
        assert!(guard.is_temporary());
        let path_local: PathBuf = guard.path().to_path_buf();
        assert_eq!(path_local.extension().unwrap(), "csv");
        assert_eq!(fs::read_to_string(&path_local).unwrap(), "a,b\n1,2\n");

        guard.finish().unwrap();
        assert!(!path_local.exists());
        assert_eq!(node.read_text().unwrap(), "a,b\n1,2\n");
    }

    #[test]
    fn local_path_write_uploads_on_finish() {
        let node = memory_node("out/result.txt");
        let guard = node.local_path(EnumLocalPathMode::Write).unwrap();
        fs::write(guard.path(), "produced").unwrap();
        assert!(!node.exists());

        let node_new = guard.finish().unwrap();
        assert_eq!(node_new.path(), "out/result.txt");
        assert_eq!(node.read_text().unwrap(), "produced");
    }

    #[test]
    fn local_path_dropped_guard_discards_changes() {
        let node = memory_node("keep.txt");
        node.write_text("original").unwrap();

        let guard = node.local_path(EnumLocalPathMode::ReadWrite).unwrap();
        let path_local = guard.path().to_path_buf();
        assert_eq!(fs::read_to_string(&path_local).unwrap(), "original");
        fs::write(&path_local, "edited").unwrap();
        drop(guard);

        assert!(!path_local.exists());
        assert_eq!(node.read_text().unwrap(), "original");
    }

    #[test]
    fn local_path_read_write_on_missing_file_starts_empty() {
        let node = memory_node("new.txt");
        let guard = node.local_path(EnumLocalPathMode::ReadWrite).unwrap();
        assert_eq!(fs::read(guard.path()).unwrap(), b"");
        fs::write(guard.path(), "fresh").unwrap();
        guard.finish().unwrap();
        assert_eq!(node.read_text().unwrap(), "fresh");
    }

    #[test]
    fn local_path_base64_write_returns_new_node() {
        let node = StorageNode::new("b64", Arc::new(Base64Backend::new()), "").unwrap();
        let guard = node.local_path(EnumLocalPathMode::Write).unwrap();
        fs::write(guard.path(), "Hello World").unwrap();
        let node_new = guard.finish().unwrap();
        assert_eq!(node_new.read_text().unwrap(), "Hello World");
    }

    #[test]
    fn local_path_rejects_directories_missing_files_and_read_only_mounts() {
        let node_dir = memory_node("d");
        node_dir.mkdir(true, false).unwrap();
        assert!(matches!(
            node_dir.local_path(EnumLocalPathMode::Read),
            Err(StorageError::IsADirectory(_))
        ));
        assert!(matches!(
            memory_node("missing.txt").local_path(EnumLocalPathMode::Read),
            Err(StorageError::NotFound { .. })
        ));

        let backend_ro = RelativeBackend::new(
            Arc::new(MemoryBackend::new()),
            "ro",
            EnumMountPermission::ReadOnly,
        );
        let node_ro = StorageNode::new("ro", Arc::new(backend_ro), "a.txt").unwrap();
        assert!(matches!(
            node_ro.local_path(EnumLocalPathMode::Write),
            Err(StorageError::PermissionDenied(_))
        ));
    }
}
