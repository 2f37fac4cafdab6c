//! Memory backend wrapper that fails chosen operations on chosen paths.

use std::collections::HashSet;
use std::io;

use parking_lot::Mutex;

use super::{MemoryBackend, StorageBackend, StorageWriteStream, TypeReadStream};
use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::SpecNodeStat;

/// Operations `fail` understands: `stat`, `read`, `write`, `list_dir`, `digest`.
#[derive(Debug, Default)]
pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    set_faults: Mutex<HashSet<(&'static str, String)>>,
}

impl FaultyBackend {
    pub(crate) fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            set_faults: Mutex::new(HashSet::new()),
        }
    }

    /// Make `operation` on `path` fail from now on.
    pub(crate) fn fail(&self, operation: &'static str, path: &str) {
        self.set_faults.lock().insert((operation, path.to_string()));
    }

    fn check(&self, operation: &'static str, path: &str) -> StorageResult<()> {
        if self.set_faults.lock().contains(&(operation, path.to_string())) {
            return Err(StorageError::Io(io::Error::other(format!(
                "injected {operation} failure on {path}"
            ))));
        }
        Ok(())
    }
}

impl StorageBackend for FaultyBackend {
    fn kind(&self) -> &'static str {
        "faulty"
    }

    fn capabilities(&self) -> SpecBackendCapabilities {
        self.inner.capabilities()
    }

    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>> {
        self.check("stat", path)?;
        self.inner.stat(path)
    }

    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream> {
        self.check("read", path)?;
        self.inner.open_read(path)
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        self.check("write", path)?;
        self.inner.open_write(path)
    }

    fn write_bytes(&self, path: &str, data: &[u8]) -> StorageResult<String> {
        self.check("write", path)?;
        self.inner.write_bytes(path, data)
    }

    fn delete(&self, path: &str, if_recursive: bool) -> StorageResult<()> {
        self.inner.delete(path, if_recursive)
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        self.inner.mkdir(path)
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        self.check("list_dir", path)?;
        self.inner.list_dir(path)
    }

    fn remote_digest(&self, path: &str) -> StorageResult<Option<String>> {
        self.check("digest", path)?;
        self.inner.remote_digest(path)
    }
}
