//! Backend interface consumed by storage nodes, plus the built-in backends.
//!
//! Paths handed to a backend are already normalised: `/`-joined segments with no
//! leading slash, no `.` and no `..`. The empty path is the backend root.

mod base64;
#[cfg(test)]
mod faulty;
mod local;
mod memory;
mod relative;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::{SpecNodeStat, SpecVersionDescriptor};

pub use self::base64::Base64Backend;
pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
pub use self::relative::RelativeBackend;

#[cfg(test)]
pub(crate) use self::faulty::FaultyBackend;

/// Boxed chunked read stream.
pub type TypeReadStream = Box<dyn Read + Send>;

/// Chunked write stream returned by [`StorageBackend::open_write`].
///
/// Bytes become visible once [`StorageWriteStream::finish`] returns.
pub trait StorageWriteStream: Write + Send {
    /// Commit the written bytes and return the path the content now lives at.
    fn finish(self: Box<Self>) -> StorageResult<String>;
}

/// Raw storage operations for one storage technology.
///
/// Optional operations default to [`StorageError::BackendUnsupported`]; a backend
/// overriding one must also report the matching capability flag.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short backend type name (`local`, `memory`, ...).
    fn kind(&self) -> &'static str;

    /// Capability set computed at construction.
    fn capabilities(&self) -> SpecBackendCapabilities;

    /// Error reported when a caller asks for an operation the capabilities exclude.
    fn refusal(&self, operation: &'static str, path: &str) -> StorageError {
        StorageError::unsupported(operation, path)
    }

    /// Stat one path; `Ok(None)` when it does not exist.
    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>>;

    /// Path exists as a file or directory.
    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path)?.is_some())
    }

    /// Open a chunked read stream over a file.
    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream>;

    /// Open a chunked write stream replacing the file content.
    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        Err(StorageError::unsupported("write", path))
    }

    /// Write a whole buffer; returns the path the content now lives at.
    fn write_bytes(&self, path: &str, data: &[u8]) -> StorageResult<String> {
        let mut stream = self.open_write(path)?;
        stream.write_all(data)?;
        stream.finish()
    }

    /// Delete a file or directory.
    fn delete(&self, path: &str, _if_recursive: bool) -> StorageResult<()> {
        Err(StorageError::unsupported("delete", path))
    }

    /// Create a directory and its missing parents; existing directories are fine.
    fn mkdir(&self, path: &str) -> StorageResult<()> {
        Err(StorageError::unsupported("mkdir", path))
    }

    /// Names of the direct children of a directory, sorted.
    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        Err(StorageError::unsupported("list_dir", path))
    }

    /// Content digest known without reading the content (lower-case hex MD5).
    fn remote_digest(&self, _path: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    /// Historical revisions ordered oldest to newest.
    fn list_versions(&self, path: &str) -> StorageResult<Vec<SpecVersionDescriptor>> {
        Err(StorageError::unsupported("list_versions", path))
    }

    /// Open a read stream over one historical revision.
    fn open_version(&self, path: &str, _version_id: &str) -> StorageResult<TypeReadStream> {
        Err(StorageError::unsupported("open_version", path))
    }

    /// Remove one historical revision.
    fn delete_version(&self, path: &str, _version_id: &str) -> StorageResult<()> {
        Err(StorageError::unsupported("delete_version", path))
    }

    /// Custom key/value metadata of a file.
    fn get_metadata(&self, path: &str) -> StorageResult<BTreeMap<String, String>> {
        Err(StorageError::unsupported("get_metadata", path))
    }

    /// Merge key/value metadata into a file.
    fn set_metadata(&self, path: &str, _metadata: &BTreeMap<String, String>) -> StorageResult<()> {
        Err(StorageError::unsupported("set_metadata", path))
    }

    /// Native filesystem path of `path` when the backend stores files on local disk.
    fn local_fs_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

/// Write stream that buffers in memory and hands the bytes to `commit` on finish.
pub(crate) struct BufferedWriteStream<F>
where
    F: FnOnce(Vec<u8>) -> StorageResult<String> + Send,
{
    buf: Vec<u8>,
    commit: Option<F>,
}

impl<F> BufferedWriteStream<F>
where
    F: FnOnce(Vec<u8>) -> StorageResult<String> + Send,
{
    pub(crate) fn new(commit: F) -> Self {
        Self {
            buf: Vec::new(),
            commit: Some(commit),
        }
    }
}

impl<F> Write for BufferedWriteStream<F>
where
    F: FnOnce(Vec<u8>) -> StorageResult<String> + Send,
{
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<F> StorageWriteStream for BufferedWriteStream<F>
where
    F: FnOnce(Vec<u8>) -> StorageResult<String> + Send,
{
    fn finish(mut self: Box<Self>) -> StorageResult<String> {
        let buf = std::mem::take(&mut self.buf);
        match self.commit.take() {
            Some(commit) => commit(buf),
            None => Err(StorageError::config("write stream already finished")),
        }
    }
}

/// Last path segment, or the empty string for the root.
pub(crate) fn path_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent path, or the empty string for top-level entries.
pub(crate) fn path_parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{BufferedWriteStream, StorageWriteStream, path_basename, path_parent};

    #[test]
    fn path_helpers_split_last_segment() {
        assert_eq!(path_basename("a/b/c.txt"), "c.txt");
        assert_eq!(path_basename("c.txt"), "c.txt");
        assert_eq!(path_parent("a/b/c.txt"), "a/b");
        assert_eq!(path_parent("c.txt"), "");
    }

    #[test]
    fn buffered_stream_commits_once() {
        let mut stream: Box<dyn StorageWriteStream> =
            Box::new(BufferedWriteStream::new(|buf: Vec<u8>| {
                Ok(String::from_utf8(buf).unwrap_or_default())
            }));
        stream.write_all(b"ab").unwrap();
        stream.write_all(b"cd").unwrap();
        assert_eq!(stream.finish().unwrap(), "abcd");
    }
}
