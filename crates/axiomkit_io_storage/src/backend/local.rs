//! Local filesystem backend rooted at one directory.

#[cfg(target_os = "linux")]
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use filetime::FileTime;

use super::{StorageBackend, StorageWriteStream, TypeReadStream};
use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::SpecNodeStat;

#[cfg(target_os = "linux")]
const C_XATTR_NAMESPACE: &str = "user.";

/// Backend over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    path_root: PathBuf,
    caps: SpecBackendCapabilities,
}

impl LocalBackend {
    /// Backend rooted at `path_root`. The directory is created lazily on first write.
    pub fn new(path_root: impl Into<PathBuf>) -> Self {
        let caps = SpecBackendCapabilities {
            metadata: cfg!(target_os = "linux"),
            symbolic_links: cfg!(unix),
            ..SpecBackendCapabilities::full()
        };
        Self {
            path_root: path_root.into(),
            caps,
        }
    }

    /// Root directory.
    pub fn path_root(&self) -> &Path {
        &self.path_root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            return self.path_root.clone();
        }
        self.path_root.join(path)
    }
}

fn map_io_error(e: io::Error, path: &Path) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => {
            StorageError::not_found(path.display().to_string(), e.to_string())
        }
        io::ErrorKind::PermissionDenied => {
            StorageError::permission_denied(format!("{} ({e})", path.display()))
        }
        _ => StorageError::Io(e),
    }
}

static N_TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling staging path: `.<name>.<pid>.<seq>.tmp`.
fn staging_path(path_abs: &Path) -> PathBuf {
    let c_name = path_abs
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default();
    let n_seq = N_TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path_abs.with_file_name(format!(".{c_name}.{}.{n_seq}.tmp", std::process::id()))
}

/// Writes into a staging file renamed over the target on finish.
///
/// The target is untouched until the rename; a stream dropped before finish
/// removes its staging file.
struct LocalWriteStream {
    writer: Option<BufWriter<fs::File>>,
    path_tmp: PathBuf,
    path_abs: PathBuf,
    path_rel: String,
}

impl LocalWriteStream {
    fn writer(&mut self) -> io::Result<&mut BufWriter<fs::File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("write stream already finished"))
    }
}

impl Write for LocalWriteStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer()?.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl StorageWriteStream for LocalWriteStream {
    fn finish(mut self: Box<Self>) -> StorageResult<String> {
        let Some(writer) = self.writer.take() else {
            return Err(StorageError::config("write stream already finished"));
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        if let Err(e) = fs::rename(&self.path_tmp, &self.path_abs) {
            let _ = fs::remove_file(&self.path_tmp);
            return Err(map_io_error(e, &self.path_abs));
        }
        Ok(std::mem::take(&mut self.path_rel))
    }
}

impl Drop for LocalWriteStream {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.path_tmp);
        }
    }
}

impl StorageBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> SpecBackendCapabilities {
        self.caps
    }

    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>> {
        let path_abs = self.resolve(path);
        let meta = match fs::metadata(&path_abs) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::not_found(
                    path_abs.display().to_string(),
                    e.to_string(),
                ));
            }
        };
        let ft_mtime = FileTime::from_last_modification_time(&meta);
        let n_mtime = ft_mtime.unix_seconds() as f64 + f64::from(ft_mtime.nanoseconds()) / 1e9;
        if meta.is_dir() {
            return Ok(Some(SpecNodeStat::directory(n_mtime)));
        }
        Ok(Some(SpecNodeStat::file(meta.len(), n_mtime)))
    }

    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream> {
        let path_abs = self.resolve(path);
        if path_abs.is_dir() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        let file = fs::File::open(&path_abs).map_err(|e| map_io_error(e, &path_abs))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        let path_abs = self.resolve(path);
        if path_abs.is_dir() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        if let Some(path_parent) = path_abs.parent() {
            fs::create_dir_all(path_parent).map_err(|e| map_io_error(e, path_parent))?;
        }
        let path_tmp = staging_path(&path_abs);
        let file = fs::File::create(&path_tmp).map_err(|e| map_io_error(e, &path_tmp))?;
        Ok(Box::new(LocalWriteStream {
            writer: Some(BufWriter::new(file)),
            path_tmp,
            path_abs,
            path_rel: path.to_string(),
        }))
    }

    fn delete(&self, path: &str, if_recursive: bool) -> StorageResult<()> {
        let path_abs = self.resolve(path);
        let meta = match fs::symlink_metadata(&path_abs) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(map_io_error(e, &path_abs)),
        };
        let res_delete = if !meta.is_dir() {
            fs::remove_file(&path_abs)
        } else if if_recursive {
            fs::remove_dir_all(&path_abs)
        } else {
            fs::remove_dir(&path_abs)
        };
        res_delete.map_err(|e| map_io_error(e, &path_abs))
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        let path_abs = self.resolve(path);
        if path_abs.is_file() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        fs::create_dir_all(&path_abs).map_err(|e| map_io_error(e, &path_abs))
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let path_abs = self.resolve(path);
        if !path_abs.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        let mut l_names = Vec::new();
        for entry_res in fs::read_dir(&path_abs).map_err(|e| map_io_error(e, &path_abs))? {
            let entry = entry_res?;
            l_names.push(entry.file_name().to_string_lossy().to_string());
        }
        l_names.sort();
        Ok(l_names)
    }

    fn local_fs_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve(path))
    }

    #[cfg(target_os = "linux")]
    fn get_metadata(&self, path: &str) -> StorageResult<BTreeMap<String, String>> {
        let path_abs = self.resolve(path);
        let mut dict_meta = BTreeMap::new();
        let iter_names = xattr::list(&path_abs).map_err(|e| map_io_error(e, &path_abs))?;
        for name in iter_names {
            let c_name = name.to_string_lossy();
            let Some(c_key) = c_name.strip_prefix(C_XATTR_NAMESPACE) else {
                continue;
            };
            let Some(raw_value) = xattr::get(&path_abs, &name).ok().flatten() else {
                continue;
            };
            dict_meta.insert(
                c_key.to_string(),
                String::from_utf8_lossy(&raw_value).to_string(),
            );
        }
        Ok(dict_meta)
    }

    #[cfg(target_os = "linux")]
    fn set_metadata(&self, path: &str, metadata: &BTreeMap<String, String>) -> StorageResult<()> {
        let path_abs = self.resolve(path);
        for (c_key, c_value) in metadata {
            xattr::set(
                &path_abs,
                format!("{C_XATTR_NAMESPACE}{c_key}"),
                c_value.as_bytes(),
            )
            .map_err(|e| map_io_error(e, &path_abs))?;
        }
        Ok(())
    }
}
