//! In-memory backend with optional revision history.
//!
//! All data is ephemeral. Used for scratch mounts and tests.

use std::collections::BTreeMap;
use std::io::{self, Cursor};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

use super::{
    BufferedWriteStream, StorageBackend, StorageWriteStream, TypeReadStream, path_parent,
};
use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::{SpecNodeStat, SpecVersionDescriptor};
use crate::util::hash_bytes_md5;

#[derive(Debug, Clone)]
struct SpecMemRevision {
    version_id: String,
    timestamp: DateTime<Utc>,
    data: Arc<[u8]>,
    fingerprint: String,
}

#[derive(Debug, Clone)]
enum EnumMemEntry {
    Directory {
        timestamp: DateTime<Utc>,
    },
    File {
        l_revisions: Vec<SpecMemRevision>,
        n_version_next: u64,
        dict_meta: BTreeMap<String, String>,
    },
}

#[derive(Debug, Default)]
struct SpecMemState {
    dict_entries: BTreeMap<String, EnumMemEntry>,
    ts_last: Option<DateTime<Utc>>,
}

impl SpecMemState {
    /// Strictly increasing write clock so revisions never share a timestamp.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut ts_now = Utc::now();
        if let Some(ts_last) = self.ts_last
            && ts_now <= ts_last
        {
            ts_now = ts_last + TimeDelta::microseconds(1);
        }
        self.ts_last = Some(ts_now);
        ts_now
    }

    fn ensure_parents(&mut self, path: &str, timestamp: DateTime<Utc>) -> StorageResult<()> {
        let mut l_missing = Vec::new();
        let mut path_cur = path_parent(path);
        while !path_cur.is_empty() {
            match self.dict_entries.get(path_cur) {
                Some(EnumMemEntry::Directory { .. }) => break,
                Some(EnumMemEntry::File { .. }) => {
                    return Err(StorageError::NotADirectory(path_cur.to_string()));
                }
                None => l_missing.push(path_cur.to_string()),
            }
            path_cur = path_parent(path_cur);
        }
        for path_dir in l_missing {
            self.dict_entries
                .insert(path_dir, EnumMemEntry::Directory { timestamp });
        }
        Ok(())
    }

    fn latest(&self, path: &str) -> StorageResult<&SpecMemRevision> {
        match self.dict_entries.get(path) {
            Some(EnumMemEntry::File { l_revisions, .. }) => l_revisions
                .last()
                .ok_or_else(|| StorageError::not_found(path, "no content")),
            Some(EnumMemEntry::Directory { .. }) => {
                Err(StorageError::IsADirectory(path.to_string()))
            }
            None if path.is_empty() => Err(StorageError::IsADirectory(path.to_string())),
            None => Err(StorageError::not_found(path, "no such file")),
        }
    }
}

fn to_unix_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_micros() as f64 / 1e6
}

/// Thread-safe in-memory backend.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<SpecMemState>>,
    caps: SpecBackendCapabilities,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty, unversioned store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SpecMemState::default())),
            caps: SpecBackendCapabilities {
                metadata: true,
                temporary: true,
                ..SpecBackendCapabilities::full()
            },
        }
    }

    /// Keep every written revision.
    pub fn with_versioning(mut self) -> Self {
        self.caps = self.caps.with_versioning();
        self
    }

    /// Expose the content digest as metadata so hashing needs no read.
    pub fn with_remote_digest(mut self) -> Self {
        self.caps.hash_on_metadata = true;
        self
    }

    fn commit(&self, path: &str, data: Vec<u8>) -> StorageResult<String> {
        let mut state = self.state.write();
        if path.is_empty() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        let timestamp = state.next_timestamp();
        state.ensure_parents(path, timestamp)?;

        let fingerprint = hash_bytes_md5(&data);
        let if_versioning = self.caps.versioning;
        let entry = state
            .dict_entries
            .entry(path.to_string())
            .or_insert_with(|| EnumMemEntry::File {
                l_revisions: Vec::new(),
                n_version_next: 0,
                dict_meta: BTreeMap::new(),
            });
        let EnumMemEntry::File {
            l_revisions,
            n_version_next,
            ..
        } = entry
        else {
            return Err(StorageError::IsADirectory(path.to_string()));
        };

        let spec_revision = SpecMemRevision {
            version_id: format!("v{n_version_next}"),
            timestamp,
            data: Arc::from(data),
            fingerprint,
        };
        *n_version_next += 1;
        if !if_versioning {
            l_revisions.clear();
        }
        l_revisions.push(spec_revision);
        Ok(path.to_string())
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> SpecBackendCapabilities {
        self.caps
    }

    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>> {
        let state = self.state.read();
        match state.dict_entries.get(path) {
            Some(EnumMemEntry::Directory { timestamp }) => {
                Ok(Some(SpecNodeStat::directory(to_unix_seconds(*timestamp))))
            }
            Some(EnumMemEntry::File { l_revisions, .. }) => Ok(l_revisions
                .last()
                .map(|r| SpecNodeStat::file(r.data.len() as u64, to_unix_seconds(r.timestamp)))),
            None if path.is_empty() => Ok(Some(SpecNodeStat::directory(0.0))),
            None => Ok(None),
        }
    }

    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream> {
        let state = self.state.read();
        let data = Arc::clone(&state.latest(path)?.data);
        Ok(Box::new(Cursor::new(data)))
    }

    fn open_write(&self, path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        let backend = self.clone();
        let path_owned = path.to_string();
        Ok(Box::new(BufferedWriteStream::new(move |buf: Vec<u8>| {
            backend.commit(&path_owned, buf)
        })))
    }

    fn write_bytes(&self, path: &str, data: &[u8]) -> StorageResult<String> {
        self.commit(path, data.to_vec())
    }

    fn delete(&self, path: &str, if_recursive: bool) -> StorageResult<()> {
        let mut state = self.state.write();
        let b_is_dir = match state.dict_entries.get(path) {
            None => return Ok(()),
            Some(EnumMemEntry::File { .. }) => false,
            Some(EnumMemEntry::Directory { .. }) => true,
        };
        if b_is_dir {
            let c_prefix = format!("{path}/");
            let l_descendants: Vec<String> = state
                .dict_entries
                .range(c_prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&c_prefix))
                .map(|(k, _)| k.clone())
                .collect();
            if !l_descendants.is_empty() && !if_recursive {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("directory not empty: {path}"),
                )));
            }
            for c_key in l_descendants {
                state.dict_entries.remove(&c_key);
            }
        }
        state.dict_entries.remove(path);
        Ok(())
    }

    fn mkdir(&self, path: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        if path.is_empty() {
            return Ok(());
        }
        match state.dict_entries.get(path) {
            Some(EnumMemEntry::Directory { .. }) => return Ok(()),
            Some(EnumMemEntry::File { .. }) => {
                return Err(StorageError::NotADirectory(path.to_string()));
            }
            None => {}
        }
        let timestamp = state.next_timestamp();
        state.ensure_parents(path, timestamp)?;
        state
            .dict_entries
            .insert(path.to_string(), EnumMemEntry::Directory { timestamp });
        Ok(())
    }

    fn list_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let state = self.state.read();
        match state.dict_entries.get(path) {
            Some(EnumMemEntry::Directory { .. }) => {}
            None if path.is_empty() => {}
            _ => return Err(StorageError::NotADirectory(path.to_string())),
        }
        let c_prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let l_names = state
            .dict_entries
            .range(c_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&c_prefix))
            .filter_map(|(k, _)| {
                let c_rest = &k[c_prefix.len()..];
                (!c_rest.is_empty() && !c_rest.contains('/')).then(|| c_rest.to_string())
            })
            .collect();
        Ok(l_names)
    }

    fn remote_digest(&self, path: &str) -> StorageResult<Option<String>> {
        if !self.caps.hash_on_metadata {
            return Ok(None);
        }
        let state = self.state.read();
        match state.dict_entries.get(path) {
            Some(EnumMemEntry::File { l_revisions, .. }) => {
                Ok(l_revisions.last().map(|r| r.fingerprint.clone()))
            }
            _ => Ok(None),
        }
    }

    fn list_versions(&self, path: &str) -> StorageResult<Vec<SpecVersionDescriptor>> {
        if !self.caps.version_listing {
            return Err(StorageError::unsupported("list_versions", path));
        }
        let state = self.state.read();
        let Some(EnumMemEntry::File { l_revisions, .. }) = state.dict_entries.get(path) else {
            return Ok(Vec::new());
        };
        let n_last = l_revisions.len().saturating_sub(1);
        Ok(l_revisions
            .iter()
            .enumerate()
            .map(|(n_ordinal, r)| SpecVersionDescriptor {
                version_id: r.version_id.clone(),
                n_ordinal,
                timestamp: r.timestamp,
                size: r.data.len() as u64,
                fingerprint: r.fingerprint.clone(),
                if_latest: n_ordinal == n_last,
            })
            .collect())
    }

    fn open_version(&self, path: &str, version_id: &str) -> StorageResult<TypeReadStream> {
        if !self.caps.version_access {
            return Err(StorageError::unsupported("open_version", path));
        }
        let state = self.state.read();
        let data = match state.dict_entries.get(path) {
            Some(EnumMemEntry::File { l_revisions, .. }) => l_revisions
                .iter()
                .find(|r| r.version_id == version_id)
                .map(|r| Arc::clone(&r.data)),
            _ => None,
        };
        let data = data.ok_or_else(|| StorageError::VersionNotFound {
            path: path.to_string(),
            version_id: version_id.to_string(),
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn delete_version(&self, path: &str, version_id: &str) -> StorageResult<()> {
        if !self.caps.versioning {
            return Err(StorageError::unsupported("delete_version", path));
        }
        let mut state = self.state.write();
        let Some(EnumMemEntry::File { l_revisions, .. }) = state.dict_entries.get_mut(path) else {
            return Err(StorageError::VersionNotFound {
                path: path.to_string(),
                version_id: version_id.to_string(),
            });
        };
        let Some(n_pos) = l_revisions.iter().position(|r| r.version_id == version_id) else {
            return Err(StorageError::VersionNotFound {
                path: path.to_string(),
                version_id: version_id.to_string(),
            });
        };
        l_revisions.remove(n_pos);
        if l_revisions.is_empty() {
            state.dict_entries.remove(path);
        }
        Ok(())
    }

    fn get_metadata(&self, path: &str) -> StorageResult<BTreeMap<String, String>> {
        let state = self.state.read();
        match state.dict_entries.get(path) {
            Some(EnumMemEntry::File { dict_meta, .. }) => Ok(dict_meta.clone()),
            Some(EnumMemEntry::Directory { .. }) => {
                Err(StorageError::IsADirectory(path.to_string()))
            }
            None => Err(StorageError::not_found(path, "no such file")),
        }
    }

    fn set_metadata(&self, path: &str, metadata: &BTreeMap<String, String>) -> StorageResult<()> {
        let mut state = self.state.write();
        match state.dict_entries.get_mut(path) {
            Some(EnumMemEntry::File { dict_meta, .. }) => {
                dict_meta.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            }
            Some(EnumMemEntry::Directory { .. }) => {
                Err(StorageError::IsADirectory(path.to_string()))
            }
            None => Err(StorageError::not_found(path, "no such file")),
        }
    }
}
