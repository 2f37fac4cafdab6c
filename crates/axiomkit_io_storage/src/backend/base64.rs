//! Content-in-path backend: a path is the base64 encoding of the bytes.
//!
//! Paths are produced with the URL-safe alphabet so they never contain `/`.
//! Both the standard and the URL-safe alphabets are accepted when reading.

use std::io::Cursor;

use ::base64::Engine;
use ::base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::Utc;

use super::{BufferedWriteStream, StorageBackend, StorageWriteStream, TypeReadStream};
use crate::capability::SpecBackendCapabilities;
use crate::error::{StorageError, StorageResult};
use crate::spec::SpecNodeStat;
use crate::util::hash_bytes_md5;

/// Backend whose paths carry their own content.
///
/// There are no directories. Writing yields a new path (the encoding of the new
/// content); the old path keeps decoding to the old bytes. Empty content encodes
/// to the empty path, which never exists, so a written empty file reads back as
/// absent.
#[derive(Debug, Clone)]
pub struct Base64Backend {
    n_mtime_created: f64,
    caps: SpecBackendCapabilities,
}

impl Default for Base64Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Base64Backend {
    /// New backend; every path reports the construction time as mtime.
    pub fn new() -> Self {
        Self {
            n_mtime_created: Utc::now().timestamp_micros() as f64 / 1e6,
            caps: SpecBackendCapabilities {
                delete: false,
                mkdir: false,
                list_dir: false,
                hash_on_metadata: true,
                ..SpecBackendCapabilities::full()
            },
        }
    }

    /// Encode bytes into a path.
    pub fn encode(data: &[u8]) -> String {
        URL_SAFE.encode(data)
    }

    fn decode(path: &str) -> StorageResult<Vec<u8>> {
        let c_clean: String = path.chars().filter(|c| !c.is_whitespace()).collect();
        if c_clean.is_empty() {
            return Err(StorageError::not_found(path, "base64 path cannot be empty"));
        }
        STANDARD
            .decode(c_clean.as_bytes())
            .or_else(|_| URL_SAFE.decode(c_clean.as_bytes()))
            .map_err(|e| StorageError::not_found(path, format!("invalid base64 data: {e}")))
    }
}

impl StorageBackend for Base64Backend {
    fn kind(&self) -> &'static str {
        "base64"
    }

    fn capabilities(&self) -> SpecBackendCapabilities {
        self.caps
    }

    fn stat(&self, path: &str) -> StorageResult<Option<SpecNodeStat>> {
        match Self::decode(path) {
            Ok(data) => Ok(Some(SpecNodeStat::file(
                data.len() as u64,
                self.n_mtime_created,
            ))),
            Err(_) => Ok(None),
        }
    }

    fn open_read(&self, path: &str) -> StorageResult<TypeReadStream> {
        Ok(Box::new(Cursor::new(Self::decode(path)?)))
    }

    fn open_write(&self, _path: &str) -> StorageResult<Box<dyn StorageWriteStream>> {
        Ok(Box::new(BufferedWriteStream::new(|buf: Vec<u8>| {
            Ok(Self::encode(&buf))
        })))
    }

    fn write_bytes(&self, _path: &str, data: &[u8]) -> StorageResult<String> {
        Ok(Self::encode(data))
    }

    fn remote_digest(&self, path: &str) -> StorageResult<Option<String>> {
        Ok(Some(hash_bytes_md5(&Self::decode(path)?)))
    }
}
