//! Storage node: one addressable path on one mounted backend.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{StorageBackend, TypeReadStream};
use crate::capability::SpecBackendCapabilities;
use crate::conf::C_MOUNT_SEPARATOR;
use crate::copy::copy;
use crate::error::{StorageError, StorageResult};
use crate::local_path::LocalPathGuard;
use crate::report::ReportCopy;
use crate::spec::{
    EnumLocalPathMode, EnumVersionSelector, SpecCopyOptions, SpecNodeStat, SpecVersionDescriptor,
};
use crate::util::{copy_stream_chunked, hash_stream_md5, join_path, split_path_segments};
use crate::version::{plan_compaction, resolve_version};
use crate::virtual_node::{EnumContentNode, build_archive};

/// Reference to `(mount, path)` bound to a shared backend.
///
/// Cheap to construct; performs no I/O until an operation is called. The content
/// hash is memoised per instance and cleared by writes through the same instance.
/// Clones start with an empty memo.
pub struct StorageNode {
    c_mount: String,
    l_segments: Vec<String>,
    backend: Arc<dyn StorageBackend>,
    spec_version: Option<SpecVersionDescriptor>,
    memo_hash: Mutex<Option<String>>,
}

impl Clone for StorageNode {
    fn clone(&self) -> Self {
        Self {
            c_mount: self.c_mount.clone(),
            l_segments: self.l_segments.clone(),
            backend: Arc::clone(&self.backend),
            spec_version: self.spec_version.clone(),
            memo_hash: Mutex::new(None),
        }
    }
}

impl fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("StorageNode");
        dbg.field("path", &self.full_path())
            .field("backend", &self.backend.kind());
        if let Some(spec_version) = &self.spec_version {
            dbg.field("version_id", &spec_version.version_id);
        }
        dbg.finish()
    }
}

impl fmt::Display for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

impl StorageNode {
    /// Node for `path_raw` on `backend`; the path is normalised and `..` is rejected.
    pub fn new(
        c_mount: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        path_raw: &str,
    ) -> StorageResult<Self> {
        Ok(Self::from_segments(
            c_mount.into(),
            backend,
            split_path_segments(path_raw)?,
        ))
    }

    pub(crate) fn from_segments(
        c_mount: String,
        backend: Arc<dyn StorageBackend>,
        l_segments: Vec<String>,
    ) -> Self {
        Self {
            c_mount,
            l_segments,
            backend,
            spec_version: None,
            memo_hash: Mutex::new(None),
        }
    }

    fn with_path(&self, path_new: &str) -> StorageResult<Self> {
        Ok(Self::from_segments(
            self.c_mount.clone(),
            Arc::clone(&self.backend),
            split_path_segments(path_new)?,
        ))
    }

    ////////////////////////////////////////////////////////////////////////////
    // #region PathAlgebra

    /// Mount name.
    pub fn mount_name(&self) -> &str {
        &self.c_mount
    }

    /// Normalised path segments.
    pub fn segments(&self) -> &[String] {
        &self.l_segments
    }

    /// Path relative to the mount (`a/b/c.txt`).
    pub fn path(&self) -> String {
        join_path("", &self.l_segments)
    }

    /// `mount:path`.
    pub fn full_path(&self) -> String {
        format!("{}{C_MOUNT_SEPARATOR}{}", self.c_mount, self.path())
    }

    /// Last segment, empty for the mount root.
    pub fn basename(&self) -> &str {
        self.l_segments.last().map(String::as_str).unwrap_or("")
    }

    /// Basename without its final suffix.
    pub fn stem(&self) -> &str {
        let c_name = self.basename();
        match c_name.rfind('.') {
            Some(n_pos) if n_pos > 0 => &c_name[..n_pos],
            _ => c_name,
        }
    }

    /// Final suffix including the dot (`.txt`), empty when there is none.
    pub fn suffix(&self) -> &str {
        let c_name = self.basename();
        match c_name.rfind('.') {
            Some(n_pos) if n_pos > 0 => &c_name[n_pos..],
            _ => "",
        }
    }

    /// Child node; every part is normalised and `..` is rejected.
    pub fn child(&self, parts: &[&str]) -> StorageResult<Self> {
        let mut l_segments = self.l_segments.clone();
        for c_part in parts {
            l_segments.extend(split_path_segments(c_part)?);
        }
        Ok(Self::from_segments(
            self.c_mount.clone(),
            Arc::clone(&self.backend),
            l_segments,
        ))
    }

    /// Parent node; the mount root is its own parent.
    pub fn parent(&self) -> Self {
        let n_keep = self.l_segments.len().saturating_sub(1);
        Self::from_segments(
            self.c_mount.clone(),
            Arc::clone(&self.backend),
            self.l_segments[..n_keep].to_vec(),
        )
    }

    /// Bound backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Capabilities of this node. A version-bound node is a read-only snapshot.
    pub fn capabilities(&self) -> SpecBackendCapabilities {
        let caps = self.backend.capabilities();
        if self.spec_version.is_some() {
            return caps.versioned_snapshot();
        }
        caps
    }

    /// Bound historical revision, if any.
    pub fn version(&self) -> Option<&SpecVersionDescriptor> {
        self.spec_version.as_ref()
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Inspection

    /// Stat this path; `Ok(None)` when it does not exist.
    ///
    /// Backend failures surface as [`StorageError::NotFound`].
    pub fn stat(&self) -> StorageResult<Option<SpecNodeStat>> {
        if let Some(spec_version) = &self.spec_version {
            return Ok(Some(SpecNodeStat::file(
                spec_version.size,
                spec_version.timestamp.timestamp_micros() as f64 / 1e6,
            )));
        }
        self.backend.stat(&self.path()).map_err(|e| match e {
            StorageError::NotFound { .. } => e,
            other => StorageError::not_found(self.full_path(), other.to_string()),
        })
    }

    /// Path exists as a file or directory.
    pub fn exists(&self) -> bool {
        matches!(self.stat(), Ok(Some(_)))
    }

    /// Path is an existing file.
    pub fn is_file(&self) -> bool {
        matches!(self.stat(), Ok(Some(stat)) if !stat.is_dir)
    }

    /// Path is an existing directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.stat(), Ok(Some(stat)) if stat.is_dir)
    }

    fn stat_required(&self) -> StorageResult<SpecNodeStat> {
        self.stat()?
            .ok_or_else(|| StorageError::not_found(self.full_path(), "no such file or directory"))
    }

    /// File size in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        Ok(self.stat_required()?.size)
    }

    /// Modification time as Unix seconds.
    pub fn mtime(&self) -> StorageResult<f64> {
        Ok(self.stat_required()?.mtime)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region ReadWrite

    pub(crate) fn guard_mutation(
        &self,
        operation: &'static str,
        b_allowed: bool,
    ) -> StorageResult<()> {
        if let Some(spec_version) = &self.spec_version {
            return Err(StorageError::ImmutableVersion {
                path: self.full_path(),
                version_id: spec_version.version_id.clone(),
            });
        }
        if !b_allowed {
            return Err(self.backend.refusal(operation, &self.path()));
        }
        Ok(())
    }

    pub(crate) fn invalidate_hash(&self) {
        *self.memo_hash.lock() = None;
    }

    /// Open a chunked read stream.
    pub fn open_read(&self) -> StorageResult<TypeReadStream> {
        if !self.backend.capabilities().read {
            return Err(self.backend.refusal("read", &self.path()));
        }
        match &self.spec_version {
            Some(spec_version) => self
                .backend
                .open_version(&self.path(), &spec_version.version_id),
            None => self.backend.open_read(&self.path()),
        }
    }

    /// Whole content as bytes.
    pub fn read_bytes(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whole content as UTF-8 text.
    pub fn read_text(&self) -> StorageResult<String> {
        String::from_utf8(self.read_bytes()?).map_err(|e| {
            StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {e}", self.full_path()),
            ))
        })
    }

    /// Content as standard base64, wrapped in a `data:` URI when `if_data_uri` is set.
    ///
    /// The URI media type is `mime` when given, otherwise guessed from the
    /// basename extension with `application/octet-stream` as fallback.
    pub fn to_base64(&self, mime: Option<&str>, if_data_uri: bool) -> StorageResult<String> {
        if self.stat_required()?.is_dir {
            return Err(StorageError::IsADirectory(format!(
                "cannot encode directory {}",
                self.full_path()
            )));
        }
        let c_encoded = STANDARD.encode(self.read_bytes()?);
        if !if_data_uri {
            return Ok(c_encoded);
        }
        let c_mime = match mime {
            Some(v) => v.to_string(),
            None => mime_guess::from_path(self.basename())
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };
        Ok(format!("data:{c_mime};base64,{c_encoded}"))
    }

    /// Native path for external tools that need a real file.
    ///
    /// Local files are handed out directly; other backends get a temporary copy
    /// that [`LocalPathGuard::finish`] uploads in write modes.
    pub fn local_path(&self, enum_mode: EnumLocalPathMode) -> StorageResult<LocalPathGuard<'_>> {
        LocalPathGuard::open(self, enum_mode)
    }

    /// Stream `reader` into this path in fixed-size chunks.
    ///
    /// Returns the node the content now lives at; for content-addressed backends
    /// this differs from `self`.
    pub fn write_from_reader(&self, reader: &mut dyn Read) -> StorageResult<Self> {
        self.guard_mutation("write", self.backend.capabilities().write)?;
        let mut stream = self.backend.open_write(&self.path())?;
        copy_stream_chunked(reader, &mut stream)?;
        let path_new = stream.finish()?;
        self.invalidate_hash();
        self.with_path(&path_new)
    }

    /// Replace the content. Returns the node the content now lives at.
    pub fn write_bytes(&self, data: &[u8]) -> StorageResult<Self> {
        self.guard_mutation("write", self.backend.capabilities().write)?;
        let path_new = self.backend.write_bytes(&self.path(), data)?;
        self.invalidate_hash();
        self.with_path(&path_new)
    }

    /// Replace the content with UTF-8 text.
    pub fn write_text(&self, txt: &str) -> StorageResult<Self> {
        self.write_bytes(txt.as_bytes())
    }

    /// Write only when the content hash differs; `Ok(None)` when unchanged.
    pub fn write_bytes_if_changed(&self, data: &[u8]) -> StorageResult<Option<Self>> {
        if self.is_file() {
            let c_hash_new = crate::util::hash_bytes_md5(data);
            if self.content_hash()? == c_hash_new {
                debug!(path = %self.full_path(), "content unchanged; write skipped");
                return Ok(None);
            }
        }
        self.write_bytes(data).map(Some)
    }

    /// Lower-case hex MD5 of the content.
    ///
    /// Uses the backend's remote digest when `hash_on_metadata` is set, otherwise
    /// streams the content through an incremental hash.
    pub fn content_hash(&self) -> StorageResult<String> {
        if let Some(c_hash) = self.memo_hash.lock().as_ref() {
            return Ok(c_hash.clone());
        }
        let c_hash = self.compute_hash()?;
        *self.memo_hash.lock() = Some(c_hash.clone());
        Ok(c_hash)
    }

    fn compute_hash(&self) -> StorageResult<String> {
        if let Some(spec_version) = &self.spec_version {
            return Ok(spec_version.fingerprint.clone());
        }
        if self.stat_required()?.is_dir {
            return Err(StorageError::IsADirectory(self.full_path()));
        }
        if self.backend.capabilities().hash_on_metadata
            && let Some(c_digest) = self.backend.remote_digest(&self.path())?
        {
            debug!(path = %self.full_path(), "content hash from remote digest");
            return Ok(c_digest);
        }
        debug!(path = %self.full_path(), "content hash by streaming");
        Ok(hash_stream_md5(&mut self.open_read()?)?)
    }

    /// Both nodes are existing files with equal content hashes.
    pub fn content_eq(&self, other: &StorageNode) -> bool {
        if !self.is_file() || !other.is_file() {
            return false;
        }
        match (self.content_hash(), other.content_hash()) {
            (Ok(c_left), Ok(c_right)) => c_left == c_right,
            _ => false,
        }
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region TreeOps

    /// Create this directory.
    ///
    /// Without `if_parents` a missing parent is [`StorageError::NotFound`]; without
    /// `if_exist_ok` an existing directory is [`StorageError::AlreadyExists`]. An
    /// existing file is always `AlreadyExists`.
    pub fn mkdir(&self, if_parents: bool, if_exist_ok: bool) -> StorageResult<()> {
        self.guard_mutation("mkdir", self.backend.capabilities().mkdir)?;
        match self.stat()? {
            Some(stat) if stat.is_dir && if_exist_ok => return Ok(()),
            Some(_) => return Err(StorageError::AlreadyExists(self.full_path())),
            None => {}
        }
        if !if_parents && self.l_segments.len() > 1 {
            let node_parent = self.parent();
            if !node_parent.is_dir() {
                return Err(StorageError::not_found(
                    node_parent.full_path(),
                    "parent directory does not exist",
                ));
            }
        }
        self.backend.mkdir(&self.path())
    }

    /// Direct children, sorted by name.
    pub fn children(&self) -> StorageResult<Vec<Self>> {
        if !self.capabilities().list_dir {
            return Err(self.backend.refusal("list_dir", &self.path()));
        }
        let l_names = self.backend.list_dir(&self.path())?;
        let mut l_children = Vec::with_capacity(l_names.len());
        for c_name in l_names {
            let mut l_segments = self.l_segments.clone();
            l_segments.push(c_name);
            l_children.push(Self::from_segments(
                self.c_mount.clone(),
                Arc::clone(&self.backend),
                l_segments,
            ));
        }
        Ok(l_children)
    }

    /// Delete this file, or this directory when `if_recursive` allows it.
    pub fn delete(&self, if_recursive: bool) -> StorageResult<()> {
        self.guard_mutation("delete", self.backend.capabilities().delete)?;
        self.backend.delete(&self.path(), if_recursive)?;
        self.invalidate_hash();
        Ok(())
    }

    /// Copy this node to `destination`.
    pub fn copy_to(
        &self,
        destination: &StorageNode,
        spec_cp_options: SpecCopyOptions,
    ) -> StorageResult<ReportCopy> {
        copy(&EnumContentNode::from(self.clone()), destination, spec_cp_options)
    }

    /// Copy to `destination`, then delete this node.
    ///
    /// The source is kept when any file failed to copy.
    pub fn move_to(&self, destination: &StorageNode) -> StorageResult<StorageNode> {
        let b_into_dir = !self.is_dir() && destination.is_dir();
        let report = self.copy_to(
            destination,
            SpecCopyOptions {
                if_fail_fast: true,
                ..SpecCopyOptions::default()
            },
        )?;
        debug!(source = %self.full_path(), "{}", report.format("[MOVE]"));
        self.delete(true)?;
        if b_into_dir {
            return destination.child(&[self.basename()]);
        }
        Ok(destination.clone())
    }

    /// Archive bytes (zip) of this file, or of this directory tree keyed by relative path.
    pub fn to_archive(&self) -> StorageResult<Vec<u8>> {
        let stat = self.stat_required()?;
        let mut l_entries = Vec::new();
        if stat.is_dir {
            self.collect_archive_entries("", &mut l_entries)?;
        } else {
            l_entries.push((
                self.basename().to_string(),
                EnumContentNode::from(self.clone()),
            ));
        }
        build_archive(l_entries)
    }

    fn collect_archive_entries(
        &self,
        c_prefix: &str,
        l_entries: &mut Vec<(String, EnumContentNode)>,
    ) -> StorageResult<()> {
        for node_child in self.children()? {
            let c_name_rel = if c_prefix.is_empty() {
                node_child.basename().to_string()
            } else {
                format!("{c_prefix}/{}", node_child.basename())
            };
            if node_child.is_dir() {
                node_child.collect_archive_entries(&c_name_rel, l_entries)?;
            } else {
                l_entries.push((c_name_rel, EnumContentNode::from(node_child)));
            }
        }
        Ok(())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Metadata

    /// Custom key/value metadata.
    pub fn get_metadata(&self) -> StorageResult<BTreeMap<String, String>> {
        if !self.backend.capabilities().metadata {
            return Err(self.backend.refusal("get_metadata", &self.path()));
        }
        self.backend.get_metadata(&self.path())
    }

    /// Merge key/value metadata into this file.
    pub fn set_metadata(&self, metadata: &BTreeMap<String, String>) -> StorageResult<()> {
        self.guard_mutation("set_metadata", self.backend.capabilities().metadata)?;
        self.backend.set_metadata(&self.path(), metadata)
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
    // #region Versions

    /// Historical revisions ordered oldest to newest; empty without version listing.
    pub fn versions(&self) -> StorageResult<Vec<SpecVersionDescriptor>> {
        if !self.capabilities().version_listing {
            return Ok(Vec::new());
        }
        self.backend.list_versions(&self.path())
    }

    /// Number of historical revisions.
    pub fn version_count(&self) -> StorageResult<usize> {
        Ok(self.versions()?.len())
    }

    /// Read-only node bound to the revision picked by `selector`.
    pub fn at_version(&self, selector: impl Into<EnumVersionSelector>) -> StorageResult<Self> {
        let caps = self.capabilities();
        if !caps.version_listing || !caps.version_access {
            return Err(self.backend.refusal("open_version", &self.path()));
        }
        let l_versions = self.backend.list_versions(&self.path())?;
        let spec_version = resolve_version(&l_versions, &selector.into(), &self.full_path())?;
        let mut node_version = self.clone();
        node_version.spec_version = Some(spec_version.clone());
        Ok(node_version)
    }

    /// Write the content of a historical revision as a new current revision.
    pub fn rollback_to(&self, selector: impl Into<EnumVersionSelector>) -> StorageResult<Self> {
        let data = self.at_version(selector)?.read_bytes()?;
        self.write_bytes(&data)
    }

    /// Remove revisions identical to their immediate predecessor.
    ///
    /// Returns the number of removed revisions (or that would be removed when
    /// `if_dry_run` is set).
    pub fn compact_versions(&self, if_dry_run: bool) -> StorageResult<usize> {
        let caps = self.backend.capabilities();
        if !caps.versioning || !caps.version_listing {
            return Err(self.backend.refusal("compact_versions", &self.path()));
        }
        let l_versions = self.backend.list_versions(&self.path())?;
        let l_removable = plan_compaction(&l_versions);
        if if_dry_run || l_removable.is_empty() {
            return Ok(l_removable.len());
        }
        self.guard_mutation("delete_version", self.backend.capabilities().versioning)?;
        for spec_version in &l_removable {
            debug!(
                path = %self.full_path(),
                version_id = %spec_version.version_id,
                "removing duplicate version"
            );
            self.backend
                .delete_version(&self.path(), &spec_version.version_id)?;
        }
        self.invalidate_hash();
        Ok(l_removable.len())
    }

    // #endregion
    ////////////////////////////////////////////////////////////////////////////
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::StorageNode;
    use crate::backend::{Base64Backend, MemoryBackend, StorageBackend};
    use crate::error::StorageError;
    use crate::spec::EnumVersionSelector;

    fn memory_node(path: &str) -> StorageNode {
        StorageNode::new("mem", Arc::new(MemoryBackend::new()), path).unwrap()
    }

    #[test]
    fn node_path_algebra_is_pure() {
        let node = memory_node("/docs//reports/q1.final.csv/");
        assert_eq!(node.path(), "docs/reports/q1.final.csv");
        assert_eq!(node.full_path(), "mem:docs/reports/q1.final.csv");
        assert_eq!(node.basename(), "q1.final.csv");
        assert_eq!(node.stem(), "q1.final");
        assert_eq!(node.suffix(), ".csv");
        assert_eq!(node.parent().path(), "docs/reports");
        assert_eq!(node.parent().parent().parent().path(), "");
        assert_eq!(node.parent().parent().parent().parent().path(), "");

        let node_child = node.parent().child(&["a", "b/c.txt"]).unwrap();
        assert_eq!(node_child.path(), "docs/reports/a/b/c.txt");
        assert!(!node_child.exists());
    }

    #[test]
    fn node_child_rejects_parent_traversal() {
        let node = memory_node("docs");
        assert!(matches!(
            node.child(&["../etc"]),
            Err(StorageError::PathTraversal(_))
        ));
        assert!(matches!(
            StorageNode::new("mem", Arc::new(MemoryBackend::new()), "a/../b"),
            Err(StorageError::PathTraversal(_))
        ));
    }

    #[test]
    fn node_stat_absence_is_not_an_error() {
        let node = memory_node("missing.txt");
        assert!(node.stat().unwrap().is_none());
        assert!(!node.exists());
        assert!(matches!(node.size(), Err(StorageError::NotFound { .. })));
    }

    #[test]
    fn node_write_read_and_hash() {
        let node = memory_node("a.txt");
        node.write_text("hello").unwrap();
        assert_eq!(node.read_text().unwrap(), "hello");
        assert_eq!(node.size().unwrap(), 5);
        assert_eq!(
            node.content_hash().unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn node_hash_memo_is_per_instance_and_invalidated_by_write() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let node = StorageNode::new("mem", Arc::clone(&backend), "f.txt").unwrap();
        let node_other = StorageNode::new("mem", Arc::clone(&backend), "f.txt").unwrap();

        node.write_text("one").unwrap();
        let c_hash_one = node.content_hash().unwrap();
        assert_eq!(node_other.content_hash().unwrap(), c_hash_one);

        node.write_text("two").unwrap();
        let c_hash_two = node.content_hash().unwrap();
        assert_ne!(c_hash_one, c_hash_two);
        // Memo of the other instance is untouched by writes through `node`.
        assert_eq!(node_other.content_hash().unwrap(), c_hash_one);
        assert_eq!(node_other.clone().content_hash().unwrap(), c_hash_two);
    }

    #[test]
    fn node_remote_digest_used_when_available() {
        let node = StorageNode::new(
            "mem",
            Arc::new(MemoryBackend::new().with_remote_digest()),
            "x.bin",
        )
        .unwrap();
        node.write_bytes(b"hello").unwrap();
        assert_eq!(
            node.content_hash().unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn node_content_equality() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let node_a = StorageNode::new("mem", Arc::clone(&backend), "a").unwrap();
        let node_b = StorageNode::new("mem", Arc::clone(&backend), "b").unwrap();
        let node_dir = StorageNode::new("mem", Arc::clone(&backend), "d").unwrap();
        node_a.write_text("same").unwrap();
        node_b.write_text("same").unwrap();
        node_dir.mkdir(false, false).unwrap();

        assert!(node_a.content_eq(&node_b));
        assert!(!node_a.content_eq(&node_dir));
        assert!(!node_dir.content_eq(&node_dir));
        assert!(!node_a.content_eq(&node_a.parent().child(&["missing"]).unwrap()));
    }

    #[test]
    fn node_write_if_changed_reports_skip() {
        let node = memory_node("cfg.json");
        assert!(node.write_bytes_if_changed(b"{}").unwrap().is_some());
        assert!(node.write_bytes_if_changed(b"{}").unwrap().is_none());
        assert!(node.write_bytes_if_changed(b"{\"a\":1}").unwrap().is_some());
    }

    #[test]
    fn node_write_returns_new_path_on_base64() {
        let node = StorageNode::new("b64", Arc::new(Base64Backend::new()), "").unwrap();
        let node_new = node.write_text("Hello World").unwrap();
        assert_eq!(node_new.path(), "SGVsbG8gV29ybGQ=");
        assert_eq!(node_new.read_text().unwrap(), "Hello World");
    }

    #[test]
    fn node_children_sorted_and_delete() {
        let node_root = memory_node("");
        node_root.child(&["b.txt"]).unwrap().write_text("b").unwrap();
        node_root.child(&["a.txt"]).unwrap().write_text("a").unwrap();
        let l_names: Vec<String> = node_root
            .children()
            .unwrap()
            .iter()
            .map(|n| n.basename().to_string())
            .collect();
        assert_eq!(l_names, vec!["a.txt", "b.txt"]);

        node_root.child(&["a.txt"]).unwrap().delete(false).unwrap();
        assert_eq!(node_root.children().unwrap().len(), 1);
    }

    #[test]
    fn node_unsupported_operation_reports_capability() {
        let node = StorageNode::new("b64", Arc::new(Base64Backend::new()), "aGk=").unwrap();
        assert!(matches!(
            node.delete(false),
            Err(StorageError::BackendUnsupported { .. })
        ));
        assert!(matches!(
            node.children(),
            Err(StorageError::BackendUnsupported { .. })
        ));
    }

    #[test]
    fn node_versions_on_unversioned_backend_are_empty() {
        let node = memory_node("plain.txt");
        node.write_text("x").unwrap();
        assert!(node.versions().unwrap().is_empty());
        assert_eq!(node.version_count().unwrap(), 0);
        assert!(matches!(
            node.at_version(EnumVersionSelector::Index(-1)),
            Err(StorageError::BackendUnsupported { .. })
        ));
    }

    #[test]
    fn node_version_latest_matches_live_read() {
        let node =
            StorageNode::new("mem", Arc::new(MemoryBackend::new().with_versioning()), "v.txt")
                .unwrap();
        for c_body in ["first", "second", "third"] {
            node.write_text(c_body).unwrap();
        }
        assert_eq!(node.version_count().unwrap(), 3);
        let node_latest = node.at_version(-1).unwrap();
        assert_eq!(node_latest.read_bytes().unwrap(), node.read_bytes().unwrap());
        assert_eq!(node.at_version(0).unwrap().read_text().unwrap(), "first");
        assert_eq!(node.at_version("v1").unwrap().read_text().unwrap(), "second");
    }

    #[test]
    fn node_version_bound_is_read_only_snapshot() {
        let node =
            StorageNode::new("mem", Arc::new(MemoryBackend::new().with_versioning()), "v.txt")
                .unwrap();
        node.write_text("a").unwrap();
        node.write_text("b").unwrap();
        let node_old = node.at_version(0).unwrap();

        let caps = node_old.capabilities();
        assert!(!caps.versioning);
        assert!(!caps.write);
        assert!(matches!(
            node_old.write_text("c"),
            Err(StorageError::ImmutableVersion { .. })
        ));
        assert!(matches!(
            node_old.delete(false),
            Err(StorageError::ImmutableVersion { .. })
        ));
    }

    #[test]
    fn node_rollback_appends_new_version() {
        let node =
            StorageNode::new("mem", Arc::new(MemoryBackend::new().with_versioning()), "r.txt")
                .unwrap();
        node.write_text("good").unwrap();
        node.write_text("bad").unwrap();
        node.rollback_to(0).unwrap();

        assert_eq!(node.read_text().unwrap(), "good");
        assert_eq!(node.version_count().unwrap(), 3);
        assert_eq!(node.at_version(1).unwrap().read_text().unwrap(), "bad");
    }

    #[test]
    fn node_compact_versions_drops_consecutive_duplicates() {
        let node =
            StorageNode::new("mem", Arc::new(MemoryBackend::new().with_versioning()), "e.txt")
                .unwrap();
        for c_body in ["a", "b", "b", "a"] {
            node.write_text(c_body).unwrap();
        }
        assert_eq!(node.compact_versions(true).unwrap(), 1);
        assert_eq!(node.version_count().unwrap(), 4);

        assert_eq!(node.compact_versions(false).unwrap(), 1);
        let l_ids: Vec<String> = node
            .versions()
            .unwrap()
            .into_iter()
            .map(|v| v.version_id)
            .collect();
        assert_eq!(l_ids, vec!["v0", "v1", "v3"]);
        assert_eq!(node.read_text().unwrap(), "a");
    }

    #[test]
    fn node_mkdir_parents_and_exist_ok() {
        let node_root = memory_node("");
        let node_deep = node_root.child(&["a/b/c"]).unwrap();
        assert!(matches!(
            node_deep.mkdir(false, false),
            Err(StorageError::NotFound { .. })
        ));
        node_deep.mkdir(true, false).unwrap();
        assert!(node_deep.is_dir());
        assert!(node_root.child(&["a/b"]).unwrap().is_dir());

        assert!(matches!(
            node_deep.mkdir(true, false),
            Err(StorageError::AlreadyExists(_))
        ));
        node_deep.mkdir(false, true).unwrap();

        let node_file = node_root.child(&["a/f.txt"]).unwrap();
        node_file.write_text("x").unwrap();
        assert!(matches!(
            node_file.mkdir(true, true),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn node_compact_versions_requires_versioning() {
        let node = memory_node("plain.txt");
        node.write_text("x").unwrap();
        for if_dry_run in [true, false] {
            assert!(matches!(
                node.compact_versions(if_dry_run),
                Err(StorageError::BackendUnsupported {
                    operation: "compact_versions",
                    ..
                })
            ));
        }
    }

    #[test]
    fn node_to_base64_data_uri_and_raw() {
        let node = memory_node("docs/note.txt");
        node.write_text("Hello World").unwrap();
        assert_eq!(
            node.to_base64(None, true).unwrap(),
            "data:text/plain;base64,SGVsbG8gV29ybGQ="
        );
        assert_eq!(node.to_base64(None, false).unwrap(), "SGVsbG8gV29ybGQ=");
        assert_eq!(
            node.to_base64(Some("application/x-custom"), true).unwrap(),
            "data:application/x-custom;base64,SGVsbG8gV29ybGQ="
        );

        let node_bin = memory_node("blob");
        node_bin.write_bytes(&[0xfb, 0xff]).unwrap();
        assert_eq!(
            node_bin.to_base64(None, true).unwrap(),
            "data:application/octet-stream;base64,+/8="
        );
    }

    #[test]
    fn node_to_base64_rejects_missing_and_directories() {
        assert!(matches!(
            memory_node("missing.txt").to_base64(None, true),
            Err(StorageError::NotFound { .. })
        ));
        let node_dir = memory_node("dir");
        node_dir.mkdir(false, false).unwrap();
        let err = node_dir.to_base64(None, true).unwrap_err();
        assert!(matches!(err, StorageError::IsADirectory(_)));
        assert!(err.to_string().contains("cannot encode directory"));
    }
}
