//! Virtual nodes: read-only content computed from other nodes at read time.
//!
//! - [`ConcatNode`]: ordered concatenation, streamed lazily source by source.
//! - [`DiffNode`]: unified line diff between two text nodes.
//! - [`EnumContentNode`]: anything that can be read as a copy source.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use similar::TextDiff;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::backend::TypeReadStream;
use crate::conf::{C_ARCHIVE_COLLISION_SEPARATOR, N_DIFF_CONTEXT_LINES};
use crate::copy::copy;
use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::report::ReportCopy;
use crate::spec::{SpecCopyOptions, SpecNodeStat};
use crate::util::copy_stream_chunked;

static N_VIRTUAL_ID_NEXT: AtomicU64 = AtomicU64::new(0);
/// Serialises source-list mutations so the cycle check and the insert are atomic.
static LOCK_CONCAT_GRAPH: Mutex<()> = Mutex::new(());

const C_CONCAT_NAME: &str = "concat";
const C_DIFF_NAME: &str = "diff";

////////////////////////////////////////////////////////////////////////////////
// #region ContentNode

/// Readable node: a storage node or a virtual node.
#[derive(Debug, Clone)]
pub enum EnumContentNode {
    /// Physical node on a mounted backend.
    Storage(StorageNode),
    /// Concatenation of other nodes.
    Concat(ConcatNode),
    /// Line diff of two nodes.
    Diff(DiffNode),
}

impl From<StorageNode> for EnumContentNode {
    fn from(value: StorageNode) -> Self {
        Self::Storage(value)
    }
}

impl From<ConcatNode> for EnumContentNode {
    fn from(value: ConcatNode) -> Self {
        Self::Concat(value)
    }
}

impl From<DiffNode> for EnumContentNode {
    fn from(value: DiffNode) -> Self {
        Self::Diff(value)
    }
}

impl fmt::Display for EnumContentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

impl EnumContentNode {
    /// Node has no physical existence.
    pub fn is_virtual(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }

    /// Storage node, when this is one.
    pub fn as_storage(&self) -> Option<&StorageNode> {
        match self {
            Self::Storage(node) => Some(node),
            _ => None,
        }
    }

    /// `mount:path` for storage nodes, a descriptive label for virtual ones.
    pub fn full_path(&self) -> String {
        match self {
            Self::Storage(node) => node.full_path(),
            Self::Concat(node) => node.describe(),
            Self::Diff(node) => node.describe(),
        }
    }

    /// Name used when the node lands inside a directory or an archive.
    pub fn basename(&self) -> String {
        match self {
            Self::Storage(node) => node.basename().to_string(),
            Self::Concat(_) => C_CONCAT_NAME.to_string(),
            Self::Diff(_) => C_DIFF_NAME.to_string(),
        }
    }

    /// Virtual nodes never exist.
    pub fn exists(&self) -> bool {
        match self {
            Self::Storage(node) => node.exists(),
            _ => false,
        }
    }

    /// Stat; virtual nodes report `Ok(None)`.
    pub fn stat(&self) -> StorageResult<Option<SpecNodeStat>> {
        match self {
            Self::Storage(node) => node.stat(),
            _ => Ok(None),
        }
    }

    /// Existing directory.
    pub fn is_dir(&self) -> bool {
        match self {
            Self::Storage(node) => node.is_dir(),
            _ => false,
        }
    }

    /// Open a chunked read stream.
    pub fn open_read(&self) -> StorageResult<TypeReadStream> {
        match self {
            Self::Storage(node) => node.open_read(),
            Self::Concat(node) => node.open_read(),
            Self::Diff(node) => node.open_read(),
        }
    }

    /// Whole content as bytes.
    pub fn read_bytes(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn references(&self, n_id: u64) -> bool {
        match self {
            Self::Storage(_) => false,
            Self::Concat(node) => {
                node.n_id == n_id || node.l_sources.read().iter().any(|s| s.references(n_id))
            }
            Self::Diff(node) => node.node_a.references(n_id) || node.node_b.references(n_id),
        }
    }
}

fn refuse_virtual(operation: &'static str, name: String) -> StorageError {
    StorageError::VirtualNode { operation, name }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Concat

/// Ordered concatenation of other nodes.
///
/// Sources are referenced, not snapshotted: reading again after a source changes
/// yields the new content. Clones share the same source list.
#[derive(Clone)]
pub struct ConcatNode {
    n_id: u64,
    l_sources: Arc<RwLock<Vec<EnumContentNode>>>,
}

impl Default for ConcatNode {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConcatNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcatNode")
            .field("n_id", &self.n_id)
            .field("l_sources", &*self.l_sources.read())
            .finish()
    }
}

impl ConcatNode {
    /// Empty concatenation.
    pub fn new() -> Self {
        Self {
            n_id: N_VIRTUAL_ID_NEXT.fetch_add(1, Ordering::Relaxed),
            l_sources: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Concatenation of `nodes`, in order.
    pub fn from_nodes<I, N>(nodes: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<EnumContentNode>,
    {
        let node_concat = Self::new();
        node_concat.extend(nodes)?;
        Ok(node_concat)
    }

    fn describe(&self) -> String {
        format!("{C_CONCAT_NAME}#{}", self.n_id)
    }

    /// Add one source at the end.
    ///
    /// Fails with [`StorageError::CyclicVirtualNode`] when the source is or contains
    /// this node.
    pub fn append(&self, node: impl Into<EnumContentNode>) -> StorageResult<()> {
        let node = node.into();
        let _guard = LOCK_CONCAT_GRAPH.lock();
        if node.references(self.n_id) {
            return Err(StorageError::CyclicVirtualNode(format!(
                "{} cannot contain {}",
                self.describe(),
                node.full_path()
            )));
        }
        self.l_sources.write().push(node);
        Ok(())
    }

    /// Add several sources at the end; nothing is added when any would form a cycle.
    pub fn extend<I, N>(&self, nodes: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = N>,
        N: Into<EnumContentNode>,
    {
        let l_nodes: Vec<EnumContentNode> = nodes.into_iter().map(Into::into).collect();
        let _guard = LOCK_CONCAT_GRAPH.lock();
        if let Some(node) = l_nodes.iter().find(|n| n.references(self.n_id)) {
            return Err(StorageError::CyclicVirtualNode(format!(
                "{} cannot contain {}",
                self.describe(),
                node.full_path()
            )));
        }
        self.l_sources.write().extend(l_nodes);
        Ok(())
    }

    /// Current sources, in order.
    pub fn sources(&self) -> Vec<EnumContentNode> {
        self.l_sources.read().clone()
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.l_sources.read().len()
    }

    /// No sources.
    pub fn is_empty(&self) -> bool {
        self.l_sources.read().is_empty()
    }

    /// Always `false`.
    pub fn exists(&self) -> bool {
        false
    }

    /// Lazy stream over every source in order; one source is open at a time.
    pub fn open_read(&self) -> StorageResult<TypeReadStream> {
        Ok(Box::new(ConcatReader {
            l_pending: self.sources().into(),
            reader_cur: None,
        }))
    }

    /// Concatenated bytes.
    pub fn read_bytes(&self) -> StorageResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Concatenated UTF-8 text.
    pub fn read_text(&self) -> StorageResult<String> {
        String::from_utf8(self.read_bytes()?).map_err(|e| {
            StorageError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })
    }

    /// Always fails: virtual nodes are read-only.
    pub fn write_bytes(&self, _data: &[u8]) -> StorageResult<StorageNode> {
        Err(refuse_virtual("write", self.describe()))
    }

    /// Always fails: virtual nodes are read-only.
    pub fn delete(&self) -> StorageResult<()> {
        Err(refuse_virtual("delete", self.describe()))
    }

    /// Copy the concatenated content to `destination`.
    pub fn materialize_to(
        &self,
        destination: &StorageNode,
        spec_cp_options: SpecCopyOptions,
    ) -> StorageResult<ReportCopy> {
        copy(&EnumContentNode::from(self.clone()), destination, spec_cp_options)
    }

    /// Zip archive with one entry per source, named by the source basename.
    ///
    /// Repeated names get a numeric suffix before the extension (`a.txt`,
    /// `a_1.txt`, `a_2.txt`) in source order.
    pub fn to_archive(&self) -> StorageResult<Vec<u8>> {
        let l_entries = self
            .sources()
            .into_iter()
            .map(|node| (node.basename(), node))
            .collect();
        build_archive(l_entries)
    }
}

struct ConcatReader {
    l_pending: VecDeque<EnumContentNode>,
    reader_cur: Option<TypeReadStream>,
}

impl Read for ConcatReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.reader_cur.is_none() {
                let Some(node) = self.l_pending.pop_front() else {
                    return Ok(0);
                };
                self.reader_cur = Some(node.open_read().map_err(io::Error::other)?);
            }
            let Some(reader) = self.reader_cur.as_mut() else {
                continue;
            };
            match reader.read(buf)? {
                0 => self.reader_cur = None,
                n => return Ok(n),
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Diff

/// Unified line diff of `node_a` against `node_b`.
#[derive(Debug, Clone)]
pub struct DiffNode {
    node_a: Box<EnumContentNode>,
    node_b: Box<EnumContentNode>,
}

impl DiffNode {
    /// Diff of two nodes; content is only read on demand.
    pub fn new(node_a: impl Into<EnumContentNode>, node_b: impl Into<EnumContentNode>) -> Self {
        Self {
            node_a: Box::new(node_a.into()),
            node_b: Box::new(node_b.into()),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{C_DIFF_NAME}({}, {})",
            self.node_a.full_path(),
            self.node_b.full_path()
        )
    }

    fn read_side(node: &EnumContentNode) -> StorageResult<String> {
        String::from_utf8(node.read_bytes()?)
            .map_err(|_| StorageError::BinaryDiff(node.full_path()))
    }

    /// Unified diff text; empty when both sides are identical.
    ///
    /// Fails with [`StorageError::BinaryDiff`] when either side is not UTF-8.
    pub fn read_text(&self) -> StorageResult<String> {
        let txt_a = Self::read_side(&self.node_a)?;
        let txt_b = Self::read_side(&self.node_b)?;
        if txt_a == txt_b {
            return Ok(String::new());
        }
        let c_name_a = self.node_a.full_path();
        let c_name_b = self.node_b.full_path();
        Ok(TextDiff::from_lines(&txt_a, &txt_b)
            .unified_diff()
            .context_radius(N_DIFF_CONTEXT_LINES)
            .header(&c_name_a, &c_name_b)
            .to_string())
    }

    /// Diff text as bytes.
    pub fn read_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(self.read_text()?.into_bytes())
    }

    /// Stream over the diff text.
    pub fn open_read(&self) -> StorageResult<TypeReadStream> {
        Ok(Box::new(Cursor::new(self.read_bytes()?)))
    }

    /// Always `false`.
    pub fn exists(&self) -> bool {
        false
    }

    /// Always fails: virtual nodes are read-only.
    pub fn write_bytes(&self, _data: &[u8]) -> StorageResult<StorageNode> {
        Err(refuse_virtual("write", self.describe()))
    }

    /// Copy the diff text to `destination`.
    pub fn materialize_to(
        &self,
        destination: &StorageNode,
        spec_cp_options: SpecCopyOptions,
    ) -> StorageResult<ReportCopy> {
        copy(&EnumContentNode::from(self.clone()), destination, spec_cp_options)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Archive

fn unique_entry_name(c_name: &str, set_used: &mut HashSet<String>) -> String {
    if set_used.insert(c_name.to_string()) {
        return c_name.to_string();
    }
    let (c_stem, c_ext) = match c_name.rfind('.') {
        Some(n_pos) if n_pos > 0 && !c_name[..n_pos].ends_with('/') => c_name.split_at(n_pos),
        _ => (c_name, ""),
    };
    let mut n_suffix = 1_usize;
    loop {
        let c_candidate = format!("{c_stem}{C_ARCHIVE_COLLISION_SEPARATOR}{n_suffix}{c_ext}");
        if set_used.insert(c_candidate.clone()) {
            return c_candidate;
        }
        n_suffix += 1;
    }
}

/// Zip `(entry name, node)` pairs in order, deflate-compressed.
pub(crate) fn build_archive(l_entries: Vec<(String, EnumContentNode)>) -> StorageResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let cfg_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut set_used = HashSet::new();

    for (c_name, node) in l_entries {
        let c_entry = unique_entry_name(&c_name, &mut set_used);
        writer
            .start_file(c_entry, cfg_options)
            .map_err(|e| StorageError::Io(io::Error::other(e)))?;
        let mut reader = node.open_read()?;
        copy_stream_chunked(&mut reader, &mut writer)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| StorageError::Io(io::Error::other(e)))?;
    Ok(cursor.into_inner())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::{Cursor, Read};
    use std::sync::{Arc, Barrier};

    use super::{ConcatNode, DiffNode, EnumContentNode, unique_entry_name};
    use crate::backend::{MemoryBackend, StorageBackend};
    use crate::error::StorageError;
    use crate::node::StorageNode;
    use crate::spec::SpecCopyOptions;

    fn make_node(backend: &Arc<dyn StorageBackend>, path: &str, txt: &str) -> StorageNode {
        let node = StorageNode::new("mem", Arc::clone(backend), path).unwrap();
        node.write_text(txt).unwrap();
        node
    }

    fn memory() -> Arc<dyn StorageBackend> {
        Arc::new(MemoryBackend::new())
    }

    #[test]
    fn concat_reads_sources_in_order_and_tracks_appends() {
        let backend = memory();
        let node_concat = ConcatNode::from_nodes([
            make_node(&backend, "a", "1"),
            make_node(&backend, "b", "2"),
            make_node(&backend, "c", "3"),
        ])
        .unwrap();
        assert_eq!(node_concat.read_text().unwrap(), "123");

        node_concat.append(make_node(&backend, "d", "4")).unwrap();
        assert_eq!(node_concat.read_text().unwrap(), "1234");
        assert_eq!(node_concat.len(), 4);
    }

    #[test]
    fn concat_of_nothing_is_empty() {
        let node_concat = ConcatNode::new();
        assert!(node_concat.is_empty());
        assert!(node_concat.read_bytes().unwrap().is_empty());
    }

    #[test]
    fn concat_references_live_content() {
        let backend = memory();
        let node_a = make_node(&backend, "a", "old");
        let node_concat = ConcatNode::from_nodes([node_a.clone()]).unwrap();
        assert_eq!(node_concat.read_text().unwrap(), "old");
        node_a.write_text("new").unwrap();
        assert_eq!(node_concat.read_text().unwrap(), "new");
    }

    #[test]
    fn concat_streams_large_sources_in_small_reads() {
        let backend = memory();
        let c_big = "x".repeat(200_000);
        let node_concat = ConcatNode::from_nodes([
            make_node(&backend, "big", &c_big),
            make_node(&backend, "tail", "!"),
        ])
        .unwrap();
        let mut reader = node_concat.open_read().unwrap();
        let mut buf = [0_u8; 7];
        let mut n_total = 0;
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            n_total += n;
        }
        assert_eq!(n_total, 200_001);
    }

    #[test]
    fn concat_nested_and_cycle_rejected() {
        let backend = memory();
        let node_inner = ConcatNode::from_nodes([make_node(&backend, "a", "A")]).unwrap();
        let node_outer = ConcatNode::from_nodes([
            EnumContentNode::from(node_inner.clone()),
            EnumContentNode::from(make_node(&backend, "b", "B")),
        ])
        .unwrap();
        assert_eq!(node_outer.read_text().unwrap(), "AB");

        assert!(matches!(
            node_outer.append(node_outer.clone()),
            Err(StorageError::CyclicVirtualNode(_))
        ));
        assert!(matches!(
            node_inner.append(node_outer.clone()),
            Err(StorageError::CyclicVirtualNode(_))
        ));
        let node_diff = DiffNode::new(node_outer.clone(), make_node(&backend, "c", "C"));
        assert!(matches!(
            node_inner.extend([node_diff]),
            Err(StorageError::CyclicVirtualNode(_))
        ));
        assert_eq!(node_inner.len(), 1);
    }

    #[test]
    fn concat_concurrent_mutual_appends_never_form_a_cycle() {
        for _ in 0..200 {
            let node_a = ConcatNode::new();
            let node_b = ConcatNode::new();
            let barrier = Barrier::new(2);
            let (res_a, res_b) = std::thread::scope(|scope| {
                let handle_a = scope.spawn(|| {
                    barrier.wait();
                    node_a.append(node_b.clone())
                });
                let handle_b = scope.spawn(|| {
                    barrier.wait();
                    node_b.append(node_a.clone())
                });
                (handle_a.join().unwrap(), handle_b.join().unwrap())
            });
            assert!(res_a.is_ok() != res_b.is_ok());
            assert_eq!(node_a.len() + node_b.len(), 1);
        }
    }

    #[test]
    fn virtual_nodes_never_exist_and_refuse_writes() {
        let backend = memory();
        let node_concat = ConcatNode::new();
        let node_diff = DiffNode::new(make_node(&backend, "a", "1"), make_node(&backend, "b", "2"));
        assert!(!node_concat.exists());
        assert!(!node_diff.exists());
        assert!(!EnumContentNode::from(node_concat.clone()).exists());
        assert!(matches!(
            node_concat.write_bytes(b"x"),
            Err(StorageError::VirtualNode { .. })
        ));
        assert!(matches!(
            node_diff.write_bytes(b"x"),
            Err(StorageError::VirtualNode { .. })
        ));
        assert!(matches!(
            node_concat.delete(),
            Err(StorageError::VirtualNode { .. })
        ));
    }

    #[test]
    fn diff_empty_for_identical_text() {
        let backend = memory();
        let node_diff = DiffNode::new(
            make_node(&backend, "a", "same\ntext\n"),
            make_node(&backend, "b", "same\ntext\n"),
        );
        assert_eq!(node_diff.read_text().unwrap(), "");
    }

    #[test]
    fn diff_mentions_changed_lines() {
        let backend = memory();
        let node_diff = DiffNode::new(
            make_node(&backend, "a", "line1\nline2\nline3\n"),
            make_node(&backend, "b", "line1\nCHANGED\nline3\n"),
        );
        let txt = node_diff.read_text().unwrap();
        assert!(txt.contains("--- mem:a"));
        assert!(txt.contains("+++ mem:b"));
        assert!(txt.contains("-line2"));
        assert!(txt.contains("+CHANGED"));
    }

    #[test]
    fn diff_binary_rejected() {
        let backend = memory();
        let node_bin = StorageNode::new("mem", Arc::clone(&backend), "bin").unwrap();
        node_bin.write_bytes(&[0xff, 0xfe, 0x00]).unwrap();
        let node_diff = DiffNode::new(node_bin, make_node(&backend, "t", "text"));
        assert!(matches!(
            node_diff.read_text(),
            Err(StorageError::BinaryDiff(_))
        ));
    }

    #[test]
    fn concat_materialize_to_destination() {
        let backend = memory();
        let node_concat = ConcatNode::from_nodes([
            make_node(&backend, "p1", "part1-"),
            make_node(&backend, "p2", "part2"),
        ])
        .unwrap();
        let node_dst = StorageNode::new("mem", Arc::clone(&backend), "out/joined.txt").unwrap();
        let report = node_concat
            .materialize_to(&node_dst, SpecCopyOptions::default())
            .unwrap();
        assert_eq!(report.cnt_copied, 1);
        assert_eq!(node_dst.read_text().unwrap(), "part1-part2");
    }

    #[test]
    fn archive_entry_names_get_suffix_on_collision() {
        let mut set_used = HashSet::new();
        assert_eq!(unique_entry_name("a.txt", &mut set_used), "a.txt");
        assert_eq!(unique_entry_name("a.txt", &mut set_used), "a_1.txt");
        assert_eq!(unique_entry_name("a.txt", &mut set_used), "a_2.txt");
        assert_eq!(unique_entry_name("README", &mut set_used), "README");
        assert_eq!(unique_entry_name("README", &mut set_used), "README_1");
        assert_eq!(unique_entry_name(".env", &mut set_used), ".env");
        assert_eq!(unique_entry_name(".env", &mut set_used), ".env_1");
    }

    #[test]
    fn concat_archive_contains_one_entry_per_source() {
        let backend = memory();
        let node_concat = ConcatNode::from_nodes([
            make_node(&backend, "x/data.txt", "one"),
            make_node(&backend, "y/data.txt", "two"),
            make_node(&backend, "notes.md", "three"),
        ])
        .unwrap();
        let buf_zip = node_concat.to_archive().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(buf_zip)).unwrap();
        let mut l_names: Vec<String> = archive.file_names().map(str::to_string).collect();
        l_names.sort();
        assert_eq!(l_names, vec!["data.txt", "data_1.txt", "notes.md"]);

        let mut txt = String::new();
        archive
            .by_name("data_1.txt")
            .unwrap()
            .read_to_string(&mut txt)
            .unwrap();
        assert_eq!(txt, "two");
    }

    #[test]
    fn node_archive_of_directory_keys_relative_paths() {
        let backend = memory();
        make_node(&backend, "tree/a.txt", "A");
        make_node(&backend, "tree/sub/b.txt", "B");
        let node_tree = StorageNode::new("mem", Arc::clone(&backend), "tree").unwrap();

        let buf_zip = node_tree.to_archive().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(buf_zip)).unwrap();
        let mut l_names: Vec<String> = archive.file_names().map(str::to_string).collect();
        l_names.sort();
        assert_eq!(l_names, vec!["a.txt", "sub/b.txt"]);

        let mut txt = String::new();
        archive
            .by_name("sub/b.txt")
            .unwrap()
            .read_to_string(&mut txt)
            .unwrap();
        assert_eq!(txt, "B");
    }
}
