//! Storage option and record models: copy options, skip strategies, stat and version records.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::virtual_node::EnumContentNode;

////////////////////////////////////////////////////////////////////////////////
// #region CallbackTypes

/// File filter: `(source node, path relative to the copy root) -> keep?`.
pub type FnCopyFilter = Arc<dyn Fn(&StorageNode, &str) -> anyhow::Result<bool> + Send + Sync>;
/// Custom skip predicate: `(source, destination) -> skip?`.
pub type FnSkipPredicate =
    Arc<dyn Fn(&EnumContentNode, &StorageNode) -> anyhow::Result<bool> + Send + Sync>;
/// Called after a file has been copied: `(source, destination)`.
pub type FnOnFile = Arc<dyn Fn(&EnumContentNode, &StorageNode) + Send + Sync>;
/// Called when a file is skipped or filtered out: `(source, reason)`.
pub type FnOnSkip = Arc<dyn Fn(&EnumContentNode, &str) + Send + Sync>;
/// Called when a file copy fails: `(source, error)`.
pub type FnOnError = Arc<dyn Fn(&EnumContentNode, &StorageError) + Send + Sync>;
/// Called after each processed file: `(done, total)`.
pub type FnProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Pattern matching mode for include/exclude lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCopyPatternMode {
    /// Shell-like wildcards (`*`, `?`, character classes).
    #[default]
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Substring match.
    Literal,
}

/// Policy deciding whether an existing destination may be left untouched.
#[derive(Clone, Default)]
pub enum EnumSkipStrategy {
    /// Always copy.
    #[default]
    Never,
    /// Skip once the destination exists.
    IfExists,
    /// Skip when source and destination sizes are equal.
    IfSameSize,
    /// Skip when source and destination content hashes are equal.
    IfSameHash,
    /// Skip when the predicate returns `true`.
    Custom(FnSkipPredicate),
}

impl EnumSkipStrategy {
    /// Build a custom strategy from a closure.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&EnumContentNode, &StorageNode) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Stable lower-case name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::IfExists => "exists",
            Self::IfSameSize => "size",
            Self::IfSameHash => "hash",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for EnumSkipStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnumSkipStrategy::{}", self.name())
    }
}

impl FromStr for EnumSkipStrategy {
    type Err = StorageError;

    fn from_str(value: &str) -> StorageResult<Self> {
        match value {
            "never" => Ok(Self::Never),
            "exists" => Ok(Self::IfExists),
            "size" => Ok(Self::IfSameSize),
            "hash" => Ok(Self::IfSameHash),
            "custom" => Err(StorageError::config(
                "skip='custom' requires a predicate; use EnumSkipStrategy::custom",
            )),
            _ => Err(StorageError::config(format!(
                "Invalid skip strategy: `{value}`. Expected one of: ['never', 'exists', 'size', 'hash']"
            ))),
        }
    }
}

/// Outcome of skip evaluation for one `(source, destination)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumSkipDecision {
    /// Leave the destination untouched.
    Skip(String),
    /// Copy the source.
    Proceed,
}

impl EnumSkipDecision {
    /// True for [`EnumSkipDecision::Skip`].
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Permission level of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumMountPermission {
    /// Read, list, stat.
    ReadOnly,
    /// Everything except delete.
    ReadWrite,
    /// Full access.
    #[default]
    Delete,
}

impl EnumMountPermission {
    /// Writes are permitted.
    pub fn allows_write(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Deletes are permitted.
    pub fn allows_delete(self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// Access mode of a native local path handed to external tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumLocalPathMode {
    /// Existing content is made available; nothing is written back.
    #[default]
    Read,
    /// Starts empty; content is uploaded on finish.
    Write,
    /// Existing content (if any) is made available and uploaded on finish.
    ReadWrite,
}

impl EnumLocalPathMode {
    /// Current content must be fetched into the local file.
    pub fn if_read(self) -> bool {
        !matches!(self, Self::Write)
    }

    /// Local file content is written back on finish.
    pub fn if_write(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Version selector accepted by the version resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumVersionSelector {
    /// Ordinal over the oldest-to-newest list; negative values count from the end.
    Index(i64),
    /// Backend version identifier.
    Id(String),
    /// Latest version at or before this instant.
    AsOf(DateTime<Utc>),
}

impl From<i64> for EnumVersionSelector {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<i32> for EnumVersionSelector {
    fn from(value: i32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<&str> for EnumVersionSelector {
    fn from(value: &str) -> Self {
        Self::Id(value.to_string())
    }
}

impl From<DateTime<Utc>> for EnumVersionSelector {
    fn from(value: DateTime<Utc>) -> Self {
        Self::AsOf(value)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsInit

/// Stat record for one existing path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecNodeStat {
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Modification time as Unix seconds.
    pub mtime: f64,
    /// Path is a directory.
    pub is_dir: bool,
}

impl SpecNodeStat {
    /// Stat for a regular file.
    pub fn file(size: u64, mtime: f64) -> Self {
        Self {
            size,
            mtime,
            is_dir: false,
        }
    }

    /// Stat for a directory.
    pub fn directory(mtime: f64) -> Self {
        Self {
            size: 0,
            mtime,
            is_dir: true,
        }
    }
}

/// Metadata of one historical revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecVersionDescriptor {
    /// Backend revision identifier.
    pub version_id: String,
    /// Position in the oldest-to-newest list.
    pub n_ordinal: usize,
    /// Time the revision was written.
    pub timestamp: DateTime<Utc>,
    /// Content size in bytes.
    pub size: u64,
    /// Content fingerprint (lower-case hex MD5).
    pub fingerprint: String,
    /// Revision is the current one.
    pub if_latest: bool,
}

/// One copy failure item with node path + error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCopyError {
    /// Failed source node path.
    pub path: String,
    /// User-facing error text.
    pub exception: String,
}

/// One entry of the callback invocation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumCopyEvent {
    /// `on_file` was invoked.
    Copied {
        /// Source node path.
        source: String,
        /// Destination node path.
        destination: String,
    },
    /// `on_skip` was invoked.
    Skipped {
        /// Source node path.
        source: String,
        /// Skip reason.
        reason: String,
    },
    /// `on_error` was invoked.
    Failed {
        /// Source node path.
        source: String,
        /// Error text.
        exception: String,
    },
}

/// Input options for [`crate::copy::copy`].
#[derive(Clone, Default)]
pub struct SpecCopyOptions {
    /// Include patterns applied to file basename and relative path.
    pub patterns_include: Option<Vec<String>>,
    /// Exclude patterns applied to file basename and relative path.
    pub patterns_exclude: Option<Vec<String>>,
    /// Exclude patterns applied to directory basename and relative path.
    pub patterns_exclude_dirs: Option<Vec<String>>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumCopyPatternMode,
    /// Per-file filter callback.
    pub filter: Option<FnCopyFilter>,
    /// Skip strategy for existing destinations.
    pub rule_skip: EnumSkipStrategy,
    /// Called after each copied file.
    pub on_file: Option<FnOnFile>,
    /// Called for each skipped or filtered file.
    pub on_skip: Option<FnOnSkip>,
    /// Called for each failed file.
    pub on_error: Option<FnOnError>,
    /// Called after each processed file.
    pub progress: Option<FnProgress>,
    /// Abort the run on the first per-file failure.
    pub if_fail_fast: bool,
    /// Do not mutate the destination; record what would happen.
    pub if_dry_run: bool,
    /// Maximum worker threads; `None` or `1` copies sequentially.
    pub num_workers_max: Option<usize>,
    /// Cooperative cancellation flag, checked between files.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SpecCopyOptions {
    /// Options with only the skip strategy set.
    pub fn with_skip(rule_skip: EnumSkipStrategy) -> Self {
        Self {
            rule_skip,
            ..Self::default()
        }
    }
}

impl fmt::Debug for SpecCopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecCopyOptions")
            .field("patterns_include", &self.patterns_include)
            .field("patterns_exclude", &self.patterns_exclude)
            .field("patterns_exclude_dirs", &self.patterns_exclude_dirs)
            .field("rule_pattern", &self.rule_pattern)
            .field("filter", &self.filter.is_some())
            .field("rule_skip", &self.rule_skip)
            .field("if_fail_fast", &self.if_fail_fast)
            .field("if_dry_run", &self.if_dry_run)
            .field("num_workers_max", &self.num_workers_max)
            .finish_non_exhaustive()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
