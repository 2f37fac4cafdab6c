//! `axiomkit_io_storage` v1:
//! Rust-side storage abstraction for cross-backend content sync.
//!
//! Architecture:
//! - `backend`      : backend trait and built-ins (local, memory, base64, relative)
//! - `capability`   : backend capability descriptor
//! - `manager`      : mount registry and `mount:path` resolution
//! - `node`         : storage node (path algebra, I/O, hashing, versions)
//! - `local_path`   : native local paths for external tools
//! - `skip`         : skip-strategy evaluation
//! - `copy`         : cross-backend copy orchestration
//! - `virtual_node` : concat/diff nodes and archives
//! - `version`      : version selectors and compaction planning
//! - `spec`         : enums/options/records
//! - `report`       : run-time report model
//! - `error`        : error taxonomy
//! - `conf`         : shared constants
//! - `util`         : shared helper functions

pub mod backend;
pub mod capability;
pub mod conf;
pub mod copy;
pub mod error;
pub mod local_path;
pub mod manager;
pub mod node;
pub mod report;
pub mod skip;
pub mod spec;
mod util;
pub mod version;
pub mod virtual_node;

pub use backend::{
    Base64Backend, LocalBackend, MemoryBackend, RelativeBackend, StorageBackend,
    StorageWriteStream, TypeReadStream,
};
pub use capability::SpecBackendCapabilities;
pub use copy::copy;
pub use error::{StorageError, StorageResult};
pub use local_path::LocalPathGuard;
pub use manager::{
    BackendRegistry, FnBackendFactory, SpecMountConfig, StorageManager, TypeMountTable,
};
pub use node::StorageNode;
pub use report::{ReportCopy, ReportCopyBuilder};
pub use skip::evaluate_skip;
pub use spec::{
    EnumCopyEvent, EnumCopyPatternMode, EnumLocalPathMode, EnumMountPermission, EnumSkipDecision,
    EnumSkipStrategy, EnumVersionSelector, SpecCopyError, SpecCopyOptions, SpecNodeStat,
    SpecVersionDescriptor,
};
pub use version::{plan_compaction, resolve_version};
pub use virtual_node::{ConcatNode, DiffNode, EnumContentNode};
