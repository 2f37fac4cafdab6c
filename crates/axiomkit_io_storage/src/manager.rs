//! Mount registry: configuration, backend factories and node resolution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::backend::{Base64Backend, LocalBackend, MemoryBackend, RelativeBackend, StorageBackend};
use crate::conf::{C_MOUNT_SEPARATOR, TUP_BACKEND_TYPES_BUILTIN};
use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::spec::EnumMountPermission;
use crate::util::split_path_segments;
use crate::virtual_node::{ConcatNode, DiffNode, EnumContentNode};

/// Mount name -> backend.
pub type TypeMountTable = BTreeMap<String, Arc<dyn StorageBackend>>;

/// Builds a backend from its mount configuration and the mounts defined so far.
pub type FnBackendFactory = Arc<
    dyn Fn(&SpecMountConfig, &TypeMountTable) -> StorageResult<Arc<dyn StorageBackend>>
        + Send
        + Sync,
>;

////////////////////////////////////////////////////////////////////////////////
// #region MountConfig

/// One mount definition.
///
/// ```json
/// {"name": "uploads", "type": "relative", "path": "home:uploads", "permissions": "readwrite"}
/// ```
///
/// Keys other than `name`, `type`, `path` and `permissions` are kept in
/// `options` for the backend factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMountConfig {
    /// Mount name used as the `mount:` prefix.
    pub name: String,
    /// Backend type registered in [`BackendRegistry`].
    #[serde(rename = "type")]
    pub backend_type: String,
    /// Root directory (`local`) or `parent:sub/path` (`relative`).
    #[serde(default, alias = "base_path", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Permission level for `relative` mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<EnumMountPermission>,
    /// Backend-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl SpecMountConfig {
    /// Config with no path or options.
    pub fn new(name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type: backend_type.into(),
            path: None,
            permissions: None,
            options: Map::new(),
        }
    }

    /// Set `path`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set `permissions`.
    pub fn with_permissions(mut self, enum_permission: EnumMountPermission) -> Self {
        self.permissions = Some(enum_permission);
        self
    }

    /// Set one backend option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    fn path_required(&self) -> StorageResult<&str> {
        self.path.as_deref().ok_or_else(|| {
            StorageError::config(format!(
                "{} storage '{}' missing required field: 'path'",
                self.backend_type, self.name
            ))
        })
    }

    fn option_flag(&self, key: &str) -> StorageResult<bool> {
        match self.options.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(StorageError::config(format!(
                "mount '{}': option '{key}' must be a boolean, got {other}",
                self.name
            ))),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Registry

/// Backend type name -> factory lookup table.
#[derive(Clone)]
pub struct BackendRegistry {
    dict_factories: BTreeMap<String, FnBackendFactory>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("types", &self.dict_factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BackendRegistry {
    /// Registry with no backend types.
    pub fn empty() -> Self {
        Self {
            dict_factories: BTreeMap::new(),
        }
    }

    /// Registry with `local`, `memory`, `base64` and `relative`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        let [c_local, c_memory, c_base64, c_relative] = TUP_BACKEND_TYPES_BUILTIN;
        registry.register(c_local, Arc::new(build_local));
        registry.register(c_memory, Arc::new(build_memory));
        registry.register(c_base64, Arc::new(build_base64));
        registry.register(c_relative, Arc::new(build_relative));
        registry
    }

    /// Add or replace the factory for `backend_type`.
    pub fn register(&mut self, backend_type: impl Into<String>, factory: FnBackendFactory) {
        self.dict_factories.insert(backend_type.into(), factory);
    }

    /// Registered type names, sorted.
    pub fn types(&self) -> Vec<String> {
        self.dict_factories.keys().cloned().collect()
    }

    /// Build the backend for `spec_config`.
    pub fn build(
        &self,
        spec_config: &SpecMountConfig,
        dict_mounts: &TypeMountTable,
    ) -> StorageResult<Arc<dyn StorageBackend>> {
        let factory = self
            .dict_factories
            .get(&spec_config.backend_type)
            .ok_or_else(|| {
                StorageError::config(format!(
                    "Unknown storage type '{}' for mount '{}'. Supported types: {}",
                    spec_config.backend_type,
                    spec_config.name,
                    self.types().join(", ")
                ))
            })?;
        factory(spec_config, dict_mounts)
    }
}

fn build_local(
    spec_config: &SpecMountConfig,
    _dict_mounts: &TypeMountTable,
) -> StorageResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(LocalBackend::new(spec_config.path_required()?)))
}

fn build_memory(
    spec_config: &SpecMountConfig,
    _dict_mounts: &TypeMountTable,
) -> StorageResult<Arc<dyn StorageBackend>> {
    let mut backend = MemoryBackend::new();
    if spec_config.option_flag("versioning")? {
        backend = backend.with_versioning();
    }
    if spec_config.option_flag("remote_digest")? {
        backend = backend.with_remote_digest();
    }
    Ok(Arc::new(backend))
}

fn build_base64(
    _spec_config: &SpecMountConfig,
    _dict_mounts: &TypeMountTable,
) -> StorageResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(Base64Backend::new()))
}

fn build_relative(
    spec_config: &SpecMountConfig,
    dict_mounts: &TypeMountTable,
) -> StorageResult<Arc<dyn StorageBackend>> {
    let (c_parent, path_sub) = split_mount_path(spec_config.path_required()?);
    let backend_parent = dict_mounts
        .get(c_parent)
        .ok_or_else(|| StorageError::MountNotFound(c_parent.to_string()))?;
    let path_prefix = split_path_segments(path_sub)?.join("/");
    Ok(Arc::new(RelativeBackend::new(
        Arc::clone(backend_parent),
        path_prefix,
        spec_config.permissions.unwrap_or_default(),
    )))
}

fn split_mount_path(mount_or_path: &str) -> (&str, &str) {
    mount_or_path
        .split_once(C_MOUNT_SEPARATOR)
        .unwrap_or((mount_or_path, ""))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Manager

/// Named mount points resolving `mount:path` strings to nodes.
///
/// The mount table is an immutable map swapped as a whole on reconfiguration;
/// lookups clone the current `Arc` and never block writers for long.
pub struct StorageManager {
    registry: BackendRegistry,
    dict_mounts: RwLock<Arc<TypeMountTable>>,
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("mounts", &self.mount_names())
            .finish()
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManager {
    /// Manager with the built-in backend types and no mounts.
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::with_builtins())
    }

    /// Manager resolving backend types through `registry`.
    pub fn with_registry(registry: BackendRegistry) -> Self {
        Self {
            registry,
            dict_mounts: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    fn snapshot(&self) -> Arc<TypeMountTable> {
        Arc::clone(&self.dict_mounts.read())
    }

    /// Add or replace mounts by name.
    ///
    /// Configs are applied in order, so a `relative` mount may refer to a mount
    /// defined earlier in the same call. Either every config applies or none does.
    pub fn configure(&self, l_configs: &[SpecMountConfig]) -> StorageResult<()> {
        let mut guard = self.dict_mounts.write();
        let mut dict_mounts = TypeMountTable::clone(&guard);
        for spec_config in l_configs {
            if spec_config.name.is_empty() || spec_config.name.contains(C_MOUNT_SEPARATOR) {
                return Err(StorageError::config(format!(
                    "invalid mount name '{}'",
                    spec_config.name
                )));
            }
            let backend = self.registry.build(spec_config, &dict_mounts)?;
            info!(
                mount = %spec_config.name,
                backend = backend.kind(),
                capabilities = %backend.capabilities(),
                "mount configured"
            );
            dict_mounts.insert(spec_config.name.clone(), backend);
        }
        *guard = Arc::new(dict_mounts);
        Ok(())
    }

    /// Configure from a JSON array of mount definitions.
    pub fn configure_json(&self, txt: &str) -> StorageResult<()> {
        let l_configs: Vec<SpecMountConfig> = serde_json::from_str(txt)
            .map_err(|e| StorageError::config(format!("Failed to parse JSON config: {e}")))?;
        self.configure(&l_configs)
    }

    /// Configure from a `.json` file holding an array of mount definitions.
    pub fn configure_file(&self, path_config: impl AsRef<Path>) -> StorageResult<()> {
        let path_config = path_config.as_ref();
        let c_ext = path_config
            .extension()
            .and_then(|v| v.to_str())
            .map(str::to_ascii_lowercase);
        if c_ext.as_deref() != Some("json") {
            return Err(StorageError::config(format!(
                "Unsupported configuration file format: {}. Use .json",
                path_config.display()
            )));
        }
        let txt = std::fs::read_to_string(path_config)?;
        self.configure_json(&txt)
    }

    /// Mount a ready-made backend under `name`, replacing any existing mount.
    pub fn add_mount(&self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        let name = name.into();
        let mut guard = self.dict_mounts.write();
        let mut dict_mounts = TypeMountTable::clone(&guard);
        info!(mount = %name, backend = backend.kind(), "mount added");
        dict_mounts.insert(name, backend);
        *guard = Arc::new(dict_mounts);
    }

    /// Remove a mount; returns whether it existed.
    pub fn remove_mount(&self, name: &str) -> bool {
        let mut guard = self.dict_mounts.write();
        if !guard.contains_key(name) {
            return false;
        }
        let mut dict_mounts = TypeMountTable::clone(&guard);
        dict_mounts.remove(name);
        *guard = Arc::new(dict_mounts);
        info!(mount = %name, "mount removed");
        true
    }

    /// Mount is configured.
    pub fn has_mount(&self, name: &str) -> bool {
        self.dict_mounts.read().contains_key(name)
    }

    /// Configured mount names, sorted.
    pub fn mount_names(&self) -> Vec<String> {
        self.dict_mounts.read().keys().cloned().collect()
    }

    /// Backend mounted under `name`.
    pub fn backend(&self, name: &str) -> StorageResult<Arc<dyn StorageBackend>> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::MountNotFound(name.to_string()))
    }

    /// Node for `mount:path` joined with `parts`; a bare mount name is its root.
    ///
    /// Paths are normalised: repeated and edge slashes are dropped and `..` is
    /// rejected with [`StorageError::PathTraversal`].
    pub fn node(&self, mount_or_path: &str, parts: &[&str]) -> StorageResult<StorageNode> {
        let (c_mount, path_initial) = split_mount_path(mount_or_path);
        let backend = self.backend(c_mount)?;
        let mut l_segments = split_path_segments(path_initial)?;
        for c_part in parts {
            l_segments.extend(split_path_segments(c_part)?);
        }
        debug!(mount = %c_mount, path = %l_segments.join("/"), "node resolved");
        Ok(StorageNode::from_segments(
            c_mount.to_string(),
            backend,
            l_segments,
        ))
    }

    /// Concatenation of `nodes`.
    pub fn concat_node<I, N>(&self, nodes: I) -> StorageResult<ConcatNode>
    where
        I: IntoIterator<Item = N>,
        N: Into<EnumContentNode>,
    {
        ConcatNode::from_nodes(nodes)
    }

    /// Unified diff of `node_a` against `node_b`.
    pub fn diff_node(
        &self,
        node_a: impl Into<EnumContentNode>,
        node_b: impl Into<EnumContentNode>,
    ) -> DiffNode {
        DiffNode::new(node_a, node_b)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
