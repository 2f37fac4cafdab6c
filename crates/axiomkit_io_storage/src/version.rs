//! Version selector resolution and compaction planning.
//!
//! Both operate on the oldest-to-newest revision list returned by a backend.

use crate::error::{StorageError, StorageResult};
use crate::spec::{EnumVersionSelector, SpecVersionDescriptor};

/// Pick the revision matching `selector`.
///
/// - `Index(i)`: Python-style indexing; `-1` is the latest, `0` the oldest.
/// - `Id(v)`: exact identifier match.
/// - `AsOf(t)`: most recent revision whose timestamp is not after `t`.
pub fn resolve_version<'a>(
    l_versions: &'a [SpecVersionDescriptor],
    selector: &EnumVersionSelector,
    path: &str,
) -> StorageResult<&'a SpecVersionDescriptor> {
    match selector {
        EnumVersionSelector::Index(n_index) => {
            let n_len = l_versions.len() as i64;
            let n_pos = if *n_index < 0 {
                n_len + n_index
            } else {
                *n_index
            };
            if !(0..n_len).contains(&n_pos) {
                return Err(StorageError::VersionIndex {
                    index: *n_index,
                    n_versions: l_versions.len(),
                });
            }
            Ok(&l_versions[n_pos as usize])
        }
        EnumVersionSelector::Id(version_id) => l_versions
            .iter()
            .find(|v| &v.version_id == version_id)
            .ok_or_else(|| StorageError::VersionNotFound {
                path: path.to_string(),
                version_id: version_id.clone(),
            }),
        EnumVersionSelector::AsOf(timestamp) => l_versions
            .iter()
            .filter(|v| v.timestamp <= *timestamp)
            .max_by_key(|v| (v.timestamp, v.n_ordinal))
            .ok_or_else(|| StorageError::NoVersionAtTime {
                path: path.to_string(),
                timestamp: *timestamp,
            }),
    }
}

/// Revisions whose fingerprint equals that of the immediately preceding revision.
///
/// Only direct repeats are dropped, so `A -> B -> A` keeps all three.
pub fn plan_compaction(l_versions: &[SpecVersionDescriptor]) -> Vec<&SpecVersionDescriptor> {
    l_versions
        .windows(2)
        .filter(|pair| pair[0].fingerprint == pair[1].fingerprint)
        .map(|pair| &pair[1])
        .collect()
}
