//! Skip-strategy evaluation for one `(source, destination)` pair.

use tracing::warn;

use crate::conf::{C_REASON_CUSTOM, C_REASON_EXISTS, C_REASON_SAME_HASH, C_REASON_SAME_SIZE};
use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::spec::{EnumSkipDecision, EnumSkipStrategy};
use crate::virtual_node::EnumContentNode;

/// Decide whether copying `source` onto `destination` can be skipped.
///
/// An absent destination always proceeds. Size and hash comparisons fail open:
/// any stat or hash failure resolves to [`EnumSkipDecision::Proceed`]. A failing
/// custom predicate returns [`StorageError::SkipPredicate`].
pub fn evaluate_skip(
    rule_skip: &EnumSkipStrategy,
    source: &EnumContentNode,
    destination: &StorageNode,
) -> StorageResult<EnumSkipDecision> {
    let stat_dst = match destination.stat() {
        Ok(Some(stat)) => stat,
        Ok(None) => return Ok(EnumSkipDecision::Proceed),
        Err(e) => {
            warn!(
                destination = %destination.full_path(),
                error = %e,
                "destination stat failed; copying"
            );
            return Ok(EnumSkipDecision::Proceed);
        }
    };

    match rule_skip {
        EnumSkipStrategy::Never => Ok(EnumSkipDecision::Proceed),
        EnumSkipStrategy::IfExists => Ok(EnumSkipDecision::Skip(C_REASON_EXISTS.to_string())),
        EnumSkipStrategy::IfSameSize => {
            let stat_src = match source.stat() {
                Ok(Some(stat)) if !stat.is_dir => stat,
                Ok(_) => return Ok(EnumSkipDecision::Proceed),
                Err(e) => {
                    warn!(source = %source.full_path(), error = %e, "source stat failed; copying");
                    return Ok(EnumSkipDecision::Proceed);
                }
            };
            if !stat_dst.is_dir && stat_src.size == stat_dst.size {
                return Ok(EnumSkipDecision::Skip(C_REASON_SAME_SIZE.to_string()));
            }
            Ok(EnumSkipDecision::Proceed)
        }
        EnumSkipStrategy::IfSameHash => {
            let EnumContentNode::Storage(node_src) = source else {
                return Ok(EnumSkipDecision::Proceed);
            };
            if stat_dst.is_dir {
                return Ok(EnumSkipDecision::Proceed);
            }
            let res_hashes = node_src
                .content_hash()
                .and_then(|c_src| Ok((c_src, destination.content_hash()?)));
            match res_hashes {
                Ok((c_src, c_dst)) if c_src == c_dst => {
                    Ok(EnumSkipDecision::Skip(C_REASON_SAME_HASH.to_string()))
                }
                Ok(_) => Ok(EnumSkipDecision::Proceed),
                Err(e) => {
                    warn!(
                        source = %source.full_path(),
                        destination = %destination.full_path(),
                        error = %e,
                        "hash comparison failed; copying"
                    );
                    Ok(EnumSkipDecision::Proceed)
                }
            }
        }
        EnumSkipStrategy::Custom(predicate) => match predicate(source, destination) {
            Ok(true) => Ok(EnumSkipDecision::Skip(C_REASON_CUSTOM.to_string())),
            Ok(false) => Ok(EnumSkipDecision::Proceed),
            Err(e) => Err(StorageError::SkipPredicate {
                path: source.full_path(),
                message: format!("{e:#}"),
            }),
        },
    }
}
