//! Storage constants shared by backends, the copy engine and virtual nodes.

/// Fixed chunk size for streaming copy and incremental hashing.
pub const N_SIZE_STREAM_CHUNK: usize = 64 * 1024;
/// Upper bound for the default parallel copy worker count.
pub const N_WORKERS_DEFAULT_MAX: usize = 8;
/// Separator between mount name and relative path (`mount:path/to/file`).
pub const C_MOUNT_SEPARATOR: char = ':';
/// Separator inserted before the counter when archive entry names collide.
pub const C_ARCHIVE_COLLISION_SEPARATOR: &str = "_";
/// Number of unchanged context lines around each diff hunk.
pub const N_DIFF_CONTEXT_LINES: usize = 3;

/// Backend type names registered by default in [`crate::manager::BackendRegistry`].
pub const TUP_BACKEND_TYPES_BUILTIN: [&str; 4] = ["local", "memory", "base64", "relative"];

/// Skip reason: destination already exists.
pub const C_REASON_EXISTS: &str = "destination exists";
/// Skip reason: destination size equals source size.
pub const C_REASON_SAME_SIZE: &str = "same size";
/// Skip reason: destination hash equals source hash.
pub const C_REASON_SAME_HASH: &str = "same hash";
/// Skip reason: custom predicate returned true.
pub const C_REASON_CUSTOM: &str = "custom predicate";
/// Skip reason: include/exclude patterns or filter callback rejected the file.
pub const C_REASON_FILTERED: &str = "filtered";
/// Skip reason: dry-run mode.
pub const C_REASON_DRY_RUN: &str = "dry run";
