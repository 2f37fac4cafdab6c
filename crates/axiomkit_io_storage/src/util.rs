use std::io::{self, Read, Write};

use globset::{Glob, GlobMatcher};
use md5::{Digest, Md5};
use regex::Regex;

use crate::conf::{N_SIZE_STREAM_CHUNK, N_WORKERS_DEFAULT_MAX};
use crate::error::{StorageError, StorageResult};
use crate::spec::EnumCopyPatternMode;

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypeCopyPatternSeq {
    Literal(Vec<String>),
    Glob(Vec<GlobMatcher>),
    Regex(Vec<Regex>),
}

impl TypeCopyPatternSeq {
    fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(v) => v.iter().any(|p| value.contains(p.as_str())),
            Self::Glob(v) => v.iter().any(|p| p.is_match(value)),
            Self::Regex(v) => v.iter().any(|p| p.is_match(value)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SpecCopyPatterns {
    pub(crate) patterns_include: Option<TypeCopyPatternSeq>,
    pub(crate) patterns_exclude: Option<TypeCopyPatternSeq>,
    pub(crate) patterns_exclude_dirs: Option<TypeCopyPatternSeq>,
}

impl SpecCopyPatterns {
    pub(crate) fn from_raw(
        patterns_include: Option<&[String]>,
        patterns_exclude: Option<&[String]>,
        patterns_exclude_dirs: Option<&[String]>,
        rule_pattern: EnumCopyPatternMode,
    ) -> StorageResult<Self> {
        Ok(Self {
            patterns_include: _compile(patterns_include, rule_pattern)?,
            patterns_exclude: _compile(patterns_exclude, rule_pattern)?,
            patterns_exclude_dirs: _compile(patterns_exclude_dirs, rule_pattern)?,
        })
    }

    /// File is rejected by include/exclude lists.
    ///
    /// A pattern hits when it matches either the basename or the relative path.
    pub(crate) fn should_exclude_file(&self, name: &str, path_rel: &str) -> bool {
        let b_included = match &self.patterns_include {
            None => true,
            Some(patterns) => patterns.is_match(name) || patterns.is_match(path_rel),
        };
        !b_included || _is_hit(self.patterns_exclude.as_ref(), name, path_rel)
    }

    /// Directory subtree is pruned by the directory exclude list.
    pub(crate) fn should_exclude_dir(&self, name: &str, path_rel: &str) -> bool {
        _is_hit(self.patterns_exclude_dirs.as_ref(), name, path_rel)
    }
}

fn _is_hit(patterns: Option<&TypeCopyPatternSeq>, name: &str, path_rel: &str) -> bool {
    patterns.is_some_and(|p| p.is_match(name) || p.is_match(path_rel))
}

fn _compile(
    patterns: Option<&[String]>,
    rule_pattern: EnumCopyPatternMode,
) -> StorageResult<Option<TypeCopyPatternSeq>> {
    let l_raw = match patterns {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    let seq = match rule_pattern {
        EnumCopyPatternMode::Literal => TypeCopyPatternSeq::Literal(l_raw.to_vec()),
        EnumCopyPatternMode::Glob => TypeCopyPatternSeq::Glob(
            l_raw
                .iter()
                .map(|c| Glob::new(c).map(|g| g.compile_matcher()).map_err(_err_pattern))
                .collect::<StorageResult<_>>()?,
        ),
        EnumCopyPatternMode::Regex => TypeCopyPatternSeq::Regex(
            l_raw
                .iter()
                .map(|c| Regex::new(c).map_err(_err_pattern))
                .collect::<StorageResult<_>>()?,
        ),
    };
    Ok(Some(seq))
}

fn _err_pattern(e: impl std::fmt::Display) -> StorageError {
    StorageError::InvalidPattern(format!("Invalid pattern in include/exclude: {e}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

/// Split a raw relative path into clean segments.
///
/// Empty and `.` segments are dropped, backslashes are treated as separators,
/// and any `..` segment is rejected.
pub(crate) fn split_path_segments(path_raw: &str) -> StorageResult<Vec<String>> {
    let mut l_segments = Vec::new();
    for c_part in path_raw.split(['/', '\\']) {
        match c_part {
            "" | "." => continue,
            ".." => return Err(StorageError::path_traversal(path_raw)),
            _ => l_segments.push(c_part.to_string()),
        }
    }
    Ok(l_segments)
}

/// Join clean segments with `/`, prefixing a non-empty base path.
pub(crate) fn join_path(path_base: &str, l_segments: &[String]) -> String {
    let path_rel = l_segments.join("/");
    let path_base = path_base.trim_matches('/');
    match (path_base.is_empty(), path_rel.is_empty()) {
        (true, _) => path_rel,
        (false, true) => path_base.to_string(),
        (false, false) => format!("{path_base}/{path_rel}"),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Streaming

/// Copy `reader` into `writer` in fixed-size chunks.
pub(crate) fn copy_stream_chunked(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
) -> io::Result<u64> {
    let mut buf_chunk = vec![0_u8; N_SIZE_STREAM_CHUNK];
    let mut n_bytes_total = 0_u64;
    loop {
        let n_bytes_read = match reader.read(&mut buf_chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf_chunk[..n_bytes_read])?;
        n_bytes_total += n_bytes_read as u64;
    }
    writer.flush()?;
    Ok(n_bytes_total)
}

/// Incremental MD5 over a stream, lower-case hex.
pub(crate) fn hash_stream_md5(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf_chunk = vec![0_u8; N_SIZE_STREAM_CHUNK];
    loop {
        let n_bytes_read = match reader.read(&mut buf_chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf_chunk[..n_bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// MD5 of an in-memory buffer, lower-case hex.
pub(crate) fn hash_bytes_md5(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Workers

/// Worker count for the copy stage. `None` keeps the run sequential.
pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu.max(N_WORKERS_DEFAULT_MAX)),
        None => 1,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{
        SpecCopyPatterns, calculate_worker_limit, copy_stream_chunked, hash_bytes_md5,
        hash_stream_md5, join_path, split_path_segments,
    };
    use crate::conf::N_SIZE_STREAM_CHUNK;
    use crate::error::StorageError;
    use crate::spec::EnumCopyPatternMode;

    fn patterns(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_path_segments_normalizes() {
        assert_eq!(
            split_path_segments("/a//b/./c/").unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_path_segments("").unwrap().is_empty());
    }

    #[test]
    fn split_path_segments_rejects_parent_traversal() {
        let err = split_path_segments("a/../b").unwrap_err();
        assert!(matches!(err, StorageError::PathTraversal(_)));
    }

    #[test]
    fn join_path_with_base() {
        let l_segments = vec!["x".to_string(), "y.txt".to_string()];
        assert_eq!(join_path("", &l_segments), "x/y.txt");
        assert_eq!(join_path("/base/", &l_segments), "base/x/y.txt");
        assert_eq!(join_path("base", &[]), "base");
    }

    #[test]
    fn patterns_match_basename_or_relative_path() {
        let spec_pats = SpecCopyPatterns::from_raw(
            Some(&patterns(&["*.py"])),
            Some(&patterns(&["__pycache__/*", "test_*"])),
            None,
            EnumCopyPatternMode::Glob,
        )
        .unwrap();
        assert!(!spec_pats.should_exclude_file("main.py", "src/main.py"));
        assert!(spec_pats.should_exclude_file("readme.md", "readme.md"));
        assert!(spec_pats.should_exclude_file("test_main.py", "test_main.py"));
        assert!(spec_pats.should_exclude_file("x.py", "__pycache__/x.py"));
    }

    #[test]
    fn patterns_regex_and_literal_modes() {
        let spec_regex = SpecCopyPatterns::from_raw(
            Some(&patterns(&[r"^report_\d+\.csv$"])),
            None,
            None,
            EnumCopyPatternMode::Regex,
        )
        .unwrap();
        assert!(!spec_regex.should_exclude_file("report_01.csv", "report_01.csv"));
        assert!(spec_regex.should_exclude_file("note.txt", "note.txt"));

        let spec_literal = SpecCopyPatterns::from_raw(
            None,
            None,
            Some(&patterns(&["cache"])),
            EnumCopyPatternMode::Literal,
        )
        .unwrap();
        assert!(spec_literal.should_exclude_dir("build_cache", "a/build_cache"));
        assert!(!spec_literal.should_exclude_dir("src", "src"));
    }

    #[test]
    fn patterns_invalid_glob_and_regex_rejected() {
        let err = SpecCopyPatterns::from_raw(
            Some(&patterns(&["["])),
            None,
            None,
            EnumCopyPatternMode::Glob,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPattern(_)));

        let err = SpecCopyPatterns::from_raw(
            Some(&patterns(&["("])),
            None,
            None,
            EnumCopyPatternMode::Regex,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPattern(_)));
    }

    #[test]
    fn stream_copy_spans_multiple_chunks() {
        let data: Vec<u8> = (0..(N_SIZE_STREAM_CHUNK * 2 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let mut reader = Cursor::new(data.clone());
        let mut writer: Vec<u8> = Vec::new();
        let n_bytes = copy_stream_chunked(&mut reader, &mut writer).unwrap();
        assert_eq!(n_bytes as usize, data.len());
        assert_eq!(writer, data);
    }

    #[test]
    fn stream_hash_matches_buffer_hash() {
        let data = vec![7_u8; N_SIZE_STREAM_CHUNK + 3];
        let c_hash = hash_stream_md5(&mut Cursor::new(data.clone())).unwrap();
        assert_eq!(c_hash, hash_bytes_md5(&data));
        assert_eq!(hash_bytes_md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn worker_limit_defaults_to_sequential() {
        assert_eq!(calculate_worker_limit(None), 1);
        assert_eq!(calculate_worker_limit(Some(0)), 1);
        assert!(calculate_worker_limit(Some(4)) >= 1);
    }
}
