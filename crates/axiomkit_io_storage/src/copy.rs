//! Cross-backend tree traversal and copy orchestration.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::conf::{C_REASON_DRY_RUN, C_REASON_FILTERED};
use crate::error::{StorageError, StorageResult};
use crate::node::StorageNode;
use crate::report::{ReportCopy, ReportCopyBuilder};
use crate::skip::evaluate_skip;
use crate::spec::{EnumSkipDecision, SpecCopyOptions};
use crate::util::{SpecCopyPatterns, calculate_worker_limit};
use crate::virtual_node::EnumContentNode;

#[derive(Debug)]
struct SpecCopyTaskFile {
    source: EnumContentNode,
    destination: StorageNode,
    /// Failure found while planning; the task reports it instead of copying.
    err_plan: Option<StorageError>,
}

#[derive(Debug)]
struct SpecCopyContext {
    spec_cp_options: SpecCopyOptions,
    spec_cp_pats: SpecCopyPatterns,
    n_workers_max: usize,
    builder_cp_report: ReportCopyBuilder,
    l_tasks_file_copy: Vec<SpecCopyTaskFile>,
}

#[derive(Debug, Default)]
struct SpecCopyProgress {
    builder_cp_report: ReportCopyBuilder,
    n_done: u64,
}

/// State shared by copy workers. Report counters and callbacks are serialised
/// through `state`.
struct SpecCopyShared<'a> {
    spec_cp_options: &'a SpecCopyOptions,
    n_total: u64,
    state: Mutex<SpecCopyProgress>,
    set_dirs_created: Mutex<HashSet<String>>,
    if_stop: AtomicBool,
    err_first: Mutex<Option<(String, StorageError)>>,
}

/// Copy `source` (file, directory tree or virtual node) to `destination`.
///
/// Behavior is controlled by [`SpecCopyOptions`], including:
/// - include/exclude patterns for files and directory pruning,
/// - a filter callback and a skip strategy,
/// - per-file callbacks and progress reporting,
/// - fail-fast, dry-run, cancellation and worker count.
///
/// A directory source copies its contents into `destination`. A single file
/// copied onto an existing directory lands at `destination/<basename>`.
///
/// This function performs:
/// 1. Pattern validation (before any I/O).
/// 2. Tree traversal and file-copy task planning.
/// 3. Task execution (serial or rayon thread pool).
/// 4. Report aggregation.
///
/// Returns [`ReportCopy`] when the run completes, with per-file failures stored in
/// the report. With `if_fail_fast` the first per-file failure is returned as
/// [`StorageError::Copy`]; files already copied stay in place.
pub fn copy(
    source: &EnumContentNode,
    destination: &StorageNode,
    spec_cp_options: SpecCopyOptions,
) -> StorageResult<ReportCopy> {
    let spec_cp_pats = SpecCopyPatterns::from_raw(
        spec_cp_options.patterns_include.as_deref(),
        spec_cp_options.patterns_exclude.as_deref(),
        spec_cp_options.patterns_exclude_dirs.as_deref(),
        spec_cp_options.rule_pattern,
    )?;
    let n_workers_max = calculate_worker_limit(spec_cp_options.num_workers_max);

    let mut spec_cp_ctx = SpecCopyContext {
        spec_cp_options,
        spec_cp_pats,
        n_workers_max,
        builder_cp_report: ReportCopyBuilder::default(),
        l_tasks_file_copy: Vec::new(),
    };

    match source {
        EnumContentNode::Storage(node_src) => {
            let stat_src = node_src.stat()?.ok_or_else(|| {
                StorageError::not_found(node_src.full_path(), "copy source does not exist")
            })?;
            if stat_src.is_dir {
                walk_directory(node_src, "", destination, &mut spec_cp_ctx);
            } else {
                plan_single(source, destination, &mut spec_cp_ctx)?;
            }
        }
        _ => plan_single(source, destination, &mut spec_cp_ctx)?,
    }

    debug!(
        source = %source.full_path(),
        destination = %destination.full_path(),
        n_tasks = spec_cp_ctx.l_tasks_file_copy.len(),
        n_workers = spec_cp_ctx.n_workers_max,
        "copy planned"
    );
    flush_file_copy_tasks(&mut spec_cp_ctx)?;

    let report = spec_cp_ctx.builder_cp_report.build();
    if report.if_cancelled {
        warn!(source = %source.full_path(), "{}", report.format("[COPY]"));
    } else {
        info!(source = %source.full_path(), "{}", report.format("[COPY]"));
    }
    Ok(report)
}

fn plan_single(
    source: &EnumContentNode,
    destination: &StorageNode,
    spec_cp_ctx: &mut SpecCopyContext,
) -> StorageResult<()> {
    let c_name = source.basename();
    let node_dst = if destination.is_dir() {
        destination.child(&[c_name.as_str()])?
    } else {
        destination.clone()
    };
    spec_cp_ctx.builder_cp_report.add_scanned();
    if let EnumContentNode::Storage(node_src) = source
        && !is_file_accepted(node_src, &c_name, &c_name, spec_cp_ctx)
    {
        return Ok(());
    }
    spec_cp_ctx.builder_cp_report.add_matched();
    spec_cp_ctx.l_tasks_file_copy.push(SpecCopyTaskFile {
        source: source.clone(),
        destination: node_dst,
        err_plan: None,
    });
    Ok(())
}

fn report_filtered(node_src: &StorageNode, spec_cp_ctx: &mut SpecCopyContext) {
    debug!(source = %node_src.full_path(), "filtered out");
    spec_cp_ctx
        .builder_cp_report
        .add_filtered(node_src.full_path(), C_REASON_FILTERED.to_string());
    if let Some(on_skip) = &spec_cp_ctx.spec_cp_options.on_skip {
        on_skip(&EnumContentNode::from(node_src.clone()), C_REASON_FILTERED);
    }
}

/// Patterns first, then the filter callback. Rejections are reported as filtered.
fn is_file_accepted(
    node_src: &StorageNode,
    c_name: &str,
    path_rel: &str,
    spec_cp_ctx: &mut SpecCopyContext,
) -> bool {
    if spec_cp_ctx.spec_cp_pats.should_exclude_file(c_name, path_rel) {
        report_filtered(node_src, spec_cp_ctx);
        return false;
    }
    let Some(filter) = spec_cp_ctx.spec_cp_options.filter.clone() else {
        return true;
    };
    match filter(node_src, path_rel) {
        Ok(true) => true,
        Ok(false) => {
            report_filtered(node_src, spec_cp_ctx);
            false
        }
        Err(e) => {
            warn!(source = %node_src.full_path(), error = %e, "filter failed; file excluded");
            spec_cp_ctx.builder_cp_report.add_warning(format!(
                "Filter failed for {} ({e:#})",
                node_src.full_path()
            ));
            report_filtered(node_src, spec_cp_ctx);
            false
        }
    }
}

fn walk_directory(
    node_dir: &StorageNode,
    path_rel_dir: &str,
    node_dst_dir: &StorageNode,
    spec_cp_ctx: &mut SpecCopyContext,
) {
    let l_children = match node_dir.children() {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %node_dir.full_path(), error = %e, "directory listing failed");
            spec_cp_ctx.builder_cp_report.add_warning(format!(
                "Failed to read directory {} ({e})",
                node_dir.full_path()
            ));
            return;
        }
    };

    if l_children.is_empty() {
        create_empty_directory(node_dst_dir, spec_cp_ctx);
        return;
    }

    // Entries whose stat fails are planned as files carrying the error.
    let mut l_dirs: Vec<StorageNode> = Vec::new();
    let mut l_files: Vec<(StorageNode, Option<StorageError>)> = Vec::new();
    for node_child in l_children {
        match node_child.stat() {
            Ok(Some(stat)) if stat.is_dir => l_dirs.push(node_child),
            Ok(Some(_)) => l_files.push((node_child, None)),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %node_child.full_path(), error = %e, "stat failed");
                l_files.push((node_child, Some(e)));
            }
        }
    }

    let join_rel = |c_name: &str| {
        if path_rel_dir.is_empty() {
            c_name.to_string()
        } else {
            format!("{path_rel_dir}/{c_name}")
        }
    };

    for node_sub in l_dirs {
        let c_name = node_sub.basename().to_string();
        let path_rel = join_rel(&c_name);
        if spec_cp_ctx
            .spec_cp_pats
            .should_exclude_dir(&c_name, &path_rel)
        {
            debug!(path = %node_sub.full_path(), "directory pruned");
            continue;
        }
        match node_dst_dir.child(&[c_name.as_str()]) {
            Ok(node_dst_sub) => walk_directory(&node_sub, &path_rel, &node_dst_sub, spec_cp_ctx),
            Err(e) => spec_cp_ctx
                .builder_cp_report
                .add_warning(format!("Invalid destination for {} ({e})", node_sub.full_path())),
        }
    }

    for (node_file, err_stat) in l_files {
        handle_file_entry(node_file, err_stat, &join_rel, node_dst_dir, spec_cp_ctx);
    }
}

/// Recreate an empty source directory at the destination.
fn create_empty_directory(node_dst_dir: &StorageNode, spec_cp_ctx: &mut SpecCopyContext) {
    if spec_cp_ctx.spec_cp_options.if_dry_run || !node_dst_dir.capabilities().mkdir {
        return;
    }
    match node_dst_dir.mkdir(true, true) {
        Ok(()) => debug!(path = %node_dst_dir.full_path(), "empty directory created"),
        Err(e) => {
            warn!(path = %node_dst_dir.full_path(), error = %e, "directory creation failed");
            spec_cp_ctx.builder_cp_report.add_warning(format!(
                "Failed to create directory {} ({e})",
                node_dst_dir.full_path()
            ));
        }
    }
}

fn handle_file_entry(
    node_file: StorageNode,
    err_stat: Option<StorageError>,
    join_rel: &dyn Fn(&str) -> String,
    node_dst_dir: &StorageNode,
    spec_cp_ctx: &mut SpecCopyContext,
) {
    spec_cp_ctx.builder_cp_report.add_scanned();

    let c_name = node_file.basename().to_string();
    let path_rel = join_rel(&c_name);
    if !is_file_accepted(&node_file, &c_name, &path_rel, spec_cp_ctx) {
        return;
    }
    spec_cp_ctx.builder_cp_report.add_matched();

    let (destination, err_plan) = match node_dst_dir.child(&[c_name.as_str()]) {
        Ok(node_dst) => (node_dst, err_stat),
        Err(e) => (node_dst_dir.clone(), Some(e)),
    };
    spec_cp_ctx.l_tasks_file_copy.push(SpecCopyTaskFile {
        source: EnumContentNode::from(node_file),
        destination,
        err_plan,
    });
}

fn flush_file_copy_tasks(spec_cp_ctx: &mut SpecCopyContext) -> StorageResult<()> {
    let l_tasks_file_copy = std::mem::take(&mut spec_cp_ctx.l_tasks_file_copy);
    if l_tasks_file_copy.is_empty() {
        return Ok(());
    }

    let spec_shared = SpecCopyShared {
        spec_cp_options: &spec_cp_ctx.spec_cp_options,
        n_total: l_tasks_file_copy.len() as u64,
        state: Mutex::new(SpecCopyProgress {
            builder_cp_report: std::mem::take(&mut spec_cp_ctx.builder_cp_report),
            n_done: 0,
        }),
        set_dirs_created: Mutex::new(HashSet::new()),
        if_stop: AtomicBool::new(false),
        err_first: Mutex::new(None),
    };

    if spec_cp_ctx.n_workers_max <= 1 {
        l_tasks_file_copy
            .into_iter()
            .for_each(|spec_task| run_copy_task(spec_task, &spec_shared));
    } else {
        match ThreadPoolBuilder::new()
            .num_threads(spec_cp_ctx.n_workers_max)
            .build()
        {
            Ok(thread_pool) => thread_pool.install(|| {
                l_tasks_file_copy
                    .into_par_iter()
                    .for_each(|spec_task| run_copy_task(spec_task, &spec_shared));
            }),
            Err(_) => {
                spec_shared.state.lock().builder_cp_report.add_warning(format!(
                    "Failed to initialize thread pool (workers={}); fallback to serial copy.",
                    spec_cp_ctx.n_workers_max
                ));
                l_tasks_file_copy
                    .into_iter()
                    .for_each(|spec_task| run_copy_task(spec_task, &spec_shared));
            }
        }
    }

    let SpecCopyShared {
        state, err_first, ..
    } = spec_shared;
    spec_cp_ctx.builder_cp_report = state.into_inner().builder_cp_report;
    if let Some((path, e)) = err_first.into_inner() {
        return Err(StorageError::copy(path, e));
    }
    Ok(())
}

fn is_cancelled(spec_shared: &SpecCopyShared<'_>) -> bool {
    spec_shared
        .spec_cp_options
        .cancel
        .as_ref()
        .is_some_and(|flag| flag.load(Ordering::SeqCst))
}

fn run_copy_task(spec_task: SpecCopyTaskFile, spec_shared: &SpecCopyShared<'_>) {
    if spec_shared.if_stop.load(Ordering::SeqCst) {
        return;
    }
    if is_cancelled(spec_shared) {
        spec_shared.if_stop.store(true, Ordering::SeqCst);
        spec_shared.state.lock().builder_cp_report.mark_cancelled();
        return;
    }

    let spec_cp_options = spec_shared.spec_cp_options;
    let SpecCopyTaskFile {
        source,
        destination,
        err_plan,
    } = spec_task;

    let res_decision = match err_plan {
        Some(e) => Err(e),
        None if spec_cp_options.if_dry_run => {
            Ok(EnumSkipDecision::Skip(C_REASON_DRY_RUN.to_string()))
        }
        None => evaluate_skip(&spec_cp_options.rule_skip, &source, &destination),
    };
    let res_copy = match res_decision {
        Ok(EnumSkipDecision::Skip(reason)) => Ok(Err(reason)),
        Ok(EnumSkipDecision::Proceed) => copy_one(&source, &destination, spec_shared).map(Ok),
        Err(e) => Err(e),
    };

    let mut state = spec_shared.state.lock();
    match res_copy {
        Ok(Ok(node_written)) => {
            debug!(
                source = %source.full_path(),
                destination = %node_written.full_path(),
                "copied"
            );
            state
                .builder_cp_report
                .add_copied(source.full_path(), node_written.full_path());
            if let Some(on_file) = &spec_cp_options.on_file {
                on_file(&source, &node_written);
            }
        }
        Ok(Err(reason)) => {
            debug!(source = %source.full_path(), reason = %reason, "skipped");
            if let Some(on_skip) = &spec_cp_options.on_skip {
                on_skip(&source, &reason);
            }
            state.builder_cp_report.add_skipped(source.full_path(), reason);
        }
        Err(e) => {
            debug!(source = %source.full_path(), error = %e, "copy failed");
            if let Some(on_error) = &spec_cp_options.on_error {
                on_error(&source, &e);
            }
            state
                .builder_cp_report
                .add_failed(source.full_path(), e.to_string());
            if spec_cp_options.if_fail_fast {
                spec_shared.if_stop.store(true, Ordering::SeqCst);
                let mut err_first = spec_shared.err_first.lock();
                if err_first.is_none() {
                    *err_first = Some((source.full_path(), e));
                }
            }
        }
    }
    state.n_done += 1;
    if let Some(progress) = &spec_cp_options.progress {
        progress(state.n_done, spec_shared.n_total);
    }
}

fn copy_one(
    source: &EnumContentNode,
    destination: &StorageNode,
    spec_shared: &SpecCopyShared<'_>,
) -> StorageResult<StorageNode> {
    let node_parent = destination.parent();
    if destination.capabilities().mkdir && !node_parent.segments().is_empty() {
        let mut set_dirs_created = spec_shared.set_dirs_created.lock();
        let path_parent = node_parent.path();
        if !set_dirs_created.contains(&path_parent) {
            if !node_parent.is_dir() {
                node_parent.mkdir(true, true)?;
            }
            set_dirs_created.insert(path_parent);
        }
    }
    let mut reader = source.open_read()?;
    destination.write_from_reader(&mut reader)
}
