//! Copy report model and its mutable builder.

use std::collections::BTreeMap;
use std::fmt;

use crate::spec::{EnumCopyEvent, SpecCopyError};

/// Outcome of one `copy` run: counters, per-file failures and the event log.
///
/// `cnt_copied + cnt_skipped + cnt_failed == cnt_matched` holds for every
/// completed run; a cancelled run leaves unprocessed matches uncounted.
#[derive(Debug, Default, Clone)]
pub struct ReportCopy {
    /// Files that passed include/exclude patterns and the filter.
    pub cnt_matched: u64,
    /// Files enumerated under the source.
    pub cnt_scanned: u64,
    /// Files written to the destination.
    pub cnt_copied: u64,
    /// Files left untouched by the skip strategy or dry-run.
    pub cnt_skipped: u64,
    /// Files whose copy failed.
    pub cnt_failed: u64,
    /// Run stopped early through the cancellation flag.
    pub if_cancelled: bool,
    /// Non-fatal warnings (unreadable directories, filter errors, pool fallback).
    pub warnings: Vec<String>,
    /// Per-file failures.
    pub errors: Vec<SpecCopyError>,
    /// Copied/skipped/failed events in callback order.
    pub l_events: Vec<EnumCopyEvent>,
}

impl ReportCopy {
    /// Number of per-file failures.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Number of warnings.
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Every matched file was copied, skipped or failed.
    pub fn is_balanced(&self) -> bool {
        self.cnt_copied + self.cnt_skipped + self.cnt_failed == self.cnt_matched
    }

    /// Counters keyed by name (`matched`, `scanned`, `copied`, `skipped`,
    /// `failed`, `warnings`).
    pub fn to_dict(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("matched", self.cnt_matched),
            ("scanned", self.cnt_scanned),
            ("copied", self.cnt_copied),
            ("skipped", self.cnt_skipped),
            ("failed", self.cnt_failed),
            ("warnings", self.warning_count() as u64),
        ])
    }

    /// One-line summary such as `[COPY] matched=3 ... warnings=0`.
    pub fn format(&self, prefix: &str) -> String {
        let mut txt = format!(
            "{prefix} matched={} scanned={} copied={} skipped={} failed={} warnings={}",
            self.cnt_matched,
            self.cnt_scanned,
            self.cnt_copied,
            self.cnt_skipped,
            self.cnt_failed,
            self.warning_count()
        );
        if self.if_cancelled {
            txt.push_str(" cancelled");
        }
        txt
    }
}

impl fmt::Display for ReportCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Accumulates a [`ReportCopy`] while the copy engine runs.
#[derive(Debug, Default, Clone)]
pub struct ReportCopyBuilder {
    report: ReportCopy,
}

impl ReportCopyBuilder {
    /// One more enumerated file.
    pub fn add_scanned(&mut self) {
        self.report.cnt_scanned += 1;
    }

    /// One more file accepted by patterns and filter.
    pub fn add_matched(&mut self) {
        self.report.cnt_matched += 1;
    }

    /// Record one copied file.
    pub fn add_copied(&mut self, source: String, destination: String) {
        self.report.cnt_copied += 1;
        self.report.l_events.push(EnumCopyEvent::Copied {
            source,
            destination,
        });
    }

    /// Record one skipped file.
    pub fn add_skipped(&mut self, source: String, reason: String) {
        self.report.cnt_skipped += 1;
        self.report
            .l_events
            .push(EnumCopyEvent::Skipped { source, reason });
    }

    /// Log a file rejected by patterns or filter; not counted.
    pub fn add_filtered(&mut self, source: String, reason: String) {
        self.report
            .l_events
            .push(EnumCopyEvent::Skipped { source, reason });
    }

    /// Record one failed file.
    pub fn add_failed(&mut self, path: String, exception: String) {
        self.report.cnt_failed += 1;
        self.report.l_events.push(EnumCopyEvent::Failed {
            source: path.clone(),
            exception: exception.clone(),
        });
        self.report.errors.push(SpecCopyError { path, exception });
    }

    /// Add warning message.
    pub fn add_warning(&mut self, warning: String) {
        self.report.warnings.push(warning);
    }

    /// Mark the run as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.report.if_cancelled = true;
    }

    /// Finished report.
    pub fn build(self) -> ReportCopy {
        self.report
    }
}
