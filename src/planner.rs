//! Plan derivation: inspect the directory tree and the policy, produce an
//! ordered list of actions. Planning never mutates the filesystem — actions
//! are data until the executor consumes them.
//!
//! `plan` runs four sub-stages in a fixed order (stale-log quarantine,
//! CSV conversion + quarantine, same-day report dedup, age-based archival);
//! `plan_purge` derives permanent-deletion candidates from trash/ only.
//! Every emitted path is containment-checked against the root before the
//! plan is returned.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::Serialize;

use crate::config::Policy;
use crate::error::OrganizerError;
use crate::guard;
use crate::scan::{scan_recursive, scan_shallow, FileRecord};

// ── Actions ─────────────────────────────────────────────────

/// A single planned operation. Emitting one never touches the filesystem;
/// each is consumed at most once by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Produce `dst` from `src` via the CSV -> XLSX collaborator
    Convert {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },
    /// Relocate `src` to `dst` (quarantine or archive)
    Move {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },
    /// Permanently delete `src`; terminal, no destination
    Purge { src: PathBuf, reason: String },
}

impl Action {
    pub fn src(&self) -> &Path {
        match self {
            Action::Convert { src, .. } | Action::Move { src, .. } | Action::Purge { src, .. } => {
                src
            }
        }
    }

    pub fn dst(&self) -> Option<&Path> {
        match self {
            Action::Convert { dst, .. } | Action::Move { dst, .. } => Some(dst),
            Action::Purge { .. } => None,
        }
    }

    /// One-line audit form; identical in dry-run and live mode.
    pub fn audit_line(&self) -> String {
        match self {
            Action::Convert { src, dst, reason } => {
                format!("CONVERT {} -> {} ({})", src.display(), dst.display(), reason)
            }
            Action::Move { src, dst, reason } => {
                format!("MOVE {} -> {} ({})", src.display(), dst.display(), reason)
            }
            Action::Purge { src, reason } => format!("PURGE {} ({})", src.display(), reason),
        }
    }
}

// ── Role directories ────────────────────────────────────────

/// The policy's role subdirectories resolved against the root. Each is
/// containment-checked at construction, so a misconfigured relative path
/// fails before anything is scanned.
pub struct RoleDirs {
    pub logs: PathBuf,
    pub raw_csv: PathBuf,
    pub reports: PathBuf,
    pub archive: PathBuf,
    pub trash: PathBuf,
    pub run_logs: PathBuf,
}

impl RoleDirs {
    pub fn resolve(root: &Path, policy: &Policy) -> Result<Self, OrganizerError> {
        let dirs = RoleDirs {
            logs: root.join(&policy.paths.logs_dir),
            raw_csv: root.join(&policy.paths.raw_csv_dir),
            reports: root.join(&policy.paths.reports_dir),
            archive: root.join(&policy.paths.archive_dir),
            trash: root.join(&policy.paths.trash_dir),
            run_logs: root.join(&policy.paths.run_logs_dir),
        };
        for dir in dirs.all() {
            guard::ensure_under_root(root, dir)?;
        }
        Ok(dirs)
    }

    pub fn all(&self) -> [&PathBuf; 6] {
        [
            &self.logs,
            &self.raw_csv,
            &self.reports,
            &self.archive,
            &self.trash,
            &self.run_logs,
        ]
    }
}

// ── Age / bucketing helpers ─────────────────────────────────

/// True when `modified` is at least `days` old relative to `now`.
/// A zero threshold disables the rule.
fn older_than_days(modified: DateTime<Local>, days: u32, now: DateTime<Local>) -> bool {
    if days == 0 {
        return false;
    }
    (now - modified).num_seconds() >= i64::from(days) * 86_400
}

/// Archive bucket (YYYY, MM) derived from the file's own mtime.
fn archive_bucket(modified: DateTime<Local>) -> (String, String) {
    (
        format!("{:04}", modified.year()),
        format!("{:02}", modified.month()),
    )
}

/// An existing artifact at least as new as its source needs no reconversion.
fn artifact_up_to_date(artifact: &Path, source: &FileRecord) -> bool {
    match fs::metadata(artifact).and_then(|m| m.modified()) {
        Ok(artifact_mtime) => artifact_mtime >= source.modified,
        Err(_) => false,
    }
}

/// Group reports by the local calendar date of their mtime and return
/// (loser, kept_name) for every group member except the newest. Equal
/// mtimes keep the file seen first in scan order: the sort is stable, so
/// the first-scanned file stays in front. Grouping is over a BTreeMap so
/// two plans over an unchanged tree emit the same order.
fn older_same_day_reports(files: &[FileRecord]) -> Vec<(&FileRecord, String)> {
    let mut by_day: BTreeMap<NaiveDate, Vec<&FileRecord>> = BTreeMap::new();
    for record in files {
        by_day
            .entry(record.modified_local().date_naive())
            .or_default()
            .push(record);
    }

    let mut losers = Vec::new();
    for group in by_day.values_mut() {
        if group.len() <= 1 {
            continue;
        }
        group.sort_by_key(|r| std::cmp::Reverse(r.modified));
        let kept = group[0].file_name();
        for record in &group[1..] {
            losers.push((*record, kept.clone()));
        }
    }
    losers
}

// ── Planning ────────────────────────────────────────────────

/// Derive the ordered action list for one run. Read-only: directory
/// creation belongs to `init` and the executor. Idempotent on an unchanged
/// tree — planning twice without applying yields identical output.
pub fn plan(root: &Path, policy: &Policy) -> Result<Vec<Action>, OrganizerError> {
    let dirs = RoleDirs::resolve(root, policy)?;
    let now = Local::now();
    let mut actions = Vec::new();

    // 1) Stale .txt logs -> trash/logs after retention
    let txt_days = policy.retention_days.txt_to_trash;
    if txt_days > 0 {
        for record in scan_shallow(&dirs.logs) {
            if record.extension_is("txt") && older_than_days(record.modified_local(), txt_days, now)
            {
                actions.push(Action::Move {
                    src: record.path.clone(),
                    dst: dirs.trash.join("logs").join(record.file_name()),
                    reason: format!("log older than {}d", txt_days),
                });
            }
        }
    }

    // 2) CSV -> XLSX conversion, then quarantine the source
    if policy.conversion.csv_to_xlsx {
        for record in scan_shallow(&dirs.raw_csv) {
            if !record.extension_is("csv") {
                continue;
            }
            let stem = record
                .path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            let artifact = dirs.reports.join(format!("{}.xlsx", stem));
            if artifact_up_to_date(&artifact, &record) {
                continue;
            }
            actions.push(Action::Convert {
                src: record.path.clone(),
                dst: artifact,
                reason: "csv -> xlsx".to_string(),
            });
            // The source is always quarantined after conversion, never deleted
            actions.push(Action::Move {
                src: record.path.clone(),
                dst: dirs.trash.join("raw_csv").join(record.file_name()),
                reason: format!(
                    "post-conversion quarantine (keep {}d in trash)",
                    policy.retention_days.csv_to_trash
                ),
            });
        }
    }

    // Snapshot the reports once; stages 3 and 4 share it
    let xlsx_files: Vec<FileRecord> = scan_shallow(&dirs.reports)
        .filter(|r| r.extension_is("xlsx"))
        .collect();

    // 3) Keep only the newest report per calendar day
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    if policy.reports.keep_latest_per_day {
        for (record, kept) in older_same_day_reports(&xlsx_files) {
            let (yyyy, mm) = archive_bucket(record.modified_local());
            claimed.insert(record.path.clone());
            actions.push(Action::Move {
                src: record.path.clone(),
                dst: dirs.archive.join(yyyy).join(mm).join(record.file_name()),
                reason: format!("same-day older report (kept newest: {})", kept),
            });
        }
    }

    // 4) Archive remaining reports past the age threshold
    let xlsx_days = policy.retention_days.xlsx_to_archive;
    if xlsx_days > 0 {
        for record in &xlsx_files {
            if claimed.contains(&record.path) {
                continue;
            }
            if older_than_days(record.modified_local(), xlsx_days, now) {
                let (yyyy, mm) = archive_bucket(record.modified_local());
                actions.push(Action::Move {
                    src: record.path.clone(),
                    dst: dirs.archive.join(yyyy).join(mm).join(record.file_name()),
                    reason: format!("report older than {}d", xlsx_days),
                });
            }
        }
    }

    // Every planned path must stay inside the root
    for action in &actions {
        guard::ensure_under_root(root, action.src())?;
        if let Some(dst) = action.dst() {
            guard::ensure_under_root(root, dst)?;
        }
    }

    Ok(actions)
}

/// Derive purge candidates from trash/ only. The whole function
/// short-circuits to an empty plan when the threshold is zero.
pub fn plan_purge(root: &Path, policy: &Policy) -> Result<Vec<Action>, OrganizerError> {
    let dirs = RoleDirs::resolve(root, policy)?;
    let purge_days = policy.retention_days.trash_purge;
    if purge_days == 0 {
        return Ok(Vec::new());
    }

    let now = Local::now();
    let mut actions = Vec::new();
    for record in scan_recursive(&dirs.trash) {
        if older_than_days(record.modified_local(), purge_days, now) {
            actions.push(Action::Purge {
                src: record.path.clone(),
                reason: format!("trash older than {}d", purge_days),
            });
        }
    }

    for action in &actions {
        guard::ensure_under_root(root, action.src())?;
    }
    Ok(actions)
}

// ── Tests ───────────────────────────────────────────────────
