//! Applies a plan. The executor is the only place filesystem mutation
//! happens; in preview mode it produces the exact same audit lines while
//! touching nothing, so a dry run is a truthful rehearsal of a live one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::Policy;
use crate::convert;
use crate::error::OrganizerError;
use crate::planner::{Action, RoleDirs};

/// Outcome of one executor run. `audit` holds one line per attempted
/// action, live or dry; `failure` is the error that aborted the run, if
/// any, with everything completed before it still counted and logged.
#[derive(Debug)]
pub struct RunReport {
    pub completed: usize,
    pub audit: Vec<String>,
    pub failure: Option<OrganizerError>,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            completed: 0,
            audit: Vec::new(),
            failure: None,
        }
    }
}

/// Microsecond-precision local stamp; avoids filename collisions on fast
/// reruns.
pub fn now_stamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S-%6f").to_string()
}

/// Apply (or preview) a plan of convert and move actions, in order.
///
/// Fails fast with `SafetyCapExceeded` before touching anything when the
/// plan is larger than `max_actions_per_run`. Purge actions are refused
/// here outright; they flow only through `apply_purge`, behind the
/// operator confirmation.
pub fn apply(
    actions: &[Action],
    policy: &Policy,
    apply: bool,
) -> Result<RunReport, OrganizerError> {
    let max = policy.max_actions_per_run;
    if max > 0 && actions.len() > max {
        return Err(OrganizerError::SafetyCapExceeded {
            planned: actions.len(),
            max,
        });
    }
    if let Some(purge) = actions.iter().find(|a| matches!(a, Action::Purge { .. })) {
        return Err(OrganizerError::InvalidAction(format!(
            "purge must go through apply_purge: {}",
            purge.audit_line()
        )));
    }

    let mut report = RunReport::new();
    for action in actions {
        report.audit.push(action.audit_line());
        let result = if apply {
            match action {
                Action::Convert { src, dst, .. } => {
                    convert::csv_to_xlsx(src, dst, &policy.conversion)
                }
                Action::Move { src, dst, .. } => safe_move(src, dst),
                Action::Purge { .. } => unreachable!("purge actions rejected above"),
            }
        } else {
            Ok(())
        };
        match result {
            Ok(()) => report.completed += 1,
            Err(e) => {
                log::error!("Action failed, aborting run: {}", e);
                report.failure = Some(e);
                break;
            }
        }
    }

    log::info!(
        "{} of {} actions {}",
        report.completed,
        actions.len(),
        if apply { "executed" } else { "planned" }
    );
    Ok(report)
}

/// Apply (or preview) a purge plan: unlink each file, then best-effort
/// remove the directories under trash/ that the unlinks emptied.
pub fn apply_purge(
    actions: &[Action],
    root: &Path,
    policy: &Policy,
    apply: bool,
) -> Result<RunReport, OrganizerError> {
    if let Some(other) = actions.iter().find(|a| !matches!(a, Action::Purge { .. })) {
        return Err(OrganizerError::InvalidAction(format!(
            "apply_purge accepts only purge actions: {}",
            other.audit_line()
        )));
    }

    let mut report = RunReport::new();
    for action in actions {
        report.audit.push(action.audit_line());
        if apply {
            match fs::remove_file(action.src()) {
                Ok(()) => {}
                // Removed out-of-band counts as done; purge stays re-runnable
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::error!("Purge failed, aborting run: {}", e);
                    report.failure = Some(e.into());
                    break;
                }
            }
        }
        report.completed += 1;
    }

    if apply && report.failure.is_none() {
        let dirs = RoleDirs::resolve(root, policy)?;
        remove_empty_dirs(&dirs.trash);
    }

    log::info!(
        "{} of {} purge actions {}",
        report.completed,
        actions.len(),
        if apply { "executed" } else { "planned" }
    );
    Ok(report)
}

/// Move with a no-overwrite guarantee: destination parents are created on
/// demand, and an occupied destination is resolved to a suffixed sibling
/// before the rename.
fn safe_move(src: &Path, dst: &Path) -> Result<(), OrganizerError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let dst = resolve_collision(dst);
    match fs::rename(src, &dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // Cross-device moves fall back to copy + remove
            match fs::copy(src, &dst) {
                Ok(_) => {
                    fs::remove_file(src)?;
                    Ok(())
                }
                Err(copy_err) => {
                    log::error!(
                        "Move failed for {}: rename: {}, copy: {}",
                        src.display(),
                        rename_err,
                        copy_err
                    );
                    Err(copy_err.into())
                }
            }
        }
    }
}

/// The explicit check-then-suffix decision: an existing destination is
/// never overwritten; the incoming file gains a fine-grained local
/// timestamp between stem and extension instead.
pub fn resolve_collision(dst: &Path) -> PathBuf {
    if !dst.exists() {
        return dst.to_path_buf();
    }
    let stem = dst.file_stem().unwrap_or_default().to_string_lossy();
    let ext = dst
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    dst.with_file_name(format!("{}.{}{}", stem, now_stamp(), ext))
}

/// Bottom-up sweep deleting now-empty directories under `dir`. A failed
/// `remove_dir` means the directory still has content, which is tolerated.
fn remove_empty_dirs(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs(&path);
            let _ = fs::remove_dir(&path);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner;

    fn make_root(dir: &tempfile::TempDir, policy: &Policy) -> PathBuf {
        let root = dir.path().join("data");
        for sub in RoleDirs::resolve(&root, policy).unwrap().all() {
            fs::create_dir_all(sub).unwrap();
        }
        root
    }

    #[test]
    fn test_dry_run_audits_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let src = root.join("logs/old.txt");
        fs::write(&src, "x").unwrap();
        let actions = vec![Action::Move {
            src: src.clone(),
            dst: root.join("trash/logs/old.txt"),
            reason: "log older than 14d".to_string(),
        }];

        let report = apply(&actions, &policy, false).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.audit.len(), 1);
        assert!(report.audit[0].starts_with("MOVE "));
        assert!(report.failure.is_none());
        // Preview is truthful: nothing moved
        assert!(src.exists());
        assert!(!root.join("trash/logs/old.txt").exists());
    }

    #[test]
    fn test_live_and_dry_audit_lines_match() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let src = root.join("logs/old.txt");
        fs::write(&src, "x").unwrap();
        let actions = vec![Action::Move {
            src: src.clone(),
            dst: root.join("trash/logs/old.txt"),
            reason: "log older than 14d".to_string(),
        }];

        let dry = apply(&actions, &policy, false).unwrap();
        let live = apply(&actions, &policy, true).unwrap();
        assert_eq!(dry.audit, live.audit);
        assert!(!src.exists());
        assert!(root.join("trash/logs/old.txt").exists());
    }

    #[test]
    fn test_safety_cap_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.max_actions_per_run = 1;
        let root = make_root(&dir, &policy);

        let a = root.join("logs/a.txt");
        let b = root.join("logs/b.txt");
        fs::write(&a, "x").unwrap();
        fs::write(&b, "x").unwrap();
        let actions = vec![
            Action::Move {
                src: a.clone(),
                dst: root.join("trash/logs/a.txt"),
                reason: "r".to_string(),
            },
            Action::Move {
                src: b.clone(),
                dst: root.join("trash/logs/b.txt"),
                reason: "r".to_string(),
            },
        ];

        let err = apply(&actions, &policy, true).unwrap_err();
        assert!(matches!(
            err,
            OrganizerError::SafetyCapExceeded { planned: 2, max: 1 }
        ));
        // No partial execution
        assert!(a.exists());
        assert!(b.exists());
    }

    #[test]
    fn test_cap_of_zero_is_uncapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = Policy::default();
        policy.max_actions_per_run = 0;
        let root = make_root(&dir, &policy);

        let src = root.join("logs/a.txt");
        fs::write(&src, "x").unwrap();
        let actions = vec![Action::Move {
            src,
            dst: root.join("trash/logs/a.txt"),
            reason: "r".to_string(),
        }];
        assert!(apply(&actions, &policy, true).is_ok());
    }

    #[test]
    fn test_move_collision_suffixes_instead_of_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let src = root.join("logs/dup.txt");
        fs::write(&src, "incoming").unwrap();
        let dst = root.join("trash/logs/dup.txt");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "already here").unwrap();

        let actions = vec![Action::Move {
            src: src.clone(),
            dst: dst.clone(),
            reason: "r".to_string(),
        }];
        let report = apply(&actions, &policy, true).unwrap();
        assert_eq!(report.completed, 1);

        // Existing destination untouched, incoming renamed alongside it
        assert_eq!(fs::read_to_string(&dst).unwrap(), "already here");
        assert!(!src.exists());
        let siblings = fs::read_dir(dst.parent().unwrap()).unwrap().count();
        assert_eq!(siblings, 2);
    }

    #[test]
    fn test_resolve_collision_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("report.xlsx");
        fs::write(&dst, "x").unwrap();

        let resolved = resolve_collision(&dst);
        assert_ne!(resolved, dst);
        assert_eq!(resolved.extension(), Some(std::ffi::OsStr::new("xlsx")));
        assert!(resolved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("report."));
    }

    #[test]
    fn test_resolve_collision_untouched_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("fresh.xlsx");
        assert_eq!(resolve_collision(&dst), dst);
    }

    #[test]
    fn test_failure_preserves_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let good = root.join("logs/good.txt");
        fs::write(&good, "x").unwrap();
        let actions = vec![
            Action::Move {
                src: good.clone(),
                dst: root.join("trash/logs/good.txt"),
                reason: "r".to_string(),
            },
            // Source does not exist: this one fails
            Action::Move {
                src: root.join("logs/ghost.txt"),
                dst: root.join("trash/logs/ghost.txt"),
                reason: "r".to_string(),
            },
        ];

        let report = apply(&actions, &policy, true).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.audit.len(), 2);
        assert!(report.failure.is_some());
        assert!(root.join("trash/logs/good.txt").exists());
    }

    #[test]
    fn test_apply_rejects_purge_actions() {
        let policy = Policy::default();
        let actions = vec![Action::Purge {
            src: PathBuf::from("/data/trash/x"),
            reason: "r".to_string(),
        }];
        assert!(matches!(
            apply(&actions, &policy, false),
            Err(OrganizerError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_purge_tolerates_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let actions = vec![Action::Purge {
            src: root.join("trash/vanished.txt"),
            reason: "trash older than 30d".to_string(),
        }];
        let report = apply_purge(&actions, &root, &policy, true).unwrap();
        assert_eq!(report.completed, 1);
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_purge_removes_emptied_directories() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        fs::create_dir_all(root.join("trash/raw_csv")).unwrap();
        fs::create_dir_all(root.join("trash/logs")).unwrap();
        let victim = root.join("trash/raw_csv/old.csv");
        fs::write(&victim, "x").unwrap();
        let survivor = root.join("trash/logs/keep.txt");
        fs::write(&survivor, "x").unwrap();

        let actions = vec![Action::Purge {
            src: victim.clone(),
            reason: "r".to_string(),
        }];
        apply_purge(&actions, &root, &policy, true).unwrap();

        assert!(!victim.exists());
        assert!(!root.join("trash/raw_csv").exists());
        // Non-empty directories and the trash root itself stay
        assert!(survivor.exists());
        assert!(root.join("trash").exists());
    }

    #[test]
    fn test_purge_dry_run_unlinks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let victim = root.join("trash/old.csv");
        fs::write(&victim, "x").unwrap();
        let actions = vec![Action::Purge {
            src: victim.clone(),
            reason: "r".to_string(),
        }];

        let report = apply_purge(&actions, &root, &policy, false).unwrap();
        assert_eq!(report.completed, 1);
        assert!(report.audit[0].starts_with("PURGE "));
        assert!(victim.exists());
    }

    #[test]
    fn test_apply_purge_rejects_non_purge() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        let actions = vec![Action::Move {
            src: root.join("logs/a.txt"),
            dst: root.join("trash/logs/a.txt"),
            reason: "r".to_string(),
        }];
        assert!(matches!(
            apply_purge(&actions, &root, &policy, true),
            Err(OrganizerError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_end_to_end_conversion_run() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::default();
        let root = make_root(&dir, &policy);

        fs::write(root.join("raw_csv/data.csv"), "date,price\n2026-08-01,42\n").unwrap();
        let actions = planner::plan(&root, &policy).unwrap();
        assert_eq!(actions.len(), 2);

        let report = apply(&actions, &policy, true).unwrap();
        assert_eq!(report.completed, 2);
        assert!(report.failure.is_none());

        assert!(root.join("reports/data.xlsx").exists());
        assert!(root.join("trash/raw_csv/data.csv").exists());
        assert_eq!(fs::read_dir(root.join("raw_csv")).unwrap().count(), 0);

        // The artifact is now newer than any surviving source; replanning
        // the unchanged tree finds nothing left to do.
        assert!(planner::plan(&root, &policy).unwrap().is_empty());
    }
}
