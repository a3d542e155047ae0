use std::path::{Component, Path, PathBuf};

use crate::error::OrganizerError;

/// Resolve a path to absolute form without touching the filesystem:
/// relative paths are anchored at the current directory, then `.` and `..`
/// components are folded lexically. This also covers destinations that do
/// not exist yet, which `canonicalize` cannot handle.
pub fn normalize(path: &Path) -> Result<PathBuf, OrganizerError> {
    let abs = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in abs.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Refuse any path that is not `root` itself or a descendant of it.
/// This is the single safety net between a misconfigured relative path in
/// the policy and damage outside the data tree.
pub fn ensure_under_root(root: &Path, path: &Path) -> Result<(), OrganizerError> {
    let root = normalize(root)?;
    let resolved = normalize(path)?;
    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(OrganizerError::Containment {
            root,
            path: resolved,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_pass() {
        let root = Path::new("/data/artifacts");
        assert!(ensure_under_root(root, &root.join("trash/logs/a.txt")).is_ok());
        assert!(ensure_under_root(root, root).is_ok());
    }

    #[test]
    fn test_parent_escape_fails() {
        let root = Path::new("/data/artifacts");
        let escape = root.join("../elsewhere/file.txt");
        assert!(matches!(
            ensure_under_root(root, &escape),
            Err(OrganizerError::Containment { .. })
        ));
    }

    #[test]
    fn test_sibling_prefix_is_not_a_descendant() {
        // /data/artifacts-backup shares a string prefix with /data/artifacts
        // but is outside it; the check must be component-wise.
        let root = Path::new("/data/artifacts");
        assert!(matches!(
            ensure_under_root(root, Path::new("/data/artifacts-backup/x")),
            Err(OrganizerError::Containment { .. })
        ));
    }

    #[test]
    fn test_dotdot_inside_root_resolves() {
        let root = Path::new("/data/artifacts");
        // Hops out of reports/ but lands back inside root
        let path = root.join("reports/../trash/file.csv");
        assert!(ensure_under_root(root, &path).is_ok());
    }

    #[test]
    fn test_nonexistent_paths_are_checkable() {
        let root = Path::new("/data/does-not-exist-anywhere");
        assert!(ensure_under_root(root, &root.join("archive/2025/07/r.xlsx")).is_ok());
    }
}
