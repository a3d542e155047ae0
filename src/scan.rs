use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

/// Read-only snapshot of one regular file, taken at scan time.
/// Stale as soon as any action executes against the tree.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// The scanned directory joined with the entry name
    pub path: PathBuf,
    /// Path relative to the scanned directory
    pub rel: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl FileRecord {
    pub fn modified_local(&self) -> DateTime<Local> {
        DateTime::<Local>::from(self.modified)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// Exact extension match. Deliberately case-sensitive: two sources
    /// differing only in extension case must not map onto one artifact.
    pub fn extension_is(&self, ext: &str) -> bool {
        self.path.extension().is_some_and(|e| e == ext)
    }
}

/// Lazily yield `FileRecord`s for regular files directly inside `dir`.
/// Directories and unreadable entries are skipped; a missing `dir` yields
/// an empty sequence. Re-invoking the scan restarts it from scratch.
pub fn scan_shallow(dir: &Path) -> Scan {
    Scan::new(dir, false)
}

/// Like `scan_shallow`, but recurses into subdirectories depth-first.
/// Order is unspecified but stable within a single call.
pub fn scan_recursive(dir: &Path) -> Scan {
    Scan::new(dir, true)
}

/// Depth-first directory walk. Modification time and size come from
/// `DirEntry::metadata()` in the same pass as the listing, so there is no
/// extra stat round-trip per entry.
pub struct Scan {
    base: PathBuf,
    recursive: bool,
    stack: Vec<ReadDir>,
}

impl Scan {
    fn new(dir: &Path, recursive: bool) -> Self {
        let mut stack = Vec::new();
        match fs::read_dir(dir) {
            Ok(entries) => stack.push(entries),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to read directory {}: {}", dir.display(), e),
        }
        Scan {
            base: dir.to_path_buf(),
            recursive,
            stack,
        }
    }
}

impl Iterator for Scan {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            let entries = self.stack.last_mut()?;
            let entry = match entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(_)) => continue,
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let path = entry.path();

            if metadata.is_file() {
                let rel = path
                    .strip_prefix(&self.base)
                    .unwrap_or(&path)
                    .to_path_buf();
                return Some(FileRecord {
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size: metadata.len(),
                    path,
                    rel,
                });
            }

            if self.recursive && metadata.is_dir() {
                match fs::read_dir(&path) {
                    Ok(sub) => self.stack.push(sub),
                    Err(e) => log::warn!("Failed to read directory {}: {}", path.display(), e),
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────
