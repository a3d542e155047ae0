use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OrganizerError;

// ── Data types ──────────────────────────────────────────────

/// Fully merged, validated policy for one run. Immutable once loaded:
/// `plan`, `plan_purge` and the executor all borrow the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub paths: RolePaths,
    #[serde(default)]
    pub retention_days: RetentionDays,
    #[serde(default)]
    pub conversion: ConversionPolicy,
    #[serde(default)]
    pub reports: ReportsPolicy,
    /// Hard stop safety valve to avoid unexpected mass actions (0 = uncapped)
    #[serde(default = "default_max_actions_per_run")]
    pub max_actions_per_run: usize,
}

/// Role name -> subdirectory, each relative to the data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePaths {
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_raw_csv_dir")]
    pub raw_csv_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_trash_dir")]
    pub trash_dir: PathBuf,
    #[serde(default = "default_run_logs_dir")]
    pub run_logs_dir: PathBuf,
}

/// Age thresholds in days. A zero disables the corresponding rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionDays {
    /// Move .txt logs older than this into trash/
    #[serde(default = "default_txt_to_trash")]
    pub txt_to_trash: u32,
    /// How long a converted CSV stays quarantined in trash/
    #[serde(default = "default_csv_to_trash")]
    pub csv_to_trash: u32,
    /// Move reports older than this into archive/
    #[serde(default = "default_xlsx_to_archive")]
    pub xlsx_to_archive: u32,
    /// Permanently delete items inside trash/ older than this (requires confirm)
    #[serde(default = "default_trash_purge")]
    pub trash_purge: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionPolicy {
    #[serde(default = "default_csv_to_xlsx")]
    pub csv_to_xlsx: bool,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsPolicy {
    /// Keep only the newest XLSX per day inside reports/. Older same-day
    /// XLSX move to archive/. The "day" is derived from the file's local
    /// mtime (no filename convention required).
    #[serde(default = "default_keep_latest_per_day")]
    pub keep_latest_per_day: bool,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_raw_csv_dir() -> PathBuf {
    PathBuf::from("raw_csv")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_trash_dir() -> PathBuf {
    PathBuf::from("trash")
}

fn default_run_logs_dir() -> PathBuf {
    PathBuf::from("automation_logs")
}

fn default_txt_to_trash() -> u32 {
    14
}

fn default_csv_to_trash() -> u32 {
    14
}

fn default_xlsx_to_archive() -> u32 {
    90
}

fn default_trash_purge() -> u32 {
    30
}

fn default_csv_to_xlsx() -> bool {
    true
}

fn default_sheet_name() -> String {
    "data".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_keep_latest_per_day() -> bool {
    true
}

fn default_max_actions_per_run() -> usize {
    500
}

impl Default for RolePaths {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            raw_csv_dir: default_raw_csv_dir(),
            reports_dir: default_reports_dir(),
            archive_dir: default_archive_dir(),
            trash_dir: default_trash_dir(),
            run_logs_dir: default_run_logs_dir(),
        }
    }
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self {
            txt_to_trash: default_txt_to_trash(),
            csv_to_trash: default_csv_to_trash(),
            xlsx_to_archive: default_xlsx_to_archive(),
            trash_purge: default_trash_purge(),
        }
    }
}

impl Default for ConversionPolicy {
    fn default() -> Self {
        Self {
            csv_to_xlsx: default_csv_to_xlsx(),
            sheet_name: default_sheet_name(),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
        }
    }
}

impl Default for ReportsPolicy {
    fn default() -> Self {
        Self {
            keep_latest_per_day: default_keep_latest_per_day(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            paths: RolePaths::default(),
            retention_days: RetentionDays::default(),
            conversion: ConversionPolicy::default(),
            reports: ReportsPolicy::default(),
            max_actions_per_run: default_max_actions_per_run(),
        }
    }
}

// ── Load / Save ─────────────────────────────────────────────

/// Read a file to string, handling BOM (UTF-8 BOM and UTF-16 LE/BE).
pub fn read_file_strip_bom(path: &Path) -> Result<String, OrganizerError> {
    let raw = fs::read(path)?;

    // UTF-16 LE BOM: FF FE
    if raw.len() >= 2 && raw[0] == 0xFF && raw[1] == 0xFE {
        let u16_iter = raw[2..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]));
        return String::from_utf16(&u16_iter.collect::<Vec<u16>>())
            .map_err(|e| OrganizerError::Config(format!("Invalid UTF-16 LE: {}", e)));
    }

    // UTF-16 BE BOM: FE FF
    if raw.len() >= 2 && raw[0] == 0xFE && raw[1] == 0xFF {
        let u16_iter = raw[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]));
        return String::from_utf16(&u16_iter.collect::<Vec<u16>>())
            .map_err(|e| OrganizerError::Config(format!("Invalid UTF-16 BE: {}", e)));
    }

    // UTF-8 BOM: EF BB BF
    let text = String::from_utf8(raw)
        .map_err(|e| OrganizerError::Config(format!("Invalid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string();
    Ok(text)
}

/// Load a policy: built-in defaults, deep-merged with the JSON file at
/// `path` when one exists. A malformed file is a fatal error — a plan must
/// never run against a half-understood policy.
pub fn load_policy(path: &Path) -> Result<Policy, OrganizerError> {
    if !path.exists() {
        return Ok(Policy::default());
    }
    let data = read_file_strip_bom(path)?;
    let overlay: serde_json::Value = serde_json::from_str(&data)
        .map_err(|e| OrganizerError::Config(format!("{}: {}", path.display(), e)))?;
    if !overlay.is_object() {
        return Err(OrganizerError::Config(format!(
            "Config must be a JSON object: {}",
            path.display()
        )));
    }

    let mut merged = serde_json::to_value(Policy::default())
        .map_err(|e| OrganizerError::Config(e.to_string()))?;
    deep_merge(&mut merged, overlay);
    serde_json::from_value(merged)
        .map_err(|e| OrganizerError::Config(format!("{}: {}", path.display(), e)))
}

/// Object-by-object merge of `overlay` into `base`; scalars and arrays in
/// the overlay replace the base value wholesale.
fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

pub fn save_policy(path: &Path, policy: &Policy) -> Result<(), OrganizerError> {
    let json = serde_json::to_string_pretty(policy)
        .map_err(|e| OrganizerError::Config(e.to_string()))?;
    fs::write(path, json + "\n")?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────
