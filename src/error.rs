use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrganizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Refusing to operate outside root: {} (root: {})", .path.display(), .root.display())]
    Containment { root: PathBuf, path: PathBuf },

    #[error("Planned actions ({planned}) exceed max_actions_per_run ({max})")]
    SafetyCapExceeded { planned: usize, max: usize },

    #[error("Conversion failed for {}: {}", .src.display(), .reason)]
    Conversion { src: PathBuf, reason: String },

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}
