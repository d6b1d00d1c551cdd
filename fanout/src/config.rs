//! Locating and reading the configuration and job files

use std::path::{Path, PathBuf};

use anyhow::Context;
use fanout_dispatch::JobRequest;

pub const CONFIG_ENV: &str = "FANOUT_CONFIG";

/// Default locations, tried in order
pub fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./fanout.config.ron"),
        PathBuf::from("/etc/fanout/fanout.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, from `--config` or the `FANOUT_CONFIG` environment variable
/// 2. each of `defaults`, in order
///
/// # Errors
///
/// Fails if `explicit` does not exist, or if no default exists
pub fn find_config_file(explicit: Option<&Path>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Configuration file does not exist: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config / {CONFIG_ENV}\n{paths_tried}"
    )
}

/// Read a RON job description
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid job
pub fn load_job(path: &Path) -> anyhow::Result<JobRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid job file {}", path.display()))
}
