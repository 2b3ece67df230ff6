use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::time::Duration;

use larder_core::recompute::DEFAULT_DEBOUNCE;

pub struct Config {
    pub db_path: PathBuf,
    pub debounce: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "larder").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = std::env::var_os("LARDER_DB")
            .filter(|p| !p.is_empty())
            .map_or_else(|| data_dir.join("larder.db"), PathBuf::from);

        let debounce = parse_debounce(std::env::var("LARDER_RECOMPUTE_DEBOUNCE_MS").ok().as_deref())?;

        Ok(Config {
            db_path,
            debounce,
        })
    }
}

/// Debounce window in milliseconds; unset or blank means the default.
fn parse_debounce(value: Option<&str>) -> Result<Duration> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(DEFAULT_DEBOUNCE),
        Some(v) => {
            let ms: u64 = v.parse().with_context(|| {
                format!("Invalid LARDER_RECOMPUTE_DEBOUNCE_MS '{v}'. Use a whole number of milliseconds")
            })?;
            Ok(Duration::from_millis(ms))
        }
    }
}
