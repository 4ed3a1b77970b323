//! Settings loading: defaults, then a JSON file, then command-line overrides

use anyhow::{Context, Result};
use resumio_types::DownloadSettings;
use std::path::{Path, PathBuf};

/// Default settings file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("resumio").join("config.json"))
}

/// Load settings from `path`, or from the default location if it exists.
///
/// An explicit path must exist; a missing default file means defaults.
pub fn load_settings(path: Option<&Path>) -> Result<DownloadSettings> {
    match path {
        Some(path) => read_settings(path),
        None => match default_config_path() {
            Some(path) if path.exists() => read_settings(&path),
            _ => Ok(DownloadSettings::default()),
        },
    }
}

fn read_settings(path: &Path) -> Result<DownloadSettings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings = serde_json::from_str(&content)
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Apply command-line overrides on top of loaded settings
pub fn apply_overrides(
    mut settings: DownloadSettings,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
) -> DownloadSettings {
    if let Some(max_retries) = max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(retry_delay_ms) = retry_delay_ms {
        settings.retry_delay_ms = retry_delay_ms;
    }
    settings
}
