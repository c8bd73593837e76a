//! Configuration loading for embedding applications

mod settings;

pub use settings::*;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file location under the platform config directory.
///
/// A convenience for embedders; the load/save functions take an explicit
/// path so tests and multi-profile setups control where config lives.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("couchlog")
        .join("config.toml")
}

/// Load settings from `path`, writing and returning the defaults when the
/// file does not exist yet.
pub fn load_or_create(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(settings)
    } else {
        let settings = Settings::default();
        save(&settings, path)?;
        Ok(settings)
    }
}

/// Write settings to `path` as TOML, creating parent directories as needed.
pub fn save(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(settings)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_create_writes_defaults_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let settings = load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.storage.flush_debounce_ms, 2000);
    }

    #[test]
    fn save_then_load_round_trips_custom_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.storage.data_dir = PathBuf::from("/tmp/couchlog-data");
        settings.storage.flush_debounce_ms = 250;
        settings.transfers.downloads_dir = PathBuf::from("/tmp/couchlog-media");
        save(&settings, &path).unwrap();

        let loaded = load_or_create(&path).unwrap();
        assert_eq!(loaded.storage.data_dir, settings.storage.data_dir);
        assert_eq!(loaded.storage.flush_debounce_ms, 250);
        assert_eq!(
            loaded.transfers.downloads_dir,
            settings.transfers.downloads_dir
        );
    }

    #[test]
    fn missing_debounce_field_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\ndata_dir = \"/tmp/d\"\n\n[transfers]\ndownloads_dir = \"/tmp/m\"\n",
        )
        .unwrap();

        let loaded = load_or_create(&path).unwrap();
        assert_eq!(loaded.storage.flush_debounce_ms, 2000);
    }
}
