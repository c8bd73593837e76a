//! Settings data structures

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Progress store configuration
    pub storage: StorageSettings,

    /// Transfer queue configuration
    pub transfers: TransferSettings,
}

/// Durable state locations and flush tuning for the progress store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the progress document
    pub data_dir: PathBuf,

    /// Quiescence window before a routine progress update hits disk
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("couchlog"),
            flush_debounce_ms: default_flush_debounce_ms(),
        }
    }
}

impl StorageSettings {
    /// Path of the durable progress document
    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }

    /// Flush debounce window as a [`Duration`]
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }
}

fn default_flush_debounce_ms() -> u64 {
    2000
}

/// Transfer queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Directory holding completed media, subtitles and the asset ledger
    pub downloads_dir: PathBuf,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            downloads_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("./downloads"))
                .join("Couchlog"),
        }
    }
}
