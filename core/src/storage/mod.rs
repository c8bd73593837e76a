//! Durable JSON documents with atomic replace-on-write

use crate::error::Error;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Load a JSON document, falling back to the default value.
///
/// A missing file is the normal first-run case; a corrupt file is logged and
/// swallowed so the app stays usable with empty state.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(value) => value,
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!("ignoring unreadable document {}: {}", path.display(), e);
            T::default()
        }
    }
}

/// Load a JSON document, propagating read and decode failures.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write a JSON document via a sibling temp file and rename.
///
/// Process termination mid-write leaves either the previous document or the
/// new one in place, never a truncated file.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    let content = serde_json::to_string_pretty(value)?;

    if let Err(e) = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
