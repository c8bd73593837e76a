//! Durable registry of completed transfers

use crate::error::Error;
use crate::storage;
use crate::transfer::types::DownloadedAsset;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the ledger document inside the downloads directory.
const LEDGER_FILE: &str = "downloads.json";

/// Durable append/remove log of downloaded assets.
///
/// Lives alongside the content files it describes. Corruption is swallowed
/// on load (empty collection) so a damaged ledger never bricks the app.
#[derive(Debug, Clone)]
pub struct AssetLedger {
    downloads_dir: PathBuf,
}

impl AssetLedger {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Directory holding the content files and the ledger document.
    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    fn ledger_path(&self) -> PathBuf {
        self.downloads_dir.join(LEDGER_FILE)
    }

    /// Load all ledger entries; absent or corrupt documents yield an empty
    /// collection.
    pub fn load(&self) -> Vec<DownloadedAsset> {
        storage::load_json(&self.ledger_path())
    }

    /// Replace the durable collection wholesale.
    pub fn save(&self, assets: &[DownloadedAsset]) -> Result<(), Error> {
        storage::save_json(&self.ledger_path(), &assets)
    }

    /// Replace an entry with the same identity, or append.
    pub fn upsert(&self, asset: DownloadedAsset) -> Result<(), Error> {
        let mut assets = self.load();
        match assets.iter_mut().find(|a| a.id == asset.id) {
            Some(existing) => *existing = asset,
            None => assets.push(asset),
        }
        self.save(&assets)
    }

    /// Remove the entry with the given identity, if present.
    pub fn delete(&self, id: &str) -> Result<(), Error> {
        let mut assets = self.load();
        assets.retain(|a| a.id != id);
        self.save(&assets)
    }

    /// Files in the downloads directory that no ledger entry references by
    /// name. Maintenance tooling decides what to do with them; nothing is
    /// deleted here. Partial transfer output and the ledger document itself
    /// are never reported.
    pub fn find_orphaned_files(&self) -> Vec<PathBuf> {
        let referenced: HashSet<std::ffi::OsString> = self
            .load()
            .iter()
            .flat_map(|asset| {
                asset
                    .local_path
                    .file_name()
                    .into_iter()
                    .chain(asset.subtitle_path.as_deref().and_then(Path::file_name))
                    .map(|n| n.to_os_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        let entries = match std::fs::read_dir(&self.downloads_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "cannot scan downloads directory {}: {}",
                    self.downloads_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut orphans = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str == LEDGER_FILE
                || name_str.starts_with('.')
                || name_str.ends_with(".part")
                || name_str.ends_with(".tmp")
            {
                continue;
            }
            if !referenced.contains(&name) {
                orphans.push(entry.path());
            }
        }
        orphans.sort();
        orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MediaKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn asset(id: &str, dir: &Path) -> DownloadedAsset {
        DownloadedAsset {
            id: id.to_string(),
            name: format!("Asset {id}"),
            completed_at: Utc::now(),
            origin: format!("https://example.com/{id}.mp4"),
            local_path: dir.join(format!("{id}.mp4")),
            kind: MediaKind::Movie,
            meta: None,
            subtitle_source: None,
            subtitle_path: None,
        }
    }

    #[test]
    fn load_is_empty_when_absent_or_corrupt() {
        let dir = TempDir::new().unwrap();
        let ledger = AssetLedger::new(dir.path());
        assert!(ledger.load().is_empty());

        std::fs::write(dir.path().join(LEDGER_FILE), "][").unwrap();
        assert!(ledger.load().is_empty());
    }

    #[test]
    fn upsert_replaces_by_identity() {
        let dir = TempDir::new().unwrap();
        let ledger = AssetLedger::new(dir.path());

        ledger.upsert(asset("a", dir.path())).unwrap();
        ledger.upsert(asset("b", dir.path())).unwrap();

        let mut replacement = asset("a", dir.path());
        replacement.name = "Renamed".into();
        ledger.upsert(replacement).unwrap();

        let assets = ledger.load();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets.iter().find(|a| a.id == "a").unwrap().name, "Renamed");
    }

    #[test]
    fn delete_removes_entry() {
        let dir = TempDir::new().unwrap();
        let ledger = AssetLedger::new(dir.path());

        ledger.upsert(asset("a", dir.path())).unwrap();
        ledger.upsert(asset("b", dir.path())).unwrap();
        ledger.delete("a").unwrap();

        let assets = ledger.load();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].id, "b");
    }

    #[test]
    fn orphan_scan_skips_referenced_and_bookkeeping_files() {
        let dir = TempDir::new().unwrap();
        let ledger = AssetLedger::new(dir.path());

        let mut tracked = asset("a", dir.path());
        let sub = dir.path().join("a.srt");
        tracked.subtitle_path = Some(sub.clone());
        std::fs::write(&tracked.local_path, b"media").unwrap();
        std::fs::write(&sub, b"subs").unwrap();
        ledger.upsert(tracked).unwrap();

        std::fs::write(dir.path().join("stray.mkv"), b"???").unwrap();
        std::fs::write(dir.path().join("b.part"), b"partial").unwrap();

        let orphans = ledger.find_orphaned_files();
        assert_eq!(orphans, vec![dir.path().join("stray.mkv")]);
    }
}
