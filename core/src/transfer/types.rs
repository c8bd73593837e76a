//! Transfer queue data model

use crate::progress::MediaKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Transfer status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Optional descriptive metadata carried through a transfer into its asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_poster: Option<String>,
}

/// Caller-supplied description of a transfer to enqueue
#[derive(Debug, Clone, Default)]
pub struct TransferSpec {
    pub source: String,
    pub headers: HashMap<String, String>,
    pub title: String,
    pub poster: Option<String>,
    pub kind: MediaKind,
    pub meta: Option<TransferMeta>,
    pub subtitle_source: Option<String>,
}

/// One queued or active transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: String,
    pub source: String,
    pub headers: HashMap<String, String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    pub kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<TransferMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_source: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn new(spec: TransferSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: spec.source,
            headers: spec.headers,
            title: spec.title,
            poster: spec.poster,
            kind: spec.kind,
            meta: spec.meta,
            subtitle_source: spec.subtitle_source,
            created_at: Utc::now(),
        }
    }
}

/// A completed transfer's artifact, registered in the asset ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedAsset {
    pub id: String,
    pub name: String,
    pub completed_at: DateTime<Utc>,
    pub origin: String,
    pub local_path: PathBuf,
    pub kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<TransferMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<PathBuf>,
}

// Equality is identity-based: two ledger entries are the same asset exactly
// when their transfer ids match.
impl PartialEq for DownloadedAsset {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DownloadedAsset {}

impl std::hash::Hash for DownloadedAsset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl DownloadedAsset {
    /// Bytes occupied on disk by the media file (recursively, if it is a
    /// directory) plus the subtitle file. Computed on demand, never cached.
    pub fn size_on_disk(&self) -> u64 {
        let mut total = path_size(&self.local_path);
        if let Some(subtitle) = &self.subtitle_path {
            total += path_size(subtitle);
        }
        total
    }
}

fn path_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::metadata(path) else {
        return 0;
    };
    if meta.is_file() {
        return meta.len();
    }

    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| path_size(&entry.path()))
        .sum()
}

/// Point-in-time view of the active transfer for UI consumption
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub request: TransferRequest,
    pub status: TransferStatus,
    pub progress: f64,
}

/// Progress/status event published to observers
#[derive(Debug, Clone, Serialize)]
pub struct TransferUpdate {
    pub id: String,
    pub status: TransferStatus,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
    pub paused_all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn asset(id: &str, dir: &TempDir) -> DownloadedAsset {
        DownloadedAsset {
            id: id.to_string(),
            name: "Some Film".into(),
            completed_at: Utc::now(),
            origin: "https://example.com/file.mp4".into(),
            local_path: dir.path().join(format!("{id}.mp4")),
            kind: MediaKind::Movie,
            meta: None,
            subtitle_source: None,
            subtitle_path: None,
        }
    }

    #[test]
    fn asset_equality_is_identity_based() {
        let dir = TempDir::new().unwrap();
        let a = asset("x", &dir);
        let mut b = asset("x", &dir);
        b.name = "Different Name".into();

        assert_eq!(a, b);
        assert_ne!(a, asset("y", &dir));
    }

    #[test]
    fn size_on_disk_sums_media_and_subtitle() {
        let dir = TempDir::new().unwrap();
        let mut a = asset("x", &dir);
        std::fs::write(&a.local_path, vec![0u8; 1000]).unwrap();

        let sub = dir.path().join("x.srt");
        std::fs::write(&sub, vec![0u8; 24]).unwrap();
        a.subtitle_path = Some(sub);

        assert_eq!(a.size_on_disk(), 1024);
    }

    #[test]
    fn size_on_disk_recurses_into_directories() {
        let dir = TempDir::new().unwrap();
        let mut a = asset("x", &dir);

        let media_dir = dir.path().join("x.media");
        std::fs::create_dir_all(media_dir.join("nested")).unwrap();
        std::fs::write(media_dir.join("part1.bin"), vec![0u8; 10]).unwrap();
        std::fs::write(media_dir.join("nested/part2.bin"), vec![0u8; 5]).unwrap();
        a.local_path = media_dir;

        assert_eq!(a.size_on_disk(), 15);
    }

    #[test]
    fn missing_files_count_as_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(asset("gone", &dir).size_on_disk(), 0);
    }
}
