//! Playback progress data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress ratio above which a title latches to watched.
pub const WATCHED_THRESHOLD: f64 = 0.85;

/// Kind of media a record or transfer refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Movie,
    Episode,
}

/// Identity of a title tracked by the progress store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaId {
    Movie(i64),
    Episode {
        show_id: i64,
        season: u32,
        episode: u32,
    },
}

impl MediaId {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Movie(_) => MediaKind::Movie,
            Self::Episode { .. } => MediaKind::Episode,
        }
    }
}

/// Stable string key for an episode, used in the persisted table
pub fn episode_key(show_id: i64, season: u32, episode: u32) -> String {
    format!("{show_id}:{season}:{episode}")
}

/// Progress ratio clamped to [0, 1]; 0 when the duration is unknown
pub fn progress_ratio(position: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    (position / duration).clamp(0.0, 1.0)
}

/// Playback progress for a movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieProgress {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    pub position: f64,
    pub duration: f64,
    pub watched: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_locator: Option<String>,
}

impl MovieProgress {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            title: String::new(),
            poster: None,
            position: 0.0,
            duration: 0.0,
            watched: false,
            updated_at: Utc::now(),
            source_id: None,
            source_locator: None,
        }
    }

    pub fn progress_ratio(&self) -> f64 {
        progress_ratio(self.position, self.duration)
    }
}

/// Playback progress for a single episode
///
/// Carries no title of its own; display data is resolved through the show
/// metadata map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeProgress {
    pub show_id: i64,
    pub season: u32,
    pub episode: u32,
    pub position: f64,
    pub duration: f64,
    pub watched: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_locator: Option<String>,
}

impl EpisodeProgress {
    pub fn new(show_id: i64, season: u32, episode: u32) -> Self {
        Self {
            show_id,
            season,
            episode,
            position: 0.0,
            duration: 0.0,
            watched: false,
            updated_at: Utc::now(),
            source_id: None,
            source_locator: None,
        }
    }

    pub fn key(&self) -> String {
        episode_key(self.show_id, self.season, self.episode)
    }

    pub fn progress_ratio(&self) -> f64 {
        progress_ratio(self.position, self.duration)
    }
}

/// Display metadata for a show, populated opportunistically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowInfo {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

/// The persisted progress aggregate
///
/// Exclusively owned by the store; callers only ever see clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressTable {
    pub movies: BTreeMap<i64, MovieProgress>,
    pub episodes: BTreeMap<String, EpisodeProgress>,
    pub shows: BTreeMap<i64, ShowInfo>,
}

/// Optional display metadata supplied alongside a progress update
#[derive(Debug, Clone, Default)]
pub struct DisplayHints {
    pub title: Option<String>,
    pub poster: Option<String>,
    pub show_title: Option<String>,
    pub show_poster: Option<String>,
}
