//! Playback progress tracking: records, store, position feed, tracker seam

mod feed;
mod records;
mod store;
mod tracker;

pub use feed::PositionSample;
pub use records::{
    DisplayHints, EpisodeProgress, MediaId, MediaKind, MovieProgress, ProgressTable, ShowInfo,
    WATCHED_THRESHOLD, episode_key, progress_ratio,
};
pub use store::{ContinueWatchingEntry, ProgressStore};
pub use tracker::TrackerSync;
