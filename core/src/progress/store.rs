//! Progress store with coalesced durable flushes

use crate::error::Error;
use crate::progress::records::{
    DisplayHints, EpisodeProgress, MediaId, MovieProgress, ProgressTable, ShowInfo,
    WATCHED_THRESHOLD, episode_key,
};
use crate::progress::tracker::TrackerSync;
use crate::storage;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum number of continue-watching entries surfaced to the UI.
const CONTINUE_WATCHING_LIMIT: usize = 6;

/// Titles at or below this ratio are considered barely started.
const CONTINUE_WATCHING_MIN: f64 = 0.05;

/// One entry of the continue-watching set
#[derive(Debug, Clone)]
pub struct ContinueWatchingEntry {
    pub id: MediaId,
    pub title: String,
    pub poster: Option<String>,
    pub ratio: f64,
    pub updated_at: DateTime<Utc>,
}

/// Inner state shared by all clones of the store
struct StoreInner {
    /// Single-writer/multiple-reader table; readers get pre- or post-image
    /// of a racing write, never a torn record.
    table: RwLock<ProgressTable>,

    /// Durable document location
    path: PathBuf,

    /// Quiescence window for routine position updates
    debounce: Duration,

    /// Pending debounced flush, superseded on every routine mutation
    pending_flush: Mutex<Option<JoinHandle<()>>>,

    /// Serializes disk writes so a superseding flush never interleaves
    /// with one already in progress
    io_lock: Mutex<()>,

    /// Snapshot channel for observers
    snapshot_tx: broadcast::Sender<ProgressTable>,

    /// Watched-transition collaborator, fire-and-forget
    tracker: Option<Arc<dyn TrackerSync>>,
}

/// Single source of truth for playback progress.
///
/// Cheap to clone; all clones share state. Mutations are visible to
/// subsequent reads immediately, while the disk write is deferred: routine
/// position updates coalesce behind a debounce window, explicit user intent
/// (watch/unwatch/reset/restore) flushes right away.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<StoreInner>,
}

impl ProgressStore {
    /// Open a store backed by the given document path.
    ///
    /// A missing or corrupt document yields an empty table rather than an
    /// error, keeping the app usable.
    pub fn open(
        path: impl Into<PathBuf>,
        debounce: Duration,
        tracker: Option<Arc<dyn TrackerSync>>,
    ) -> Self {
        let path = path.into();
        let table: ProgressTable = storage::load_json(&path);
        let (snapshot_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(StoreInner {
                table: RwLock::new(table),
                path,
                debounce,
                pending_flush: Mutex::new(None),
                io_lock: Mutex::new(()),
                snapshot_tx,
                tracker,
            }),
        }
    }

    /// Open a store using configured storage settings.
    pub fn from_settings(
        settings: &crate::config::StorageSettings,
        tracker: Option<Arc<dyn TrackerSync>>,
    ) -> Self {
        Self::open(settings.progress_path(), settings.flush_debounce(), tracker)
    }

    // ============ Mutations ============

    /// Record a playback position sample for a title.
    ///
    /// Invalid values (negative, inverted, non-finite, or a non-positive
    /// duration) are logged and leave all state untouched. Valid updates
    /// find-or-create the record, latch the watched flag at the threshold,
    /// merge display hints, publish a snapshot and schedule a debounced
    /// flush.
    pub fn update_progress(&self, id: MediaId, position: f64, duration: f64, hints: DisplayHints) {
        if let Err(e) = validate(position, duration) {
            warn!(?id, "rejected progress update: {e}");
            return;
        }

        let mut watched_event = None;
        {
            let mut table = self.inner.table.write();
            let now = Utc::now();

            match id {
                MediaId::Movie(movie_id) => {
                    let record = table
                        .movies
                        .entry(movie_id)
                        .or_insert_with(|| MovieProgress::new(movie_id));
                    record.position = position;
                    record.duration = duration;
                    record.updated_at = now;
                    if let Some(title) = hints.title {
                        record.title = title;
                    }
                    if let Some(poster) = hints.poster {
                        record.poster = Some(poster);
                    }
                    // One-way latch: recomputation never clears the flag.
                    if !record.watched && record.progress_ratio() >= WATCHED_THRESHOLD {
                        record.watched = true;
                    }
                }
                MediaId::Episode {
                    show_id,
                    season,
                    episode,
                } => {
                    {
                        let record = table
                            .episodes
                            .entry(episode_key(show_id, season, episode))
                            .or_insert_with(|| EpisodeProgress::new(show_id, season, episode));
                        record.position = position;
                        record.duration = duration;
                        record.updated_at = now;
                        if !record.watched && record.progress_ratio() >= WATCHED_THRESHOLD {
                            record.watched = true;
                            watched_event = Some((show_id, season, episode, record.progress_ratio()));
                        }
                    }
                    merge_show_hints(&mut table, show_id, &hints);
                }
            }
        }

        if let Some((show_id, season, episode, ratio)) = watched_event {
            self.notify_watched(show_id, season, episode, ratio);
        }
        self.publish();
        self.schedule_flush();
    }

    /// Mark a title watched, setting its position to the full duration.
    ///
    /// When no duration is known the current position (or one second) is
    /// used as a fallback. Flushes immediately.
    pub fn mark_watched(&self, id: MediaId) {
        let mut watched_event = None;
        {
            let mut table = self.inner.table.write();
            match id {
                MediaId::Movie(movie_id) => {
                    let record = table
                        .movies
                        .entry(movie_id)
                        .or_insert_with(|| MovieProgress::new(movie_id));
                    latch_watched(
                        &mut record.position,
                        &mut record.duration,
                        &mut record.watched,
                        &mut record.updated_at,
                    );
                }
                MediaId::Episode {
                    show_id,
                    season,
                    episode,
                } => {
                    let record = table
                        .episodes
                        .entry(episode_key(show_id, season, episode))
                        .or_insert_with(|| EpisodeProgress::new(show_id, season, episode));
                    if latch_watched(
                        &mut record.position,
                        &mut record.duration,
                        &mut record.watched,
                        &mut record.updated_at,
                    ) {
                        watched_event = Some((show_id, season, episode, record.progress_ratio()));
                    }
                }
            }
        }

        if let Some((show_id, season, episode, ratio)) = watched_event {
            self.notify_watched(show_id, season, episode, ratio);
        }
        self.publish();
        self.flush_now();
    }

    /// Clear the watched flag, keeping the playback position. Flushes
    /// immediately.
    pub fn mark_unwatched(&self, id: MediaId) {
        {
            let mut table = self.inner.table.write();
            match id {
                MediaId::Movie(movie_id) => {
                    if let Some(record) = table.movies.get_mut(&movie_id) {
                        record.watched = false;
                        record.updated_at = Utc::now();
                    }
                }
                MediaId::Episode {
                    show_id,
                    season,
                    episode,
                } => {
                    if let Some(record) =
                        table.episodes.get_mut(&episode_key(show_id, season, episode))
                    {
                        record.watched = false;
                        record.updated_at = Utc::now();
                    }
                }
            }
        }
        self.publish();
        self.flush_now();
    }

    /// Reset a title to the beginning and clear its watched flag. Flushes
    /// immediately.
    pub fn reset_progress(&self, id: MediaId) {
        {
            let mut table = self.inner.table.write();
            match id {
                MediaId::Movie(movie_id) => {
                    if let Some(record) = table.movies.get_mut(&movie_id) {
                        record.position = 0.0;
                        record.watched = false;
                        record.updated_at = Utc::now();
                    }
                }
                MediaId::Episode {
                    show_id,
                    season,
                    episode,
                } => {
                    if let Some(record) =
                        table.episodes.get_mut(&episode_key(show_id, season, episode))
                    {
                        record.position = 0.0;
                        record.watched = false;
                        record.updated_at = Utc::now();
                    }
                }
            }
        }
        self.publish();
        self.flush_now();
    }

    /// Mark every episode of a season before `before_episode` watched, with
    /// a single flush after the batch.
    pub fn mark_previous_episodes_watched(&self, show_id: i64, season: u32, before_episode: u32) {
        let mut events = Vec::new();
        {
            let mut table = self.inner.table.write();
            for episode in 1..before_episode {
                let record = table
                    .episodes
                    .entry(episode_key(show_id, season, episode))
                    .or_insert_with(|| EpisodeProgress::new(show_id, season, episode));
                if latch_watched(
                    &mut record.position,
                    &mut record.duration,
                    &mut record.watched,
                    &mut record.updated_at,
                ) {
                    events.push((show_id, season, episode, record.progress_ratio()));
                }
            }
        }

        for (show_id, season, episode, ratio) in events {
            self.notify_watched(show_id, season, episode, ratio);
        }
        self.publish();
        self.flush_now();
    }

    /// Clear the watched flag of every episode of a season before
    /// `before_episode`, with a single flush after the batch.
    pub fn mark_previous_episodes_unwatched(&self, show_id: i64, season: u32, before_episode: u32) {
        {
            let mut table = self.inner.table.write();
            for episode in 1..before_episode {
                if let Some(record) =
                    table.episodes.get_mut(&episode_key(show_id, season, episode))
                {
                    record.watched = false;
                    record.updated_at = Utc::now();
                }
            }
        }
        self.publish();
        self.flush_now();
    }

    /// Attach the last-used source and locator to a title without touching
    /// its progress. Flushes immediately.
    pub fn record_source_info(&self, id: MediaId, source_id: String, locator: Option<String>) {
        {
            let mut table = self.inner.table.write();
            match id {
                MediaId::Movie(movie_id) => {
                    let record = table
                        .movies
                        .entry(movie_id)
                        .or_insert_with(|| MovieProgress::new(movie_id));
                    record.source_id = Some(source_id);
                    record.source_locator = locator;
                }
                MediaId::Episode {
                    show_id,
                    season,
                    episode,
                } => {
                    let record = table
                        .episodes
                        .entry(episode_key(show_id, season, episode))
                        .or_insert_with(|| EpisodeProgress::new(show_id, season, episode));
                    record.source_id = Some(source_id);
                    record.source_locator = locator;
                }
            }
        }
        self.publish();
        self.flush_now();
    }

    // ============ Queries ============

    /// Progress ratio in [0, 1] for a title; 0 when unknown.
    pub fn progress_ratio(&self, id: MediaId) -> f64 {
        let table = self.inner.table.read();
        match id {
            MediaId::Movie(movie_id) => table
                .movies
                .get(&movie_id)
                .map(|r| r.progress_ratio())
                .unwrap_or(0.0),
            MediaId::Episode {
                show_id,
                season,
                episode,
            } => table
                .episodes
                .get(&episode_key(show_id, season, episode))
                .map(|r| r.progress_ratio())
                .unwrap_or(0.0),
        }
    }

    /// Last recorded playback position in seconds; 0 when unknown.
    pub fn position(&self, id: MediaId) -> f64 {
        let table = self.inner.table.read();
        match id {
            MediaId::Movie(movie_id) => {
                table.movies.get(&movie_id).map(|r| r.position).unwrap_or(0.0)
            }
            MediaId::Episode {
                show_id,
                season,
                episode,
            } => table
                .episodes
                .get(&episode_key(show_id, season, episode))
                .map(|r| r.position)
                .unwrap_or(0.0),
        }
    }

    /// Whether a title has been watched.
    pub fn is_watched(&self, id: MediaId) -> bool {
        let table = self.inner.table.read();
        match id {
            MediaId::Movie(movie_id) => {
                table.movies.get(&movie_id).map(|r| r.watched).unwrap_or(false)
            }
            MediaId::Episode {
                show_id,
                season,
                episode,
            } => table
                .episodes
                .get(&episode_key(show_id, season, episode))
                .map(|r| r.watched)
                .unwrap_or(false),
        }
    }

    /// Most recently updated episode record of a show, if any.
    pub fn latest_episode(&self, show_id: i64) -> Option<EpisodeProgress> {
        let table = self.inner.table.read();
        table
            .episodes
            .values()
            .filter(|e| e.show_id == show_id)
            .max_by_key(|e| e.updated_at)
            .cloned()
    }

    /// The bounded continue-watching set: up to six in-progress titles,
    /// most recently updated first, at most one episode per show.
    pub fn continue_watching(&self) -> Vec<ContinueWatchingEntry> {
        let table = self.inner.table.read();
        let mut entries = Vec::new();

        for movie in table.movies.values() {
            let ratio = movie.progress_ratio();
            if ratio > CONTINUE_WATCHING_MIN && ratio < WATCHED_THRESHOLD {
                entries.push(ContinueWatchingEntry {
                    id: MediaId::Movie(movie.id),
                    title: movie.title.clone(),
                    poster: movie.poster.clone(),
                    ratio,
                    updated_at: movie.updated_at,
                });
            }
        }

        // One entry per show: the most recently updated in-progress episode.
        let mut per_show: std::collections::BTreeMap<i64, &EpisodeProgress> =
            std::collections::BTreeMap::new();
        for episode in table.episodes.values() {
            let ratio = episode.progress_ratio();
            if ratio > CONTINUE_WATCHING_MIN && ratio < WATCHED_THRESHOLD {
                per_show
                    .entry(episode.show_id)
                    .and_modify(|current| {
                        if episode.updated_at > current.updated_at {
                            *current = episode;
                        }
                    })
                    .or_insert(episode);
            }
        }
        for episode in per_show.values() {
            let show = table.shows.get(&episode.show_id);
            entries.push(ContinueWatchingEntry {
                id: MediaId::Episode {
                    show_id: episode.show_id,
                    season: episode.season,
                    episode: episode.episode,
                },
                title: show.map(|s| s.title.clone()).unwrap_or_default(),
                poster: show.and_then(|s| s.poster.clone()),
                ratio: episode.progress_ratio(),
                updated_at: episode.updated_at,
            });
        }

        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries.truncate(CONTINUE_WATCHING_LIMIT);
        entries
    }

    /// Whole-table export for backup.
    pub fn snapshot(&self) -> ProgressTable {
        self.inner.table.read().clone()
    }

    /// Whole-table import; fully replaces in-memory state and flushes
    /// immediately.
    pub fn restore(&self, table: ProgressTable) {
        *self.inner.table.write() = table;
        self.publish();
        self.flush_now();
    }

    /// Subscribe to table snapshots published after each mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressTable> {
        self.inner.snapshot_tx.subscribe()
    }

    // ============ Durability ============

    /// Write the current table to disk and wait for the write to finish.
    /// Part of the teardown lifecycle.
    pub async fn flush(&self) {
        if let Some(task) = self.inner.pending_flush.lock().take() {
            task.abort();
        }
        let inner = Arc::clone(&self.inner);
        let _ = tokio::task::spawn_blocking(move || write_table(&inner)).await;
    }

    /// Schedule a debounced flush, superseding any pending one.
    fn schedule_flush(&self) {
        let inner = Arc::clone(&self.inner);
        let mut pending = self.inner.pending_flush.lock();
        if let Some(task) = pending.take() {
            task.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let _ = tokio::task::spawn_blocking(move || write_table(&inner)).await;
        }));
    }

    /// Flush immediately on a background task, bypassing the debounce.
    fn flush_now(&self) {
        if let Some(task) = self.inner.pending_flush.lock().take() {
            task.abort();
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || write_table(&inner));
    }

    fn publish(&self) {
        let snapshot = self.inner.table.read().clone();
        let _ = self.inner.snapshot_tx.send(snapshot);
    }

    fn notify_watched(&self, show_id: i64, season: u32, episode: u32, ratio: f64) {
        if let Some(tracker) = &self.inner.tracker {
            debug!(show_id, season, episode, "notifying tracker of watched transition");
            tracker.notify_watched(show_id, season, episode, ratio);
        }
    }
}

/// Write the table to its durable document, serialized against concurrent
/// flushes. Failures are logged; state stays valid in memory.
fn write_table(inner: &StoreInner) {
    let _guard = inner.io_lock.lock();
    let snapshot = inner.table.read().clone();
    if let Err(e) = storage::save_json(&inner.path, &snapshot) {
        warn!(
            "failed to persist progress table to {}: {}",
            inner.path.display(),
            e
        );
    }
}

fn validate(position: f64, duration: f64) -> Result<(), Error> {
    let valid = position.is_finite()
        && duration.is_finite()
        && duration > 0.0
        && position >= 0.0
        && position <= duration;
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidProgress { position, duration })
    }
}

/// Watched transition shared by the explicit mark operations. Falls back to
/// `max(position, 1)` as the duration when none is known. Returns whether
/// the flag transitioned false to true.
fn latch_watched(
    position: &mut f64,
    duration: &mut f64,
    watched: &mut bool,
    updated_at: &mut DateTime<Utc>,
) -> bool {
    if *duration <= 0.0 {
        *duration = position.max(1.0);
    }
    *position = *duration;
    *updated_at = Utc::now();
    let transitioned = !*watched;
    *watched = true;
    transitioned
}

fn merge_show_hints(table: &mut ProgressTable, show_id: i64, hints: &DisplayHints) {
    if let Some(title) = &hints.show_title {
        let info = table.shows.entry(show_id).or_insert_with(|| ShowInfo {
            title: title.clone(),
            poster: None,
        });
        info.title = title.clone();
        if let Some(poster) = &hints.show_poster {
            info.poster = Some(poster.clone());
        }
    } else if let Some(poster) = &hints.show_poster {
        if let Some(info) = table.shows.get_mut(&show_id) {
            info.poster = Some(poster.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    fn test_store(dir: &TempDir) -> ProgressStore {
        ProgressStore::open(
            dir.path().join("progress.json"),
            Duration::from_millis(150),
            None,
        )
    }

    fn movie_hints(title: &str) -> DisplayHints {
        DisplayHints {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_invalid_updates_without_mutation() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = MediaId::Movie(1);

        store.update_progress(id, 30.0, 100.0, movie_hints("Heat"));
        let before = store.snapshot();

        store.update_progress(id, 120.0, 100.0, DisplayHints::default());
        store.update_progress(id, -1.0, 100.0, DisplayHints::default());
        store.update_progress(id, 10.0, 0.0, DisplayHints::default());
        store.update_progress(id, 10.0, -5.0, DisplayHints::default());
        store.update_progress(id, f64::NAN, 100.0, DisplayHints::default());
        store.update_progress(id, 10.0, f64::INFINITY, DisplayHints::default());

        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn watched_latches_at_threshold() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = MediaId::Movie(42);

        store.update_progress(id, 84.0, 100.0, movie_hints("Blade Runner"));
        assert!((store.progress_ratio(id) - 0.84).abs() < 1e-9);
        assert!(!store.is_watched(id));

        store.update_progress(id, 86.0, 100.0, DisplayHints::default());
        assert!((store.progress_ratio(id) - 0.86).abs() < 1e-9);
        assert!(store.is_watched(id));

        // Rewinding never clears the latch.
        store.update_progress(id, 10.0, 100.0, DisplayHints::default());
        assert!(store.is_watched(id));

        store.reset_progress(id);
        assert_eq!(store.position(id), 0.0);
        assert!(!store.is_watched(id));
    }

    #[tokio::test]
    async fn mark_watched_falls_back_to_known_position_or_one_second() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        // No record at all: duration falls back to one second.
        let fresh = MediaId::Movie(1);
        store.mark_watched(fresh);
        assert!(store.is_watched(fresh));
        assert_eq!(store.position(fresh), 1.0);

        // Position known but duration is not: position wins.
        let id = MediaId::Episode {
            show_id: 100,
            season: 1,
            episode: 2,
        };
        store.record_source_info(id, "src".into(), None);
        {
            let mut table = store.inner.table.write();
            table.episodes.get_mut("100:1:2").unwrap().position = 30.0;
        }
        store.mark_watched(id);
        assert!(store.is_watched(id));
        assert_eq!(store.position(id), 30.0);
        assert_eq!(store.progress_ratio(id), 1.0);
    }

    #[tokio::test]
    async fn mark_unwatched_keeps_position() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = MediaId::Movie(5);

        store.update_progress(id, 90.0, 100.0, movie_hints("Ran"));
        assert!(store.is_watched(id));

        store.mark_unwatched(id);
        assert!(!store.is_watched(id));
        assert_eq!(store.position(id), 90.0);
    }

    #[tokio::test]
    async fn bulk_marks_previous_episodes() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.mark_previous_episodes_watched(1399, 2, 4);

        for episode in 1..4 {
            assert!(store.is_watched(MediaId::Episode {
                show_id: 1399,
                season: 2,
                episode,
            }));
        }
        assert!(!store.is_watched(MediaId::Episode {
            show_id: 1399,
            season: 2,
            episode: 4,
        }));

        store.mark_previous_episodes_unwatched(1399, 2, 4);
        for episode in 1..4 {
            assert!(!store.is_watched(MediaId::Episode {
                show_id: 1399,
                season: 2,
                episode,
            }));
        }
    }

    #[tokio::test]
    async fn source_info_does_not_touch_progress() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let id = MediaId::Movie(9);

        store.update_progress(id, 40.0, 100.0, movie_hints("Stalker"));
        store.record_source_info(id, "src-2".into(), Some("magnet:xyz".into()));

        let table = store.snapshot();
        let record = &table.movies[&9];
        assert_eq!(record.position, 40.0);
        assert!(!record.watched);
        assert_eq!(record.source_id.as_deref(), Some("src-2"));
        assert_eq!(record.source_locator.as_deref(), Some("magnet:xyz"));
    }

    #[tokio::test]
    async fn continue_watching_bounds_order_and_dedup() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        // Outside the open interval on both sides.
        store.update_progress(MediaId::Movie(1), 4.0, 100.0, movie_hints("Fresh"));
        store.update_progress(MediaId::Movie(2), 90.0, 100.0, movie_hints("Done"));
        // In progress.
        store.update_progress(MediaId::Movie(3), 50.0, 100.0, movie_hints("Older"));
        std::thread::sleep(Duration::from_millis(3));

        // Two episodes of the same show: only the later update survives.
        let show_hints = DisplayHints {
            show_title: Some("The Wire".into()),
            ..Default::default()
        };
        store.update_progress(
            MediaId::Episode {
                show_id: 1438,
                season: 1,
                episode: 1,
            },
            30.0,
            100.0,
            show_hints.clone(),
        );
        std::thread::sleep(Duration::from_millis(3));
        store.update_progress(
            MediaId::Episode {
                show_id: 1438,
                season: 1,
                episode: 2,
            },
            20.0,
            100.0,
            show_hints,
        );
        std::thread::sleep(Duration::from_millis(3));
        store.update_progress(MediaId::Movie(4), 60.0, 100.0, movie_hints("Newest"));

        let items = store.continue_watching();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, MediaId::Movie(4));
        assert_eq!(
            items[1].id,
            MediaId::Episode {
                show_id: 1438,
                season: 1,
                episode: 2,
            }
        );
        assert_eq!(items[1].title, "The Wire");
        assert_eq!(items[2].id, MediaId::Movie(3));
        assert!(items.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[tokio::test]
    async fn continue_watching_never_exceeds_six() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for movie_id in 1..=8 {
            store.update_progress(
                MediaId::Movie(movie_id),
                50.0,
                100.0,
                movie_hints(&format!("Movie {movie_id}")),
            );
            std::thread::sleep(Duration::from_millis(2));
        }

        let items = store.continue_watching();
        assert_eq!(items.len(), 6);
        // The two oldest updates fall off the end.
        assert!(items.iter().all(|e| e.id != MediaId::Movie(1)));
        assert!(items.iter().all(|e| e.id != MediaId::Movie(2)));
    }

    #[tokio::test]
    async fn latest_episode_picks_most_recent_update_per_show() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let episode = |show_id, season, episode| MediaId::Episode {
            show_id,
            season,
            episode,
        };

        // Out-of-order episode numbers; recency is by update time alone.
        store.update_progress(episode(100, 1, 3), 10.0, 100.0, DisplayHints::default());
        std::thread::sleep(Duration::from_millis(3));
        store.update_progress(episode(100, 2, 1), 10.0, 100.0, DisplayHints::default());
        std::thread::sleep(Duration::from_millis(3));
        store.update_progress(episode(100, 1, 5), 10.0, 100.0, DisplayHints::default());
        std::thread::sleep(Duration::from_millis(3));
        // Another show's later update must not bleed in.
        store.update_progress(episode(200, 1, 1), 10.0, 100.0, DisplayHints::default());

        let latest = store.latest_episode(100).expect("show has episodes");
        assert_eq!((latest.season, latest.episode), (1, 5));

        let other = store.latest_episode(200).expect("show has episodes");
        assert_eq!((other.show_id, other.season, other.episode), (200, 1, 1));

        assert!(store.latest_episode(999).is_none());
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_progress(MediaId::Movie(1), 42.0, 100.0, movie_hints("Solaris"));
        store.update_progress(
            MediaId::Episode {
                show_id: 7,
                season: 1,
                episode: 3,
            },
            15.0,
            45.0,
            DisplayHints {
                show_title: Some("Columbo".into()),
                ..Default::default()
            },
        );
        let exported = store.snapshot();

        // A restore fully replaces whatever accumulated in between.
        store.update_progress(MediaId::Movie(2), 10.0, 100.0, movie_hints("Noise"));
        store.restore(exported.clone());

        assert_eq!(store.snapshot(), exported);
        assert!(store.snapshot().movies.get(&2).is_none());
    }

    #[tokio::test]
    async fn observers_receive_snapshots() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let mut rx = store.subscribe();

        store.update_progress(MediaId::Movie(11), 30.0, 60.0, movie_hints("Alien"));

        let snapshot = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no snapshot published")
            .unwrap();
        assert!(snapshot.movies.contains_key(&11));
    }

    #[tokio::test]
    async fn routine_updates_flush_after_quiescence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let store = ProgressStore::open(&path, Duration::from_millis(150), None);

        store.update_progress(MediaId::Movie(1), 10.0, 100.0, movie_hints("Brazil"));
        assert!(!path.exists(), "flush must wait for the debounce window");

        sleep(Duration::from_millis(600)).await;
        assert!(path.exists());

        let persisted: ProgressTable = storage::load_json(&path);
        assert_eq!(persisted.movies[&1].position, 10.0);
    }

    #[tokio::test]
    async fn explicit_intent_flushes_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        // Debounce far beyond the test horizon.
        let store = ProgressStore::open(&path, Duration::from_secs(60), None);

        store.mark_watched(MediaId::Movie(3));

        sleep(Duration::from_millis(500)).await;
        assert!(path.exists(), "mark_watched must bypass the debounce");
        let persisted: ProgressTable = storage::load_json(&path);
        assert!(persisted.movies[&3].watched);
    }

    #[tokio::test]
    async fn flush_then_reopen_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");

        let store = ProgressStore::open(&path, Duration::from_secs(60), None);
        store.update_progress(MediaId::Movie(21), 33.0, 99.0, movie_hints("Paths of Glory"));
        store.flush().await;

        let reopened = ProgressStore::open(&path, Duration::from_secs(60), None);
        assert_eq!(reopened.position(MediaId::Movie(21)), 33.0);
    }

    #[tokio::test]
    async fn corrupt_document_yields_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "definitely not json").unwrap();

        let store = ProgressStore::open(&path, Duration::from_millis(150), None);
        assert_eq!(store.snapshot(), ProgressTable::default());
    }

    #[derive(Default)]
    struct RecordingTracker {
        calls: Mutex<Vec<(i64, u32, u32)>>,
    }

    impl TrackerSync for RecordingTracker {
        fn notify_watched(&self, show_id: i64, season: u32, episode: u32, _ratio: f64) {
            self.calls.lock().push((show_id, season, episode));
        }
    }

    #[tokio::test]
    async fn tracker_notified_once_per_watched_transition() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(RecordingTracker::default());
        let store = ProgressStore::open(
            dir.path().join("progress.json"),
            Duration::from_millis(150),
            Some(tracker.clone() as Arc<dyn TrackerSync>),
        );

        let id = MediaId::Episode {
            show_id: 1399,
            season: 1,
            episode: 1,
        };
        store.update_progress(id, 90.0, 100.0, DisplayHints::default());
        store.update_progress(id, 95.0, 100.0, DisplayHints::default());
        // Movies never notify the tracker.
        store.update_progress(MediaId::Movie(1), 99.0, 100.0, DisplayHints::default());

        assert_eq!(*tracker.calls.lock(), vec![(1399, 1, 1)]);
    }
}
