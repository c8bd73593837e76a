//! Outbound seam to a third-party watch-status tracker

/// Collaborator notified when an episode first becomes watched.
///
/// Implementations must not block: the store calls this inline from its
/// write path, so a networked implementation should hand the notification
/// to its own task (send on a channel, spawn) and report failures through
/// its own logging. Nothing an implementation does can fail the store
/// operation that triggered it.
pub trait TrackerSync: Send + Sync {
    fn notify_watched(&self, show_id: i64, season: u32, episode: u32, ratio: f64);
}
