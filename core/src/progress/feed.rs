//! Continuous playback position feed

use crate::progress::records::{DisplayHints, MediaId};
use crate::progress::store::ProgressStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// One playback position sample, typically emitted about once per second.
#[derive(Debug, Clone, Copy)]
pub struct PositionSample {
    pub position: f64,
    pub duration: f64,
}

impl PositionSample {
    /// Samples outside [0, duration] or with a non-finite duration are
    /// dropped silently at the feed boundary.
    fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.duration.is_finite()
            && self.duration > 0.0
            && self.position >= 0.0
            && self.position <= self.duration
    }
}

impl ProgressStore {
    /// Attach a playback position source for one title.
    ///
    /// Spawns a task that funnels valid samples into
    /// [`ProgressStore::update_progress`] until the sender side is dropped.
    pub fn attach_position_feed(
        &self,
        id: MediaId,
        hints: DisplayHints,
        mut samples: mpsc::Receiver<PositionSample>,
    ) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            while let Some(sample) = samples.recv().await {
                if !sample.is_valid() {
                    trace!(?id, ?sample, "dropping out-of-range position sample");
                    continue;
                }
                store.update_progress(id, sample.position, sample.duration, hints.clone());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn feed_filters_invalid_samples() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::open(
            dir.path().join("progress.json"),
            Duration::from_secs(2),
            None,
        );

        let (tx, rx) = mpsc::channel(16);
        let handle = store.attach_position_feed(MediaId::Movie(7), DisplayHints::default(), rx);

        for sample in [
            PositionSample {
                position: 10.0,
                duration: 100.0,
            },
            PositionSample {
                position: f64::NAN,
                duration: 100.0,
            },
            PositionSample {
                position: 120.0,
                duration: 100.0,
            },
            PositionSample {
                position: -3.0,
                duration: 100.0,
            },
            PositionSample {
                position: 20.0,
                duration: f64::INFINITY,
            },
        ] {
            tx.send(sample).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        // Only the first sample survives the boundary checks.
        assert_eq!(store.position(MediaId::Movie(7)), 10.0);
    }
}
