//! Transfer queue manager: one active transfer at a time from a FIFO queue

use crate::transfer::ledger::AssetLedger;
use crate::transfer::task::{self, TransportOutcome};
use crate::transfer::types::{
    DownloadedAsset, TransferRequest, TransferSnapshot, TransferSpec, TransferStats,
    TransferStatus, TransferUpdate,
};
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

/// Minimum progress movement before an update is published to observers.
const PROGRESS_EPSILON: f64 = 0.01;

/// The occupant of the active slot. The transport handle stays private to
/// the manager; only its control channels live here.
struct ActiveTransfer {
    request: TransferRequest,
    status: TransferStatus,
    progress: f64,
    cancel_tx: mpsc::Sender<()>,
    pause_tx: watch::Sender<bool>,
}

/// Queue, active slot and completed list, guarded by one lock so every
/// state transition is serialized.
#[derive(Default)]
struct QueueState {
    queue: VecDeque<TransferRequest>,
    active: Option<ActiveTransfer>,
    paused_all: bool,
    completed: Vec<DownloadedAsset>,
}

struct ManagerInner {
    state: Mutex<QueueState>,
    ledger: AssetLedger,
    client: reqwest::Client,
}

/// Orchestrates one binary transfer at a time from a strict FIFO queue.
///
/// Cheap to clone; all clones share state. Transport callbacks re-enter the
/// manager through a clone held by the spawned transfer task. Completed
/// artifacts are registered with the [`AssetLedger`] and kept in an
/// in-memory list for UI consumption.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<ManagerInner>,
    events_tx: broadcast::Sender<TransferUpdate>,
}

impl TransferManager {
    /// Create a manager rooted at the given downloads directory, loading
    /// previously completed assets from the ledger.
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Result<Self> {
        let downloads_dir = downloads_dir.into();
        std::fs::create_dir_all(&downloads_dir)?;

        let ledger = AssetLedger::new(&downloads_dir);
        let completed = ledger.load();

        let client = reqwest::Client::builder()
            .user_agent(concat!("couchlog/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (events_tx, _) = broadcast::channel(1000);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(QueueState {
                    completed,
                    ..Default::default()
                }),
                ledger,
                client,
            }),
            events_tx,
        })
    }

    /// Subscribe to progress and status updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.events_tx.subscribe()
    }

    /// The asset ledger backing this manager.
    pub fn ledger(&self) -> &AssetLedger {
        &self.inner.ledger
    }

    // ============ Queue operations ============

    /// Append a new transfer; starts it immediately when the active slot is
    /// free and the queue is not globally paused. Returns the transfer id.
    pub fn enqueue(&self, spec: TransferSpec) -> String {
        let request = TransferRequest::new(spec);
        let id = request.id.clone();

        let mut state = self.inner.state.lock();
        state.queue.push_back(request);
        self.publish(&id, TransferStatus::Queued, 0.0, None);

        if state.active.is_none() && !state.paused_all {
            if let Some(next) = state.queue.pop_front() {
                self.start_locked(&mut state, next);
            }
        }
        id
    }

    /// Promote the queue head to active, unless a transfer is already
    /// active or the queue is globally paused.
    pub fn advance_queue(&self) {
        let mut state = self.inner.state.lock();
        if state.paused_all || state.active.is_some() {
            return;
        }
        if let Some(next) = state.queue.pop_front() {
            self.start_locked(&mut state, next);
        }
    }

    /// Suspend the active transfer at the transport level, keeping it in
    /// the active slot.
    pub fn pause_active(&self) {
        let mut state = self.inner.state.lock();
        if let Some(active) = state.active.as_mut() {
            if active.status == TransferStatus::Active {
                active.status = TransferStatus::Paused;
                let _ = active.pause_tx.send(true);
                self.publish(
                    &active.request.id,
                    TransferStatus::Paused,
                    active.progress,
                    None,
                );
            }
        }
    }

    /// Continue a paused active transfer.
    pub fn resume_active(&self) {
        let mut state = self.inner.state.lock();
        if let Some(active) = state.active.as_mut() {
            if active.status == TransferStatus::Paused {
                active.status = TransferStatus::Active;
                let _ = active.pause_tx.send(false);
                self.publish(
                    &active.request.id,
                    TransferStatus::Active,
                    active.progress,
                    None,
                );
            }
        }
    }

    /// Abort the active transfer and discard its partial data. The next
    /// queued item is not promoted until [`advance_queue`] or an
    /// auto-advance runs.
    ///
    /// [`advance_queue`]: TransferManager::advance_queue
    pub fn cancel_active(&self) {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.active.take();
            if let Some(active) = &removed {
                // The active transfer normally left the queue on dequeue;
                // drop any stale duplicate.
                let id = active.request.id.clone();
                state.queue.retain(|r| r.id != id);
            }
            removed
        };

        if let Some(active) = removed {
            let _ = active.cancel_tx.try_send(());
            info!("cancelled transfer {}", active.request.id);
            self.publish(
                &active.request.id,
                TransferStatus::Cancelled,
                active.progress,
                None,
            );
        }
    }

    /// Set the global pause flag and suspend the active transfer, if any.
    /// While set, nothing is promoted out of the queue.
    pub fn pause_all(&self) {
        let mut state = self.inner.state.lock();
        state.paused_all = true;
        if let Some(active) = state.active.as_mut() {
            if active.status == TransferStatus::Active {
                active.status = TransferStatus::Paused;
                let _ = active.pause_tx.send(true);
                self.publish(
                    &active.request.id,
                    TransferStatus::Paused,
                    active.progress,
                    None,
                );
            }
        }
    }

    /// Clear the global pause flag, then resume the active transfer or, if
    /// none, promote the queue head.
    pub fn resume_all(&self) {
        let advance = {
            let mut state = self.inner.state.lock();
            state.paused_all = false;
            match state.active.as_mut() {
                Some(active) => {
                    if active.status == TransferStatus::Paused {
                        active.status = TransferStatus::Active;
                        let _ = active.pause_tx.send(false);
                        self.publish(
                            &active.request.id,
                            TransferStatus::Active,
                            active.progress,
                            None,
                        );
                    }
                    false
                }
                None => true,
            }
        };
        if advance {
            self.advance_queue();
        }
    }

    /// Cancel the active transfer, drop the queue, forget all completed
    /// assets and clear the ledger's durable store. Content files on disk
    /// are left for [`AssetLedger::find_orphaned_files`] tooling.
    pub fn delete_all(&self) {
        self.cancel_active();
        {
            let mut state = self.inner.state.lock();
            state.queue.clear();
            state.completed.clear();
        }
        if let Err(e) = self.inner.ledger.save(&[]) {
            warn!("failed to clear asset ledger: {e}");
        }
    }

    /// Cancel the active transfer and drop the queue; completed assets are
    /// untouched.
    pub fn delete_non_completed(&self) {
        self.cancel_active();
        self.inner.state.lock().queue.clear();
    }

    /// Remove an asset's files (best-effort; missing files are fine), its
    /// ledger entry and its in-memory record.
    pub fn delete_asset(&self, asset: &DownloadedAsset) {
        remove_path(&asset.local_path);
        if let Some(subtitle) = &asset.subtitle_path {
            remove_path(subtitle);
        }

        if let Err(e) = self.inner.ledger.delete(&asset.id) {
            warn!("failed to remove ledger entry {}: {}", asset.id, e);
        }
        self.inner.state.lock().completed.retain(|a| a.id != asset.id);
        info!("deleted asset {}", asset.id);
    }

    // ============ Accessors ============

    /// Snapshot of the active transfer, if any.
    pub fn active(&self) -> Option<TransferSnapshot> {
        self.inner.state.lock().active.as_ref().map(|a| TransferSnapshot {
            request: a.request.clone(),
            status: a.status,
            progress: a.progress,
        })
    }

    /// Pending transfers in queue order.
    pub fn queued(&self) -> Vec<TransferRequest> {
        self.inner.state.lock().queue.iter().cloned().collect()
    }

    /// Completed assets, oldest first.
    pub fn completed(&self) -> Vec<DownloadedAsset> {
        self.inner.state.lock().completed.clone()
    }

    /// Whether the queue is globally paused.
    pub fn is_paused_all(&self) -> bool {
        self.inner.state.lock().paused_all
    }

    /// Current queue statistics.
    pub fn stats(&self) -> TransferStats {
        let state = self.inner.state.lock();
        TransferStats {
            active: usize::from(state.active.is_some()),
            queued: state.queue.len(),
            completed: state.completed.len(),
            paused_all: state.paused_all,
        }
    }

    // ============ Transport callbacks ============

    /// Begin a transfer inside the state lock: occupy the active slot, then
    /// hand the byte work to a spawned transport task.
    fn start_locked(&self, state: &mut QueueState, request: TransferRequest) {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (pause_tx, pause_rx) = watch::channel(false);

        state.active = Some(ActiveTransfer {
            request: request.clone(),
            status: TransferStatus::Active,
            progress: 0.0,
            cancel_tx,
            pause_tx,
        });
        self.publish(&request.id, TransferStatus::Active, 0.0, None);

        let manager = self.clone();
        tokio::spawn(async move {
            let progress_manager = manager.clone();
            let progress_id = request.id.clone();
            let partial_dir = manager.partial_dir();

            let outcome = task::run_transfer(
                &manager.inner.client,
                &request,
                &partial_dir,
                cancel_rx,
                pause_rx,
                move |written, expected| progress_manager.on_progress(&progress_id, written, expected),
            )
            .await;

            manager.on_transport_done(request, outcome);
        });
    }

    /// Byte-progress tick from the transport layer. Updates and publishes
    /// only when the ratio moved more than [`PROGRESS_EPSILON`] past the
    /// last published value; ticks without a known total are ignored.
    fn on_progress(&self, id: &str, written: u64, expected: Option<u64>) {
        let Some(expected) = expected.filter(|total| *total > 0) else {
            return;
        };
        let ratio = (written as f64 / expected as f64).clamp(0.0, 1.0);

        let mut state = self.inner.state.lock();
        let Some(active) = state.active.as_mut() else {
            return;
        };
        if active.request.id != id {
            return;
        }
        if ratio - active.progress > PROGRESS_EPSILON {
            active.progress = ratio;
            let status = active.status;
            self.publish(id, status, ratio, None);
        }
    }

    fn on_transport_done(&self, request: TransferRequest, outcome: TransportOutcome) {
        match outcome {
            TransportOutcome::Done { media, subtitle } => {
                self.finish_transfer(request, media, subtitle);
            }
            TransportOutcome::Cancelled => {
                // cancel_active already vacated the slot and published; a
                // cancelled transfer never triggers an auto-advance.
                self.clear_active_if(&request.id);
                info!("transport confirmed cancellation of {}", request.id);
            }
            TransportOutcome::Failed(message) => {
                // A failure that lost the race with cancel_active stays
                // cancelled; only the slot holder reports and advances.
                if self.clear_active_if(&request.id) {
                    error!("transfer {} failed: {}", request.id, message);
                    self.publish(&request.id, TransferStatus::Failed, 0.0, Some(message));
                    self.advance_queue();
                }
            }
        }
    }

    /// Success path: move the artifact into the content directory, register
    /// it with the ledger and advance the queue.
    fn finish_transfer(
        &self,
        request: TransferRequest,
        media_tmp: PathBuf,
        subtitle_tmp: Option<PathBuf>,
    ) {
        // A cancel may have vacated the slot while the last bytes were in
        // flight; a cancelled transfer produces no artifact.
        if !self.clear_active_if(&request.id) {
            info!("discarding artifact of cancelled transfer {}", request.id);
            let _ = std::fs::remove_file(&media_tmp);
            if let Some(subtitle) = &subtitle_tmp {
                let _ = std::fs::remove_file(subtitle);
            }
            return;
        }

        let downloads_dir = self.inner.ledger.downloads_dir().to_path_buf();
        let media_dest =
            downloads_dir.join(format!("{}.{}", request.id, extension_for(&request.source, "mp4")));

        // A failed move means no artifact, but the queue still advances.
        if let Err(e) = std::fs::rename(&media_tmp, &media_dest) {
            error!("failed to move transfer {} into place: {}", request.id, e);
            let _ = std::fs::remove_file(&media_tmp);
            if let Some(subtitle) = &subtitle_tmp {
                let _ = std::fs::remove_file(subtitle);
            }
            self.publish(
                &request.id,
                TransferStatus::Failed,
                0.0,
                Some(format!("move failed: {e}")),
            );
            self.advance_queue();
            return;
        }

        let subtitle_path = subtitle_tmp.and_then(|tmp| {
            let ext = request
                .subtitle_source
                .as_deref()
                .map(|source| extension_for(source, "srt"))
                .unwrap_or_else(|| "srt".to_string());
            // Namespaced so a subtitle can never collide with the media
            // artifact when both resolve to the same extension.
            let dest = downloads_dir.join(format!("{}.sub.{}", request.id, ext));
            match std::fs::rename(&tmp, &dest) {
                Ok(()) => Some(dest),
                Err(e) => {
                    warn!("failed to move subtitle for {}: {}", request.id, e);
                    let _ = std::fs::remove_file(&tmp);
                    None
                }
            }
        });

        let asset = DownloadedAsset {
            id: request.id.clone(),
            name: request.title.clone(),
            completed_at: Utc::now(),
            origin: request.source.clone(),
            local_path: media_dest,
            kind: request.kind,
            meta: request.meta.clone(),
            subtitle_source: request.subtitle_source.clone(),
            subtitle_path,
        };

        self.inner.state.lock().completed.push(asset.clone());
        if let Err(e) = self.inner.ledger.upsert(asset) {
            warn!("failed to persist ledger entry {}: {}", request.id, e);
        }

        info!("transfer {} completed", request.id);
        self.publish(&request.id, TransferStatus::Completed, 1.0, None);
        self.advance_queue();
    }

    fn clear_active_if(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        if state.active.as_ref().is_some_and(|a| a.request.id == id) {
            state.active = None;
            true
        } else {
            false
        }
    }

    fn partial_dir(&self) -> PathBuf {
        self.inner.ledger.downloads_dir().join(".partial")
    }

    fn publish(&self, id: &str, status: TransferStatus, progress: f64, error: Option<String>) {
        let _ = self.events_tx.send(TransferUpdate {
            id: id.to_string(),
            status,
            progress,
            error,
        });
    }
}

/// Best-effort removal; assets may be plain files or directories, and a
/// missing path is not an error.
fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove {}: {}", path.display(), e);
        }
    }
}

/// File extension taken from the locator's path, lowercased, with a
/// fallback for extension-less or unparsable locators.
fn extension_for(source: &str, fallback: &str) -> String {
    url::Url::parse(source)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.last().map(str::to_owned))
        })
        .and_then(|last| last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| fallback.to_string())
}
