//! Byte transport for a single transfer

use crate::transfer::types::TransferRequest;
use anyhow::Result;
use futures_util::StreamExt;
use reqwest::header::{HeaderName, HeaderValue};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// How a transport run ended. The manager turns this into a terminal
/// transfer status.
#[derive(Debug)]
pub(crate) enum TransportOutcome {
    /// Media (and possibly subtitle) bytes landed in temporary files.
    Done {
        media: PathBuf,
        subtitle: Option<PathBuf>,
    },
    /// Aborted on request; partial output has been discarded.
    Cancelled,
    /// Transport-level failure; partial output has been discarded.
    Failed(String),
}

/// Stream a transfer's media (and optional subtitle) into temporary files
/// under `partial_dir`.
///
/// Cancellation arrives on `cancel_rx` (a dropped sender counts as cancel);
/// pausing is a level on `pause_rx` and suspends reading until cleared.
/// `on_progress` is invoked with (bytes written, expected total) at most
/// every ~100ms.
pub(crate) async fn run_transfer(
    client: &reqwest::Client,
    request: &TransferRequest,
    partial_dir: &Path,
    mut cancel_rx: mpsc::Receiver<()>,
    mut pause_rx: watch::Receiver<bool>,
    mut on_progress: impl FnMut(u64, Option<u64>),
) -> TransportOutcome {
    info!("starting transfer {}: {}", request.id, request.source);

    if let Err(e) = tokio::fs::create_dir_all(partial_dir).await {
        return TransportOutcome::Failed(format!("cannot create partial dir: {e}"));
    }
    let media_path = partial_dir.join(format!("{}.part", request.id));

    let response = match send_request(client, request).await {
        Ok(response) => response,
        Err(e) => return TransportOutcome::Failed(e.to_string()),
    };
    let expected = response.content_length();

    let mut file = match File::create(&media_path).await {
        Ok(file) => file,
        Err(e) => return TransportOutcome::Failed(format!("cannot create output file: {e}")),
    };

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    let mut last_tick = Instant::now();

    loop {
        // Suspended: wait for the pause level to clear, still honoring
        // cancellation.
        if *pause_rx.borrow() {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    return cancelled(file, &media_path).await;
                }
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        // Controls gone: the manager dropped this transfer.
                        return cancelled(file, &media_path).await;
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            _ = cancel_rx.recv() => {
                return cancelled(file, &media_path).await;
            }

            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(e) = file.write_all(&bytes).await {
                            let _ = tokio::fs::remove_file(&media_path).await;
                            return TransportOutcome::Failed(format!("write error: {e}"));
                        }
                        written += bytes.len() as u64;

                        if last_tick.elapsed().as_millis() >= 100 {
                            on_progress(written, expected);
                            last_tick = Instant::now();
                        }
                    }
                    Some(Err(e)) => {
                        drop(file);
                        let _ = tokio::fs::remove_file(&media_path).await;
                        return TransportOutcome::Failed(format!("transfer error: {e}"));
                    }
                    None => break,
                }
            }
        }
    }

    if let Err(e) = file.flush().await {
        let _ = tokio::fs::remove_file(&media_path).await;
        return TransportOutcome::Failed(format!("flush error: {e}"));
    }
    on_progress(written, expected);

    // Subtitles are best-effort: a failure degrades to an asset without a
    // local subtitle, never a failed transfer.
    let subtitle = match &request.subtitle_source {
        Some(source) => match fetch_subtitle(client, request, source, partial_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("subtitle fetch failed for {}: {}", request.id, e);
                None
            }
        },
        None => None,
    };

    info!("transfer {} fetched {} bytes", request.id, written);
    TransportOutcome::Done {
        media: media_path,
        subtitle,
    }
}

async fn send_request(
    client: &reqwest::Client,
    request: &TransferRequest,
) -> Result<reqwest::Response> {
    let mut builder = client.get(&request.source);
    for (key, value) in &request.headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => warn!("skipping malformed header {key:?}"),
        }
    }

    let response = builder.send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP error: {}", response.status());
    }
    Ok(response)
}

async fn fetch_subtitle(
    client: &reqwest::Client,
    request: &TransferRequest,
    source: &str,
    partial_dir: &Path,
) -> Result<PathBuf> {
    let response = client.get(source).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP error: {}", response.status());
    }

    let bytes = response.bytes().await?;
    let path = partial_dir.join(format!("{}.sub.part", request.id));
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

async fn cancelled(file: File, media_path: &Path) -> TransportOutcome {
    drop(file);
    let _ = tokio::fs::remove_file(media_path).await;
    TransportOutcome::Cancelled
}
