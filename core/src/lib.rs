//! Couchlog core - playback progress tracking and a resumable media transfer queue
//!
//! This crate is the headless core of a media-consumption app. It owns two
//! durable subsystems consumed by a UI layer:
//!
//! - [`progress::ProgressStore`]: a concurrently-accessed table of per-title
//!   playback progress with debounced crash-tolerant persistence.
//! - [`transfer::TransferManager`]: a FIFO queue of large binary transfers
//!   (media plus optional subtitles) executed one at a time, with pause,
//!   resume and cancel, handing completed artifacts to the
//!   [`transfer::AssetLedger`].
//!
//! Both components are explicitly constructed with their storage locations,
//! so embedding applications (and tests) control where state lives.

pub mod config;
pub mod error;
pub mod logging;
pub mod progress;
pub mod storage;
pub mod transfer;

pub use config::Settings;
pub use error::Error;
pub use progress::{DisplayHints, MediaId, MediaKind, ProgressStore, ProgressTable};
pub use transfer::{AssetLedger, DownloadedAsset, TransferManager, TransferSpec, TransferStatus};
