//! Sequential transfer queue and durable asset ledger

mod ledger;
mod manager;
mod task;
mod types;

pub use ledger::AssetLedger;
pub use manager::TransferManager;
pub use types::{
    DownloadedAsset, TransferMeta, TransferRequest, TransferSnapshot, TransferSpec, TransferStats,
    TransferStatus, TransferUpdate,
};
