//! Reflex controller for the hub
//!
//! The controller owns every per-device processor and coordinates them under
//! a single-writer mailbox: inbound platform/protocol dispatch, a timer
//! wheel with one-shot/periodic/backoff scheduling, pin authorization, and
//! the cloud catalog sync protocol.

mod config;
mod controller;
mod pins;
mod scheduler;
mod sync;
mod traits;
pub mod wire;

use thiserror::Error;

pub use config::ControllerConfig;
pub use controller::{
    Command, Controller, ControllerHandle, HUB_CAPABILITY, MSG_AUTHORIZED, MSG_DEVICE_ADDED,
    MSG_DEVICE_REMOVED, MSG_FORCE_REMOVE, MSG_SYNC_NEEDED,
};
pub use pins::{pin_digest, PinIndex};
pub use scheduler::{BackoffPolicy, Schedule, TaskOutcome, TimerId};
pub use sync::{SyncReason, CONFIG_CATALOG, CONFIG_PINS};
pub use traits::{Gateway, GatewayError, ProtocolStack};
pub use wire::{DeviceDigest, DeviceRow, SyncRequest, SyncResponse};

/// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] reflex_store::StoreError),
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;
