//! External collaborator seams
//!
//! The controller talks to the radio stacks and the upstream gateway only
//! through these traits. Implementations must never mutate controller state;
//! they either perform I/O or enqueue work back onto the controller mailbox.

use std::time::Duration;

use reflex_core::{DegradedChange, DeviceAddress, Emission, Message};
use thiserror::Error;

use crate::wire::SyncRequest;

/// Gateway send errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("uplink unavailable: {0}")]
    Unavailable(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One radio protocol stack (Zigbee, Z-Wave, ...)
pub trait ProtocolStack: Send + Sync {
    /// Protocol name matching [`DeviceAddress::protocol`]
    fn protocol(&self) -> &str;

    /// Every device currently known to this stack
    fn devices(&self) -> Vec<DeviceAddress>;

    /// Push a driver's offline-timeout hint for one device
    fn set_offline_timeout(&self, address: &DeviceAddress, timeout: Duration);

    /// Send a raw payload to one device
    fn send(&self, address: &DeviceAddress, payload: serde_json::Value);
}

/// The upstream gateway / cloud relay
///
/// Emissions are expected to be wrapped "from" the device address "to" a
/// broadcast destination and tagged with
/// [`reflex_core::REFLEX_PROTOCOL_VERSION`] by the implementation.
pub trait Gateway: Send + Sync {
    /// Forward a message the local engine did not handle
    fn forward(&self, message: &Message);

    /// Broadcast staged attribute changes for one device
    fn emit(&self, emission: Emission);

    /// Deliver a command response for the message being processed
    fn respond(
        &self,
        address: &DeviceAddress,
        correlation_id: Option<&str>,
        body: serde_json::Value,
    );

    /// Send a sync upload to the cloud
    fn send_sync(&self, request: SyncRequest) -> Result<(), GatewayError>;

    /// Broadcast the batched degraded-flag changes
    fn broadcast_degraded(&self, changes: &[DegradedChange]);
}
