//! Gateway used while no cloud relay is connected
//!
//! Forwards and emissions are logged and dropped; sync uploads report the
//! uplink unavailable so the controller keeps retrying under its backoff
//! policy until a relay is wired in.

use reflex_controller::{Gateway, GatewayError, SyncRequest};
use reflex_core::{DegradedChange, DeviceAddress, Emission, Message, REFLEX_PROTOCOL_VERSION};
use tracing::debug;

/// Stand-in gateway for a hub with no configured uplink
pub struct LoggingGateway;

impl LoggingGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Gateway for LoggingGateway {
    fn forward(&self, message: &Message) {
        debug!(address = %message.address(), "No uplink, dropping forwarded message");
    }

    fn emit(&self, emission: Emission) {
        debug!(
            address = %emission.address,
            attributes = emission.attributes.len(),
            version = REFLEX_PROTOCOL_VERSION,
            "No uplink, dropping emission"
        );
    }

    fn respond(
        &self,
        address: &DeviceAddress,
        correlation_id: Option<&str>,
        _body: serde_json::Value,
    ) {
        debug!(
            address = %address,
            correlation_id = correlation_id.unwrap_or("-"),
            "No uplink, dropping response"
        );
    }

    fn send_sync(&self, _request: SyncRequest) -> Result<(), GatewayError> {
        Err(GatewayError::Unavailable("no cloud relay configured".to_string()))
    }

    fn broadcast_degraded(&self, changes: &[DegradedChange]) {
        debug!(changed = changes.len(), "No uplink, dropping degraded broadcast");
    }
}
