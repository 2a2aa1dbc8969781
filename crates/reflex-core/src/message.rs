//! Platform and protocol message types
//!
//! Platform messages are structured commands/events keyed by capability and
//! name; protocol messages are raw per-protocol payloads plus the online and
//! offline transport events. Both are addressed to a single device.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{DeviceAddress, LifecycleState, LIFECYCLE_CAPABILITY};

/// A structured platform message addressed to one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMessage {
    /// Unique message id (ULID)
    pub id: String,

    /// The device this message is addressed to
    pub address: DeviceAddress,

    /// Capability namespace (e.g., "switch", "lock", "lifecycle")
    pub capability: String,

    /// Command or event name within the capability (e.g., "on", "set_code")
    pub name: String,

    /// Message arguments / attribute payload
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// Correlation id for request/response exchanges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// When the message was created
    pub sent_at: DateTime<Utc>,
}

impl PlatformMessage {
    /// Create a new platform message with a fresh id
    pub fn new(
        address: DeviceAddress,
        capability: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            address,
            capability: capability.into(),
            name: name.into(),
            attributes: HashMap::new(),
            correlation_id: None,
            sent_at: Utc::now(),
        }
    }

    /// Add an attribute to the message
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set a correlation id for response routing
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Build the synthetic lifecycle message offered to a driver when its
    /// processor enters `state`
    pub fn lifecycle(address: DeviceAddress, state: LifecycleState) -> Self {
        Self::new(address, LIFECYCLE_CAPABILITY, state.as_str())
    }
}

/// Body of a protocol-level message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "payload")]
pub enum ProtocolBody {
    /// Transport reports the device reachable
    Online,
    /// Transport reports the device unreachable
    Offline,
    /// Raw protocol payload
    Data(serde_json::Value),
}

/// A raw protocol message addressed to one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// The device this message concerns
    pub address: DeviceAddress,

    /// Message body
    pub body: ProtocolBody,

    /// When the message was received
    pub received_at: DateTime<Utc>,
}

impl ProtocolMessage {
    /// Create a new protocol message
    pub fn new(address: DeviceAddress, body: ProtocolBody) -> Self {
        Self {
            address,
            body,
            received_at: Utc::now(),
        }
    }

    /// Shorthand for a data-bearing message
    pub fn data(address: DeviceAddress, payload: serde_json::Value) -> Self {
        Self::new(address, ProtocolBody::Data(payload))
    }
}

/// An inbound message offered to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "bus")]
pub enum Message {
    /// Structured platform command/event
    Platform(PlatformMessage),
    /// Raw protocol payload or transport event
    Protocol(ProtocolMessage),
}

impl Message {
    /// The device address the message concerns
    pub fn address(&self) -> &DeviceAddress {
        match self {
            Message::Platform(m) => &m.address,
            Message::Protocol(m) => &m.address,
        }
    }
}

/// An outbound attribute broadcast emitted "from" a device address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emission {
    /// Source device
    pub address: DeviceAddress,

    /// Attribute values being broadcast
    pub attributes: HashMap<String, serde_json::Value>,
}

/// One device's degraded-flag flip, reported in a batched broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedChange {
    /// The device whose flag changed
    pub address: DeviceAddress,

    /// The new flag value
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> DeviceAddress {
        DeviceAddress::new("zigbee", "abc123").unwrap()
    }

    #[test]
    fn test_platform_message_builder() {
        let msg = PlatformMessage::new(addr(), "switch", "on")
            .with_attribute("level", serde_json::json!(80))
            .with_correlation("req-1");

        assert_eq!(msg.capability, "switch");
        assert_eq!(msg.name, "on");
        assert_eq!(msg.attributes["level"], 80);
        assert_eq!(msg.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(msg.id.len(), 26);
    }

    #[test]
    fn test_lifecycle_message() {
        let msg = PlatformMessage::lifecycle(addr(), LifecycleState::Connected);
        assert_eq!(msg.capability, LIFECYCLE_CAPABILITY);
        assert_eq!(msg.name, "connected");
    }

    #[test]
    fn test_protocol_body_serde() {
        let body = ProtocolBody::Data(serde_json::json!({"cluster": "0006"}));
        let json = serde_json::to_string(&body).unwrap();
        let parsed: ProtocolBody = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, body);
    }

    #[test]
    fn test_message_address() {
        let msg = Message::Protocol(ProtocolMessage::new(addr(), ProtocolBody::Online));
        assert_eq!(msg.address(), &addr());
    }
}
