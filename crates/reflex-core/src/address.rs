//! Device address type representing a protocol:device_id pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid device addresses
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceAddressError {
    #[error("device address must contain exactly one ':' separator")]
    InvalidFormat,

    #[error("protocol cannot be empty")]
    EmptyProtocol,

    #[error("device id cannot be empty")]
    EmptyDeviceId,

    #[error("protocol contains invalid characters (must be lowercase alphanumeric with underscores)")]
    InvalidProtocolChars,

    #[error("device id contains invalid characters (must be alphanumeric with '_', '-' or '.')")]
    InvalidDeviceIdChars,
}

/// Stable identifier for a protocol-level device endpoint (e.g., "zigbee:0a1b2c3d")
///
/// Addresses consist of a protocol name and a protocol-specific device id
/// separated by a colon. An address is never reused after a device is removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress {
    protocol: String,
    device_id: String,
}

impl DeviceAddress {
    /// Create a new DeviceAddress from protocol and device id parts
    pub fn new(
        protocol: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Result<Self, DeviceAddressError> {
        let protocol = protocol.into();
        let device_id = device_id.into();

        if protocol.is_empty() {
            return Err(DeviceAddressError::EmptyProtocol);
        }
        if device_id.is_empty() {
            return Err(DeviceAddressError::EmptyDeviceId);
        }
        if !Self::is_valid_protocol(&protocol) {
            return Err(DeviceAddressError::InvalidProtocolChars);
        }
        if !Self::is_valid_device_id(&device_id) {
            return Err(DeviceAddressError::InvalidDeviceIdChars);
        }

        Ok(Self {
            protocol,
            device_id,
        })
    }

    /// Get the protocol part of the address
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Get the device id part of the address
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn is_valid_protocol(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    fn is_valid_device_id(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    }
}

impl FromStr for DeviceAddress {
    type Err = DeviceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(DeviceAddressError::InvalidFormat);
        }
        Self::new(parts[0], parts[1])
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = DeviceAddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(addr: DeviceAddress) -> String {
        addr.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = DeviceAddress::new("zigbee", "0a1b2c3d").unwrap();
        assert_eq!(addr.protocol(), "zigbee");
        assert_eq!(addr.device_id(), "0a1b2c3d");
        assert_eq!(addr.to_string(), "zigbee:0a1b2c3d");
    }

    #[test]
    fn test_parse_address() {
        let addr: DeviceAddress = "zwave:12".parse().unwrap();
        assert_eq!(addr.protocol(), "zwave");
        assert_eq!(addr.device_id(), "12");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "no_separator".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::InvalidFormat
        );
        assert_eq!(
            "too:many:parts".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::InvalidFormat
        );
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            ":device".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::EmptyProtocol
        );
        assert_eq!(
            "zigbee:".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::EmptyDeviceId
        );
    }

    #[test]
    fn test_invalid_chars() {
        assert_eq!(
            "ZigBee:abc".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::InvalidProtocolChars
        );
        assert_eq!(
            "zigbee:bad id".parse::<DeviceAddress>().unwrap_err(),
            DeviceAddressError::InvalidDeviceIdChars
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let addr = DeviceAddress::new("zwave", "7").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"zwave:7\"");

        let parsed: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);
    }
}
