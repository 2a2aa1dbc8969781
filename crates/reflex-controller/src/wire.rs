//! Cloud sync wire format
//!
//! Device lists and the driver catalog travel as UTF-8 JSON, gzip-compressed
//! and base64-encoded. Pin maps travel as plain JSON objects of UUID-string
//! to digest-string, uncompressed.

use std::collections::HashMap;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use reflex_core::DeviceAddress;

use crate::{ControllerError, ControllerResult};

/// One device's row in the sync upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDigest {
    /// Address string (`protocol:device_id`)
    pub address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_hash: Option<String>,

    /// Lifecycle state label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Committed attribute snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,
}

impl DeviceDigest {
    /// A device with no processor is reported bare
    pub fn bare(address: String) -> Self {
        Self {
            address,
            driver_name: None,
            driver_version: None,
            driver_hash: None,
            state: None,
            attributes: None,
            degraded: None,
        }
    }
}

/// Sync upload carrying the encoded device digest list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Single-use sync token; responses echo it
    pub correlation_id: String,

    /// Encoded [`DeviceDigest`] list
    pub devices: String,
}

/// One device row in the pushed cloud state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub address: DeviceAddress,
    pub driver_name: String,
    pub driver_version: String,
}

/// The cloud's authoritative answer to a sync upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Echo of the upload's sync token
    pub correlation_id: String,

    /// Per-device driver assignments
    #[serde(default)]
    pub devices: Vec<DeviceRow>,

    /// Encoded driver catalog (list of definitions)
    pub catalog: String,

    /// User-id → pin digest map, uncompressed
    #[serde(default)]
    pub pins: HashMap<String, String>,
}

/// Serialize, gzip, and base64-encode a value
pub fn encode_payload<T: Serialize>(value: &T) -> ControllerResult<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

/// Decode a base64 + gzip payload back into a value
pub fn decode_payload<T: DeserializeOwned>(encoded: &str) -> ControllerResult<T> {
    let compressed = BASE64
        .decode(encoded.trim())
        .map_err(|e| ControllerError::Codec(e.to_string()))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_roundtrip() {
        let digests = vec![
            DeviceDigest::bare("zigbee:d1".to_string()),
            DeviceDigest {
                address: "zwave:7".to_string(),
                driver_name: Some("smart-switch".to_string()),
                driver_version: Some("1.0.0".to_string()),
                driver_hash: Some("h1".to_string()),
                state: Some("connected".to_string()),
                attributes: Some(HashMap::from([("switch".to_string(), json!("on"))])),
                degraded: Some(false),
            },
        ];

        let encoded = encode_payload(&digests).unwrap();
        let decoded: Vec<DeviceDigest> = decode_payload(&encoded).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].address, "zigbee:d1");
        assert!(decoded[0].driver_name.is_none());
        assert_eq!(decoded[1].driver_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload::<Vec<DeviceDigest>>("not base64!").is_err());
        // Valid base64 but not gzip
        let encoded = BASE64.encode(b"plain");
        assert!(decode_payload::<Vec<DeviceDigest>>(&encoded).is_err());
    }

    #[test]
    fn test_bare_digest_serializes_compactly() {
        let digest = DeviceDigest::bare("zigbee:d1".to_string());
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, r#"{"address":"zigbee:d1"}"#);
    }
}
