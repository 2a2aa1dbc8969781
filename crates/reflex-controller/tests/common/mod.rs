//! Shared mocks and fixtures for controller integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reflex_controller::{
    wire, Controller, ControllerConfig, Gateway, GatewayError, ProtocolStack, SyncRequest,
};
use reflex_core::{DegradedChange, DeviceAddress, Emission, LifecycleState, Message};
use reflex_driver::{
    Action, DriverCache, DriverDefinition, Matcher, ReflexRule,
};
use reflex_store::StateStore;

/// Gateway that records every outbound interaction
#[derive(Default)]
pub struct MockGateway {
    pub forwarded: Mutex<Vec<Message>>,
    pub emissions: Mutex<Vec<Emission>>,
    pub responses: Mutex<Vec<(DeviceAddress, Option<String>, serde_json::Value)>>,
    pub sync_requests: Mutex<Vec<SyncRequest>>,
    pub degraded_broadcasts: Mutex<Vec<Vec<DegradedChange>>>,
    pub fail_sync: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn forwarded_count(&self) -> usize {
        self.forwarded.lock().unwrap().len()
    }

    pub fn last_sync_token(&self) -> Option<String> {
        self.sync_requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.correlation_id.clone())
    }

    /// Values of the given emitted attribute, in emission order
    pub fn emitted_values(&self, attribute: &str) -> Vec<String> {
        self.emissions
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.attributes.get(attribute))
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    }
}

impl Gateway for MockGateway {
    fn forward(&self, message: &Message) {
        self.forwarded.lock().unwrap().push(message.clone());
    }

    fn emit(&self, emission: Emission) {
        self.emissions.lock().unwrap().push(emission);
    }

    fn respond(
        &self,
        address: &DeviceAddress,
        correlation_id: Option<&str>,
        body: serde_json::Value,
    ) {
        self.responses.lock().unwrap().push((
            address.clone(),
            correlation_id.map(String::from),
            body,
        ));
    }

    fn send_sync(&self, request: SyncRequest) -> Result<(), GatewayError> {
        self.sync_requests.lock().unwrap().push(request);
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock uplink down".to_string()));
        }
        Ok(())
    }

    fn broadcast_degraded(&self, changes: &[DegradedChange]) {
        self.degraded_broadcasts
            .lock()
            .unwrap()
            .push(changes.to_vec());
    }
}

/// Protocol stack that records sends and timeout hints
pub struct MockStack {
    protocol: String,
    pub devices: Mutex<Vec<DeviceAddress>>,
    pub offline_timeouts: Mutex<Vec<(DeviceAddress, Duration)>>,
    pub sent: Mutex<Vec<(DeviceAddress, serde_json::Value)>>,
}

impl MockStack {
    pub fn new(protocol: &str, devices: Vec<DeviceAddress>) -> Arc<Self> {
        Arc::new(Self {
            protocol: protocol.to_string(),
            devices: Mutex::new(devices),
            offline_timeouts: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        })
    }
}

impl ProtocolStack for MockStack {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn devices(&self) -> Vec<DeviceAddress> {
        self.devices.lock().unwrap().clone()
    }

    fn set_offline_timeout(&self, address: &DeviceAddress, timeout: Duration) {
        self.offline_timeouts
            .lock()
            .unwrap()
            .push((address.clone(), timeout));
    }

    fn send(&self, address: &DeviceAddress, payload: serde_json::Value) {
        self.sent.lock().unwrap().push((address.clone(), payload));
    }
}

pub fn addr(id: &str) -> DeviceAddress {
    DeviceAddress::new("zigbee", id).unwrap()
}

/// Controller over an in-memory store, directly driven via `process`
pub fn controller(
    gateway: Arc<MockGateway>,
    stacks: Vec<Arc<MockStack>>,
) -> Controller {
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    controller_with_store(gateway, stacks, store)
}

pub fn controller_with_store(
    gateway: Arc<MockGateway>,
    stacks: Vec<Arc<MockStack>>,
    store: Arc<StateStore>,
) -> Controller {
    let config = ControllerConfig {
        pin_salt: "place-salt".to_string(),
        ..ControllerConfig::default()
    };
    let stacks = stacks
        .into_iter()
        .map(|s| s as Arc<dyn ProtocolStack>)
        .collect();
    Controller::new(
        config,
        store,
        Arc::new(DriverCache::new()),
        gateway,
        stacks,
    )
}

/// A driver that announces every lifecycle event as an emitted attribute and
/// answers `switch:on` commands
pub fn switch_definition(hash: &str) -> DriverDefinition {
    let announce = |event: LifecycleState| ReflexRule {
        matchers: vec![Matcher::Lifecycle { event }],
        actions: vec![Action::EmitAttribute {
            attribute: "lifecycle".to_string(),
            value: serde_json::json!(event.as_str()),
        }],
    };

    DriverDefinition {
        name: "smart-switch".to_string(),
        version: "1.0.0".to_string(),
        hash: hash.to_string(),
        capabilities: vec![],
        reflexes: vec![
            announce(LifecycleState::Added),
            announce(LifecycleState::Connected),
            announce(LifecycleState::Disconnected),
            announce(LifecycleState::Removed),
            ReflexRule {
                matchers: vec![Matcher::Command {
                    capability: "switch".to_string(),
                    name: "on".to_string(),
                }],
                actions: vec![
                    Action::SetAttribute {
                        attribute: "switch".to_string(),
                        value: serde_json::json!("on"),
                    },
                    Action::Respond {
                        body: serde_json::json!({"ok": true}),
                    },
                ],
            },
        ],
        automaton: None,
        offline_timeout_secs: Some(300),
    }
}

/// A definition whose reflex set is one inert action (built-in fast path)
pub fn builtin_definition(version: &str) -> DriverDefinition {
    DriverDefinition {
        name: "presence-sensor".to_string(),
        version: version.to_string(),
        hash: format!("builtin-{version}"),
        capabilities: vec![],
        reflexes: vec![ReflexRule {
            matchers: vec![],
            actions: vec![Action::Noop],
        }],
        automaton: None,
        offline_timeout_secs: Some(60),
    }
}

/// A definition with no reflexes at all
pub fn empty_definition() -> DriverDefinition {
    DriverDefinition {
        name: "inert".to_string(),
        version: "1.0.0".to_string(),
        hash: "empty".to_string(),
        capabilities: vec![],
        reflexes: vec![],
        automaton: None,
        offline_timeout_secs: None,
    }
}

/// A definition whose automaton fails validation, so compilation fails and
/// its processor comes up degraded
pub fn broken_definition() -> DriverDefinition {
    DriverDefinition {
        name: "broken".to_string(),
        version: "1.0.0".to_string(),
        hash: "broken".to_string(),
        capabilities: vec![],
        reflexes: vec![],
        automaton: Some(reflex_driver::DecisionAutomaton {
            matchers: vec![],
            actions: vec![],
            rows: vec![reflex_driver::DecisionRow {
                matchers: vec![42],
                actions: vec![],
            }],
        }),
        offline_timeout_secs: None,
    }
}

/// Encode a catalog the way the cloud does
pub fn encode_catalog(catalog: &[DriverDefinition]) -> String {
    wire::encode_payload(&catalog.to_vec()).unwrap()
}

pub fn row(address: &DeviceAddress, definition: &DriverDefinition) -> wire::DeviceRow {
    wire::DeviceRow {
        address: address.clone(),
        driver_name: definition.name.clone(),
        driver_version: definition.version.clone(),
    }
}
