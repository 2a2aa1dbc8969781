//! Per-device processor
//!
//! One processor exists per device address at a time. It owns the device's
//! execution context and compiled driver binding, and exposes the lifecycle
//! state machine:
//!
//! ```text
//! Initial → Added → Connected ⇄ Disconnected
//!
//! any state → Removed (terminal)
//! ```
//!
//! Entry callbacks evaluate the driver against a synthetic lifecycle message;
//! after every entered transition the new state label is persisted, so a
//! crash mid-transition resumes in the last *entered* state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use reflex_core::{DeviceAddress, LifecycleState, PlatformMessage, ProtocolMessage};
use reflex_driver::{CompiledDriver, DriverKey};
use reflex_store::{DeviceTable, StateStore};
use tracing::{debug, trace, warn};

use crate::context::ExecutionContext;

/// Everything a processor staged while handling one message or transition
#[derive(Debug, Default)]
pub struct HandleResult {
    /// Whether any rule matched
    pub handled: bool,

    /// Staged reply for the message being processed
    pub response: Option<serde_json::Value>,

    /// Attribute writes a rule declared authoritatively handled
    pub consumed: HashSet<String>,

    /// Attributes staged for outward broadcast
    pub emissions: HashMap<String, serde_json::Value>,

    /// Raw payloads to send through the device's protocol stack
    pub sends: Vec<serde_json::Value>,
}

/// Runtime unit for one device: lifecycle state plus driver binding
pub struct Processor {
    address: DeviceAddress,
    driver: Option<Arc<CompiledDriver>>,
    state: LifecycleState,
    ctx: ExecutionContext,
    store: Arc<StateStore>,
}

impl Processor {
    /// Create a processor in the `Initial` state
    ///
    /// `driver` is `None` when compilation failed upstream; such a processor
    /// is degraded and handles nothing, but still tracks lifecycle state.
    pub fn new(
        address: DeviceAddress,
        driver: Option<Arc<CompiledDriver>>,
        store: Arc<StateStore>,
        seed: HashMap<String, serde_json::Value>,
    ) -> Self {
        let ctx = ExecutionContext::new(address.clone(), store.clone(), seed);
        Self {
            address,
            driver,
            state: LifecycleState::Initial,
            ctx,
            store,
        }
    }

    /// The device this processor runs
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Current lifecycle state
    pub fn current_state(&self) -> LifecycleState {
        self.state
    }

    /// A processor with no usable driver is degraded
    pub fn degraded(&self) -> bool {
        self.driver.is_none()
    }

    /// The bound compiled driver, if any
    pub fn driver(&self) -> Option<&Arc<CompiledDriver>> {
        self.driver.as_ref()
    }

    /// Cache identity of the bound driver
    pub fn driver_key(&self) -> Option<DriverKey> {
        self.driver.as_ref().map(|d| d.key())
    }

    /// Whether the bound driver is the built-in fast path
    pub fn is_builtin(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| d.is_builtin())
    }

    /// Offline-timeout hint declared by the driver
    pub fn offline_timeout(&self) -> Option<Duration> {
        self.driver.as_ref().and_then(|d| d.offline_timeout())
    }

    /// The device's execution context
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Start the processor in its last known lifecycle state
    ///
    /// A first start (resume from `Initial`) runs the "added" callback;
    /// resuming any other state restores it without firing callbacks.
    pub fn start(&mut self, resume: LifecycleState) -> HandleResult {
        if resume == LifecycleState::Initial {
            self.set_current_state(LifecycleState::Added)
        } else {
            debug!(address = %self.address, state = %resume, "Resuming processor");
            self.state = resume;
            self.persist_state_label();
            HandleResult::default()
        }
    }

    /// Transition to a new lifecycle state
    ///
    /// Re-entering the current state fires no callback and performs only the
    /// redundant state write. Transitions on a removed processor are ignored.
    pub fn set_current_state(&mut self, to: LifecycleState) -> HandleResult {
        if self.state.is_terminal() {
            trace!(address = %self.address, to = %to, "Ignoring transition on removed processor");
            return HandleResult::default();
        }

        if self.state == to {
            self.persist_state_label();
            return HandleResult::default();
        }

        let from = self.state;
        self.state = to;
        debug!(address = %self.address, from = %from, to = %to, "Lifecycle transition");

        let callback = match to {
            LifecycleState::Added => {
                (from == LifecycleState::Initial).then_some(LifecycleState::Added)
            }
            LifecycleState::Connected => Some(LifecycleState::Connected),
            LifecycleState::Disconnected => {
                (from == LifecycleState::Connected).then_some(LifecycleState::Disconnected)
            }
            LifecycleState::Removed => Some(LifecycleState::Removed),
            LifecycleState::Initial => None,
        };

        let result = match callback {
            Some(event) => {
                let message = PlatformMessage::lifecycle(self.address.clone(), event);
                self.handle_platform(&message)
            }
            None => HandleResult::default(),
        };

        // Persisted after the callback so a crash resumes in the entered state
        self.persist_state_label();
        result
    }

    /// Tear the processor down; terminal
    pub fn shutdown(&mut self) -> HandleResult {
        self.set_current_state(LifecycleState::Removed)
    }

    /// Offer a platform message to the driver
    ///
    /// Consumed-writes, response, emissions and sends are drained into the
    /// result and the context is reset regardless of the match outcome.
    pub fn handle_platform(&mut self, message: &PlatformMessage) -> HandleResult {
        let handled = match &self.driver {
            Some(driver) => match driver.evaluate_platform(message, &mut self.ctx) {
                Ok(handled) => handled,
                Err(e) => {
                    warn!(
                        address = %self.address,
                        error = %e,
                        "Rule evaluation failed, treating message as unhandled"
                    );
                    false
                }
            },
            None => false,
        };
        self.finish(handled)
    }

    /// Offer a protocol message to the driver
    pub fn handle_protocol(&mut self, message: &ProtocolMessage) -> HandleResult {
        let handled = match &self.driver {
            Some(driver) => match driver.evaluate_protocol(message, &mut self.ctx) {
                Ok(handled) => handled,
                Err(e) => {
                    warn!(
                        address = %self.address,
                        error = %e,
                        "Rule evaluation failed, treating message as unhandled"
                    );
                    false
                }
            },
            None => false,
        };
        self.finish(handled)
    }

    fn finish(&mut self, handled: bool) -> HandleResult {
        self.ctx.commit();
        let result = HandleResult {
            handled,
            response: self.ctx.drain_response(),
            consumed: self.ctx.drain_consumed_set_attributes(),
            emissions: self.ctx.drain_emits(),
            sends: self.ctx.drain_sends(),
        };
        self.ctx.reset();
        result
    }

    fn persist_state_label(&self) {
        if let Err(e) = self.store.put_all(
            DeviceTable::Reflexes,
            &self.address,
            [("state", self.state.as_str())],
        ) {
            warn!(
                address = %self.address,
                state = %self.state,
                error = %e,
                "Failed to persist lifecycle state"
            );
        }
    }
}
