//! Per-device execution context
//!
//! Holds one device's committed attribute state plus everything staged while
//! a message is being processed: attribute emissions, persistence writes,
//! scratch variables, consumed attribute writes, outbound protocol sends,
//! and the single pending command response. `reset` runs once per inbound
//! message regardless of outcome, so no staged state leaks between messages.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reflex_core::DeviceAddress;
use reflex_driver::RuleContext;
use reflex_store::{DeviceTable, StateStore};
use tracing::{trace, warn};

/// Mutable evaluation state for one device
pub struct ExecutionContext {
    address: DeviceAddress,
    store: Arc<StateStore>,

    committed: HashMap<String, serde_json::Value>,
    pending_emit: HashMap<String, serde_json::Value>,
    pending_persist: HashMap<String, serde_json::Value>,
    scratch: HashMap<String, serde_json::Value>,
    consumed: HashSet<String>,
    response: Option<serde_json::Value>,
    sends: Vec<serde_json::Value>,
    handled: bool,
}

impl ExecutionContext {
    /// Create a context seeded with persisted attribute state
    pub fn new(
        address: DeviceAddress,
        store: Arc<StateStore>,
        seed: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            address,
            store,
            committed: seed,
            pending_emit: HashMap::new(),
            pending_persist: HashMap::new(),
            scratch: HashMap::new(),
            consumed: HashSet::new(),
            response: None,
            sends: Vec::new(),
            handled: false,
        }
    }

    /// The device this context belongs to
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Snapshot of committed attribute state
    pub fn committed(&self) -> &HashMap<String, serde_json::Value> {
        &self.committed
    }

    /// Set a transient scratch variable (cleared on reset)
    pub fn set_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.insert(key.into(), value);
    }

    /// Read a scratch variable
    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.scratch.get(key)
    }

    /// Stage several attributes for outward broadcast
    pub fn emit_attributes<I>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        self.pending_emit.extend(attributes);
    }

    /// Whether a rule matched the message currently being processed
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Drain the consumed-write set (empties on read)
    pub fn drain_consumed_set_attributes(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.consumed)
    }

    /// Drain the staged response (empties on read)
    pub fn drain_response(&mut self) -> Option<serde_json::Value> {
        self.response.take()
    }

    /// Drain staged emissions
    pub fn drain_emits(&mut self) -> HashMap<String, serde_json::Value> {
        std::mem::take(&mut self.pending_emit)
    }

    /// Drain staged outbound protocol sends
    pub fn drain_sends(&mut self) -> Vec<serde_json::Value> {
        std::mem::take(&mut self.sends)
    }

    /// Flush the pending-persist map to the store; no-op when empty
    ///
    /// A failed write is logged and kept staged — the in-memory state stands
    /// and the next commit retries the rows.
    pub fn commit(&mut self) {
        if self.pending_persist.is_empty() {
            return;
        }

        let rows: Vec<(String, String)> = self
            .pending_persist
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();

        match self
            .store
            .put_all(DeviceTable::Drivers, &self.address, rows)
        {
            Ok(()) => {
                trace!(
                    address = %self.address,
                    rows = self.pending_persist.len(),
                    "Committed attribute state"
                );
                self.pending_persist.clear();
            }
            Err(e) => {
                warn!(
                    address = %self.address,
                    error = %e,
                    "Failed to persist attribute state, keeping in-memory view"
                );
            }
        }
    }

    /// Clear per-message staging: emissions, scratch variables, handled flag
    pub fn reset(&mut self) {
        self.pending_emit.clear();
        self.scratch.clear();
        self.handled = false;
    }
}

impl RuleContext for ExecutionContext {
    fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.committed.get(key)
    }

    fn set_attribute(&mut self, key: &str, value: serde_json::Value) {
        let changed = self.committed.get(key) != Some(&value);
        if changed {
            self.pending_persist.insert(key.to_string(), value.clone());
            self.committed.insert(key.to_string(), value);
        }
    }

    fn emit_attribute(&mut self, key: &str, value: serde_json::Value) {
        self.pending_emit.insert(key.to_string(), value);
    }

    fn set_response(&mut self, body: serde_json::Value) {
        self.response = Some(body);
    }

    fn stage_send(&mut self, payload: serde_json::Value) {
        self.sends.push(payload);
    }

    fn mark_set_attribute_consumed(&mut self, key: &str) {
        self.consumed.insert(key.to_string());
    }

    fn mark_handled(&mut self) {
        self.handled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let address = DeviceAddress::new("zigbee", "d1").unwrap();
        ExecutionContext::new(address, store, HashMap::new())
    }

    #[test]
    fn test_set_attribute_stages_persist_on_change_only() {
        let mut ctx = ctx();

        ctx.set_attribute("switch", json!("on"));
        ctx.commit();
        assert_eq!(
            ctx.store
                .get(DeviceTable::Drivers, &ctx.address, "switch")
                .unwrap()
                .as_deref(),
            Some("\"on\"")
        );

        // Unchanged write stages nothing new
        ctx.set_attribute("switch", json!("on"));
        assert!(ctx.pending_persist.is_empty());
    }

    #[test]
    fn test_commit_noop_when_empty() {
        let mut ctx = ctx();
        ctx.commit();
        assert!(ctx
            .store
            .load_all(DeviceTable::Drivers)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_emit_without_commit_does_not_change_state() {
        let mut ctx = ctx();
        ctx.emit_attribute("alert", json!("tamper"));

        assert!(ctx.attribute("alert").is_none());
        assert_eq!(ctx.drain_emits()["alert"], "tamper");
    }

    #[test]
    fn test_consumed_drains_to_empty() {
        let mut ctx = ctx();
        ctx.mark_set_attribute_consumed("switch");

        let drained = ctx.drain_consumed_set_attributes();
        assert!(drained.contains("switch"));
        assert!(ctx.drain_consumed_set_attributes().is_empty());
    }

    #[test]
    fn test_response_drains_to_empty() {
        let mut ctx = ctx();
        ctx.set_response(json!({"ok": true}));

        assert_eq!(ctx.drain_response(), Some(json!({"ok": true})));
        assert!(ctx.drain_response().is_none());
    }

    #[test]
    fn test_reset_clears_staging() {
        let mut ctx = ctx();
        ctx.emit_attribute("alert", json!("tamper"));
        ctx.set_variable("tmp", json!(1));
        ctx.mark_handled();

        ctx.reset();

        assert!(ctx.drain_emits().is_empty());
        assert!(ctx.variable("tmp").is_none());
        assert!(!ctx.is_handled());
    }

    #[test]
    fn test_seeded_state_visible() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let address = DeviceAddress::new("zigbee", "d1").unwrap();
        let mut seed = HashMap::new();
        seed.insert("level".to_string(), json!(40));

        let ctx = ExecutionContext::new(address, store, seed);
        assert_eq!(ctx.attribute("level"), Some(&json!(40)));
    }
}
