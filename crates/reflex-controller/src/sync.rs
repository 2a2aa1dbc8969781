//! Cloud sync protocol and catalog reconciliation
//!
//! A sync cycle uploads a digest of local device/driver state under a fresh
//! single-use token, then applies the cloud's authoritative driver catalog,
//! device assignments, and pin map. Responses carrying a different token are
//! stale and discarded without mutating anything. Failures before the upload
//! retry under the backoff policy; failures while applying a response wait
//! for the next trigger.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use reflex_core::{DegradedChange, DeviceAddress, LifecycleState};
use reflex_driver::DriverDefinition;
use reflex_engine::Processor;
use reflex_store::DeviceTable;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::controller::Controller;
use crate::pins::PinIndex;
use crate::scheduler::{Schedule, TaskOutcome};
use crate::wire::{self, DeviceDigest, DeviceRow, SyncRequest, SyncResponse};
use crate::ControllerResult;

/// Config key holding the persisted (still encoded) driver catalog
pub const CONFIG_CATALOG: &str = "driver_catalog";

/// Config key holding the persisted pin map
pub const CONFIG_PINS: &str = "pins";

/// What triggered a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// The hub became authorized against the cloud
    Authorized,
    /// A new device was acknowledged
    DeviceAcknowledged,
    /// Explicit sync-needed signal (or a scheduled retry)
    Requested,
}

impl Controller {
    /// Rebuild processors and the pin index from persisted state
    ///
    /// Runs once at startup; a missing or unreadable catalog degrades to "no
    /// local automation until the next sync".
    pub fn restore(&mut self) {
        if let Some(json) = self.store.config_get(CONFIG_PINS) {
            match serde_json::from_str::<HashMap<String, String>>(&json) {
                Ok(map) => self.pins = PinIndex::rebuild(&map),
                Err(e) => warn!(error = %e, "Persisted pin map unreadable, starting empty"),
            }
        }

        let Some(catalog_b64) = self.store.config_get(CONFIG_CATALOG) else {
            debug!("No persisted driver catalog, awaiting first sync");
            return;
        };

        let reflex_rows = self
            .store
            .load_all(DeviceTable::Reflexes)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load persisted reflex state");
                HashMap::new()
            });

        let mut rows = Vec::new();
        for (addr, columns) in &reflex_rows {
            let Ok(address) = addr.parse::<DeviceAddress>() else {
                warn!(address = %addr, "Skipping malformed persisted address");
                continue;
            };
            let (Some(name), Some(version)) =
                (columns.get("driver_name"), columns.get("driver_version"))
            else {
                continue;
            };
            rows.push(DeviceRow {
                address,
                driver_name: name.clone(),
                driver_version: version.clone(),
            });
        }

        let driver_state = self
            .store
            .load_all(DeviceTable::Drivers)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load persisted driver state");
                HashMap::new()
            });

        if let Err(e) = self.apply_catalog(rows, driver_state, &catalog_b64) {
            warn!(error = %e, "Persisted catalog unreadable, awaiting next sync");
        }
    }

    /// Apply a driver catalog onto the processor table
    ///
    /// `per_device_state` assigns a driver to each device, and
    /// `per_device_driver_state` seeds each rebuilt processor's attribute
    /// state. Used both at startup over persisted rows and while applying a
    /// sync response.
    pub fn apply_catalog(
        &mut self,
        per_device_state: Vec<DeviceRow>,
        per_device_driver_state: HashMap<String, HashMap<String, String>>,
        catalog_b64: &str,
    ) -> ControllerResult<()> {
        let catalog: Vec<DriverDefinition> = wire::decode_payload(catalog_b64)?;
        self.reconcile(&per_device_state, &catalog, &per_device_driver_state);
        Ok(())
    }

    pub(crate) fn on_sync_needed(&mut self, reason: SyncReason) {
        debug!(?reason, "Starting sync cycle");
        if let Err(e) = self.begin_sync() {
            warn!(error = %e, "Sync upload failed, scheduling retry");
            self.schedule_sync_retry();
        }
    }

    fn begin_sync(&mut self) -> ControllerResult<()> {
        let token = Uuid::new_v4().to_string();
        self.current_sync = Some(token.clone());

        let digests = self.collect_device_digests();
        let devices = self.encode_digest_list(digests)?;

        self.gateway.send_sync(SyncRequest {
            correlation_id: token,
            devices,
        })?;
        Ok(())
    }

    fn schedule_sync_retry(&mut self) {
        let attempt = self.sync_attempt;
        self.sync_attempt = self.sync_attempt.saturating_add(1);
        let delay = self.config.backoff.delay(attempt);
        debug!(attempt, delay_secs = delay.as_secs(), "Sync retry scheduled");

        self.schedule_internal(None, Schedule::Once(delay), |controller: &mut Controller| {
            controller.on_sync_needed(SyncReason::Requested);
            TaskOutcome::Cancel
        });
    }

    fn collect_device_digests(&self) -> Vec<DeviceDigest> {
        let mut protocols: Vec<&String> = self.stacks.keys().collect();
        protocols.sort();

        let mut digests = Vec::new();
        for protocol in protocols {
            for address in self.stacks[protocol].devices() {
                let digest = match self.processors.get(&address) {
                    Some(processor) => {
                        let key = processor.driver_key();
                        DeviceDigest {
                            address: address.to_string(),
                            driver_name: key.as_ref().map(|k| k.name.clone()),
                            driver_version: key.as_ref().map(|k| k.version.clone()),
                            driver_hash: key.map(|k| k.hash),
                            state: Some(processor.current_state().to_string()),
                            attributes: Some(processor.context().committed().clone()),
                            degraded: Some(processor.degraded()),
                        }
                    }
                    None => DeviceDigest::bare(address.to_string()),
                };
                digests.push(digest);
            }
        }
        digests
    }

    /// Serialize the digest list within the upload bound, dropping trailing
    /// devices when the document would exceed it
    fn encode_digest_list(&self, mut digests: Vec<DeviceDigest>) -> ControllerResult<String> {
        let mut json = serde_json::to_vec(&digests)?;
        let mut dropped = 0usize;
        while json.len() > self.config.upload_limit && !digests.is_empty() {
            digests.pop();
            dropped += 1;
            json = serde_json::to_vec(&digests)?;
        }
        if dropped > 0 {
            warn!(dropped, "Device digest list exceeded upload bound, truncated");
        }
        wire::encode_payload(&digests)
    }

    pub(crate) fn on_sync_response(&mut self, response: SyncResponse) {
        if self.current_sync.as_deref() != Some(response.correlation_id.as_str()) {
            trace!("Discarding stale sync response");
            return;
        }
        self.current_sync = None;

        match self.apply_sync_response(response) {
            Ok(()) => {
                self.sync_attempt = 0;
                debug!("Sync cycle complete");
            }
            Err(e) => {
                // Retried on the next trigger, not immediately
                warn!(error = %e, "Failed to apply sync response");
            }
        }
    }

    fn apply_sync_response(&mut self, response: SyncResponse) -> ControllerResult<()> {
        // Validate the catalog before persisting anything
        let catalog: Vec<DriverDefinition> = wire::decode_payload(&response.catalog)?;

        if let Err(e) = self.store.config_put(CONFIG_CATALOG, response.catalog.clone()) {
            warn!(error = %e, "Failed to persist driver catalog");
        }

        self.replace_pins(&response.pins);

        let driver_state = self
            .store
            .load_all(DeviceTable::Drivers)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load persisted driver state");
                HashMap::new()
            });

        self.reconcile(&response.devices, &catalog, &driver_state);
        Ok(())
    }

    fn replace_pins(&mut self, entries: &HashMap<String, String>) {
        self.pins = PinIndex::rebuild(entries);
        match serde_json::to_string(entries) {
            Ok(json) => {
                if let Err(e) = self.store.config_put(CONFIG_PINS, json) {
                    warn!(error = %e, "Failed to persist pin map");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize pin map"),
        }
        debug!(entries = self.pins.len(), "Pin index replaced");
    }

    /// The reconciliation algorithm: one pass over the pushed device rows,
    /// then a single batched broadcast of every degraded-flag flip
    fn reconcile(
        &mut self,
        rows: &[DeviceRow],
        catalog: &[DriverDefinition],
        driver_state: &HashMap<String, HashMap<String, String>>,
    ) {
        let pre: HashMap<DeviceAddress, bool> = self
            .processors
            .iter()
            .map(|(address, p)| (address.clone(), p.degraded()))
            .collect();

        for row in rows {
            let Some(definition) =
                Self::best_match(catalog, &row.driver_name, &row.driver_version)
            else {
                debug!(
                    address = %row.address,
                    driver = %row.driver_name,
                    "No catalog driver for device, removing processor"
                );
                self.remove_device(&row.address);
                continue;
            };

            if definition.reflexes.is_empty() && definition.automaton.is_none() {
                debug!(
                    address = %row.address,
                    driver = %definition.name,
                    "Driver has no reflexes, removing processor"
                );
                self.remove_device(&row.address);
                continue;
            }

            if definition.is_builtin() {
                let reusable = self.processors.get(&row.address).is_some_and(|p| {
                    p.is_builtin()
                        && p.driver_key().is_some_and(|k| {
                            k.name == definition.name && k.version == definition.version
                        })
                });
                if reusable {
                    // Identity unchanged; only the offline-timeout hint moves
                    let timeout = definition
                        .offline_timeout_secs
                        .filter(|&secs| secs > 0)
                        .map(Duration::from_secs);
                    self.push_offline_timeout(&row.address, timeout);
                    continue;
                }
                self.install_device(row, definition, driver_state);
            } else {
                let unchanged = self
                    .processors
                    .get(&row.address)
                    .and_then(Processor::driver_key)
                    .is_some_and(|k| k.hash == definition.hash);
                if unchanged {
                    trace!(address = %row.address, "Driver hash unchanged, keeping processor");
                    continue;
                }
                self.install_device(row, definition, driver_state);
            }
        }

        let mut changes: Vec<DegradedChange> = Vec::new();
        for (address, processor) in &self.processors {
            let degraded = processor.degraded();
            if pre.get(address).copied().unwrap_or(false) != degraded {
                changes.push(DegradedChange {
                    address: address.clone(),
                    degraded,
                });
            }
        }
        for (address, was_degraded) in &pre {
            if *was_degraded && !self.processors.contains_key(address) {
                changes.push(DegradedChange {
                    address: address.clone(),
                    degraded: false,
                });
            }
        }

        if !changes.is_empty() {
            changes.sort_by(|a, b| a.address.to_string().cmp(&b.address.to_string()));
            debug!(changed = changes.len(), "Broadcasting degraded-device changes");
            self.gateway.broadcast_degraded(&changes);
        }
    }

    /// Replace any prior processor for the row's address with one built from
    /// the definition, seeded and resumed from persisted state
    fn install_device(
        &mut self,
        row: &DeviceRow,
        definition: &DriverDefinition,
        driver_state: &HashMap<String, HashMap<String, String>>,
    ) {
        let address = &row.address;

        // Read the resume state before teardown overwrites the label
        let resume = self
            .store
            .get(DeviceTable::Reflexes, address, "state")
            .ok()
            .flatten()
            .and_then(|label| label.parse::<LifecycleState>().ok())
            .filter(|state| !state.is_terminal())
            .unwrap_or(LifecycleState::Initial);

        if let Some(mut prior) = self.processors.remove(address) {
            debug!(address = %address, "Tearing down prior processor");
            let result = prior.shutdown();
            self.route_outbound(address, result, None);
        }

        // A failed compile yields a degraded processor, never a failed device
        let driver = self.cache.resolve(definition);

        let seed = driver_state
            .get(&address.to_string())
            .map(|columns| {
                columns
                    .iter()
                    .map(|(key, value)| {
                        let parsed = serde_json::from_str(value)
                            .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                        (key.clone(), parsed)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut processor = Processor::new(address.clone(), driver, self.store.clone(), seed);
        let result = processor.start(resume);

        if let Err(e) = self.store.put_all(
            DeviceTable::Reflexes,
            address,
            [
                ("driver_name", row.driver_name.as_str()),
                ("driver_version", row.driver_version.as_str()),
                ("driver_hash", definition.hash.as_str()),
            ],
        ) {
            warn!(address = %address, error = %e, "Failed to persist driver identity");
        }

        self.push_offline_timeout(address, processor.offline_timeout());
        self.route_outbound(address, result, None);

        debug!(
            address = %address,
            driver = %definition.name,
            version = %definition.version,
            degraded = processor.degraded(),
            "Installed processor"
        );
        self.processors.insert(address.clone(), processor);
    }

    /// Exact `(name, version)` match, else the highest version of the name
    fn best_match<'a>(
        catalog: &'a [DriverDefinition],
        name: &str,
        version: &str,
    ) -> Option<&'a DriverDefinition> {
        if let Some(exact) = catalog
            .iter()
            .find(|d| d.name == name && d.version == version)
        {
            return Some(exact);
        }
        catalog
            .iter()
            .filter(|d| d.name == name)
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }
}

/// Compare dotted numeric version strings component-wise
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2.0", "1.10.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }
}
