//! Driver definition cache
//!
//! Resolves a `(name, version, hash)` identity to a shared compiled driver.
//! Entries are held through `Weak` references, so a driver referenced by no
//! processor is reclaimed once its last `Arc` drops; `purge` sweeps the dead
//! entries out of the map. Lookups are safe from concurrent evaluations and
//! concurrent compiles of the same key are idempotent.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::compiled::CompiledDriver;
use crate::definition::{DriverDefinition, DriverKey};

/// Cache of compiled drivers keyed by definition identity
pub struct DriverCache {
    inner: DashMap<DriverKey, Weak<CompiledDriver>>,
}

impl DriverCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Resolve a definition to its compiled driver, compiling on miss
    ///
    /// Returns `None` when compilation fails; the caller must treat that as
    /// "no local automation available" rather than fail the device.
    pub fn resolve(&self, definition: &DriverDefinition) -> Option<Arc<CompiledDriver>> {
        let key = definition.key();

        if let Some(entry) = self.inner.get(&key) {
            if let Some(driver) = entry.upgrade() {
                return Some(driver);
            }
        }

        match CompiledDriver::compile(definition.clone()) {
            Ok(driver) => {
                debug!(driver = %key, "Compiled driver definition");
                self.inner.insert(key, Arc::downgrade(&driver));
                Some(driver)
            }
            Err(e) => {
                warn!(driver = %key, error = %e, "Driver compilation failed");
                None
            }
        }
    }

    /// Drop entries whose compiled driver has been reclaimed
    pub fn purge(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, weak| weak.strong_count() > 0);
        before - self.inner.len()
    }

    /// Number of cache entries (live or pending purge)
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for DriverCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{DecisionAutomaton, DecisionRow};
    use crate::rule::{Action, ReflexRule};

    fn definition(name: &str, hash: &str) -> DriverDefinition {
        DriverDefinition {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            hash: hash.to_string(),
            capabilities: vec![],
            reflexes: vec![ReflexRule {
                matchers: vec![],
                actions: vec![Action::Noop],
            }],
            automaton: None,
            offline_timeout_secs: None,
        }
    }

    #[test]
    fn test_resolve_compiles_once() {
        let cache = DriverCache::new();
        let def = definition("switch", "h1");

        let first = cache.resolve(&def).unwrap();
        let second = cache.resolve(&def).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_hashes_are_distinct_entries() {
        let cache = DriverCache::new();
        let a = cache.resolve(&definition("switch", "h1")).unwrap();
        let b = cache.resolve(&definition("switch", "h2")).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reclaim_after_last_reference_drops() {
        let cache = DriverCache::new();
        let def = definition("switch", "h1");

        let driver = cache.resolve(&def).unwrap();
        drop(driver);

        assert_eq!(cache.purge(), 1);
        assert!(cache.is_empty());

        // A later resolve recompiles
        assert!(cache.resolve(&def).is_some());
    }

    #[test]
    fn test_failed_compile_returns_none() {
        let cache = DriverCache::new();
        let mut def = definition("broken", "h1");
        def.automaton = Some(DecisionAutomaton {
            matchers: vec![],
            actions: vec![],
            rows: vec![DecisionRow {
                matchers: vec![7],
                actions: vec![],
            }],
        });

        assert!(cache.resolve(&def).is_none());
        assert!(cache.is_empty());
    }
}
