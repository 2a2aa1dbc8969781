//! Driver definition: the immutable, versioned, content-hashed description
//! of a device type's local automation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::automaton::DecisionAutomaton;
use crate::rule::ReflexRule;

/// Expected value shape for a capability attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Any JSON value
    #[default]
    Json,
    String,
    Number,
    Bool,
}

impl ValueType {
    /// Check whether a value fits this type
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            ValueType::Json => true,
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Bool => value.is_boolean(),
        }
    }
}

/// One attribute exposed by a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,

    #[serde(default)]
    pub value_type: ValueType,
}

/// A capability: a named group of typed attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,

    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

/// Cache identity of a driver: same key ⇒ byte-for-byte same behavior
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverKey {
    pub name: String,
    pub version: String,
    pub hash: String,
}

impl fmt::Display for DriverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.name, self.version, self.hash)
    }
}

/// Immutable description of a device type's automation
///
/// Identity is `(name, version, hash)`; the catalog supplies the hash, and
/// [`DriverDefinition::content_hash`] recomputes it from the definition body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverDefinition {
    pub name: String,

    /// Semantic version string (e.g., "1.4.2")
    pub version: String,

    /// Content hash supplied by the catalog
    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Ordered reflex rules; first match wins per message
    #[serde(default)]
    pub reflexes: Vec<ReflexRule>,

    /// Optional precompiled decision automaton equivalent to the rule set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automaton: Option<DecisionAutomaton>,

    /// Offline-timeout hint pushed to the owning protocol stack when positive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline_timeout_secs: Option<u64>,
}

impl DriverDefinition {
    /// The cache identity of this definition
    pub fn key(&self) -> DriverKey {
        DriverKey {
            name: self.name.clone(),
            version: self.version.clone(),
            hash: self.hash.clone(),
        }
    }

    /// A driver whose reflex set is exactly one rule with no matchers and a
    /// single inert action is a built-in driver
    pub fn is_builtin(&self) -> bool {
        match self.reflexes.as_slice() {
            [rule] => {
                rule.matchers.is_empty()
                    && matches!(rule.actions.as_slice(), [action] if action.is_inert())
            }
            _ => false,
        }
    }

    /// Recompute the content hash over the behavioral body of the definition
    /// (everything except the `hash` field itself)
    pub fn content_hash(&self) -> String {
        let body = serde_json::json!({
            "name": self.name,
            "version": self.version,
            "capabilities": self.capabilities,
            "reflexes": self.reflexes,
            "automaton": self.automaton,
            "offline_timeout_secs": self.offline_timeout_secs,
        });
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}
