//! Reflex rule types
//!
//! A reflex rule pairs zero or more matchers with one or more actions.
//! Matchers decide whether an inbound message concerns the rule; actions run
//! against the device's execution context when every matcher agrees.

use reflex_core::LifecycleState;
use serde::{Deserialize, Serialize};

/// Matcher definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum Matcher {
    /// Matches a platform command/event by capability and name
    Command { capability: String, name: String },

    /// Matches when a committed attribute currently equals a value
    AttributeEquals {
        attribute: String,
        value: serde_json::Value,
    },

    /// Matches a protocol data payload whose string form starts with a prefix
    ProtocolPrefix { prefix: String },

    /// Matches the synthetic lifecycle message for one lifecycle event
    Lifecycle { event: LifecycleState },

    /// Matches every message
    Always,
}

/// Action definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Update committed device state (staged for persistence on change)
    SetAttribute {
        attribute: String,
        value: serde_json::Value,
    },

    /// Stage an attribute for outward broadcast without committing it
    EmitAttribute {
        attribute: String,
        value: serde_json::Value,
    },

    /// Stage the reply body for the message being processed
    Respond { body: serde_json::Value },

    /// Stage a raw payload to send out through the device's protocol stack
    SendProtocol { payload: serde_json::Value },

    /// Declare an inbound attribute write authoritatively handled
    ConsumeWrite { attribute: String },

    /// The inert parameterless action; a driver whose whole reflex set is
    /// one rule carrying only this action is treated as built-in
    Noop,
}

impl Action {
    /// Check whether this is the inert built-in action
    pub fn is_inert(&self) -> bool {
        matches!(self, Action::Noop)
    }
}

/// One reflex: matchers plus the actions to run when they all match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflexRule {
    /// All must match; an empty list matches every message
    #[serde(default)]
    pub matchers: Vec<Matcher>,

    /// Executed in order on match
    pub actions: Vec<Action>,
}
