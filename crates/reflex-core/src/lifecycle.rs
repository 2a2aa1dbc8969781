//! Processor lifecycle states
//!
//! Valid transitions:
//!
//! ```text
//! Initial → Added → Connected ⇄ Disconnected
//!
//! any state → Removed (terminal)
//! ```
//!
//! Re-entering the current state is always a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for unrecognized lifecycle state labels
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown lifecycle state: {0}")]
pub struct UnknownLifecycleState(pub String);

/// Lifecycle state of a per-device processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Freshly constructed, has never run its "added" callback
    Initial,
    /// Added to the hub but transport state not yet known
    Added,
    /// Device is reachable
    Connected,
    /// Device has gone offline
    Disconnected,
    /// Terminal; the processor will never run again
    Removed,
}

impl LifecycleState {
    /// Get the persisted label for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initial => "initial",
            LifecycleState::Added => "added",
            LifecycleState::Connected => "connected",
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Removed => "removed",
        }
    }

    /// Check whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Removed)
    }
}

impl FromStr for LifecycleState {
    type Err = UnknownLifecycleState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(LifecycleState::Initial),
            "added" => Ok(LifecycleState::Added),
            "connected" => Ok(LifecycleState::Connected),
            "disconnected" => Ok(LifecycleState::Disconnected),
            "removed" => Ok(LifecycleState::Removed),
            other => Err(UnknownLifecycleState(other.to_string())),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
