//! Reflex driver definitions and their compiled, executable form
//!
//! A driver definition is the immutable, versioned, content-hashed
//! description of one device type's local automation: capability metadata,
//! an ordered list of reflex rules (matchers + actions), and an optional
//! precompiled decision automaton equivalent to the rule set. Compilation
//! validates the definition and binds attribute metadata; compiled drivers
//! are stateless and shared across every device of the same driver type
//! through the [`DriverCache`].

mod automaton;
mod cache;
mod compiled;
mod definition;
mod rule;

use thiserror::Error;

pub use automaton::{DecisionAutomaton, DecisionRow};
pub use cache::DriverCache;
pub use compiled::{CompiledDriver, RuleContext};
pub use definition::{AttributeSpec, Capability, DriverDefinition, DriverKey, ValueType};
pub use rule::{Action, Matcher, ReflexRule};

/// Driver compilation and evaluation errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid matcher: {0}")]
    InvalidMatcher(String),

    #[error("invalid decision automaton: {0}")]
    InvalidAutomaton(String),

    #[error("definition serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
