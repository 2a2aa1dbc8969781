//! Precompiled decision automaton
//!
//! The automaton is an alternate encoding of a driver's reflex rules: shared
//! matcher and action pools plus decision rows that reference them by index.
//! Evaluation walks the rows in order and runs the first row whose matchers
//! all agree, which is exactly the rule-list semantics.

use serde::{Deserialize, Serialize};

use crate::rule::{Action, Matcher};
use crate::{DriverError, DriverResult};

/// One decision row: matcher indices plus the action indices to run on match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRow {
    /// Indices into the matcher pool; empty matches every message
    #[serde(default)]
    pub matchers: Vec<usize>,

    /// Indices into the action pool, run in order
    pub actions: Vec<usize>,
}

/// Shared matcher/action pools plus ordered decision rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAutomaton {
    #[serde(default)]
    pub matchers: Vec<Matcher>,

    #[serde(default)]
    pub actions: Vec<Action>,

    pub rows: Vec<DecisionRow>,
}

impl DecisionAutomaton {
    /// Validate that every row index points into its pool
    pub fn validate(&self) -> DriverResult<()> {
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(&m) = row.matchers.iter().find(|&&m| m >= self.matchers.len()) {
                return Err(DriverError::InvalidAutomaton(format!(
                    "row {} references matcher {} but the pool holds {}",
                    i,
                    m,
                    self.matchers.len()
                )));
            }
            if let Some(&a) = row.actions.iter().find(|&&a| a >= self.actions.len()) {
                return Err(DriverError::InvalidAutomaton(format!(
                    "row {} references action {} but the pool holds {}",
                    i,
                    a,
                    self.actions.len()
                )));
            }
        }
        Ok(())
    }
}
