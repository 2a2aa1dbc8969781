//! Compiled driver: the loaded, executable form of a definition
//!
//! A compiled driver is stateless with respect to any single device; every
//! processor of the same driver type shares one instance. All device state
//! flows through the [`RuleContext`] the caller supplies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reflex_core::{PlatformMessage, ProtocolBody, ProtocolMessage, LIFECYCLE_CAPABILITY};
use tracing::{trace, warn};

use crate::definition::{DriverDefinition, DriverKey, ValueType};
use crate::rule::{Action, Matcher};
use crate::{DriverError, DriverResult};

/// Surface a rule's actions touch while evaluating one message
///
/// The execution context in the engine crate is the canonical implementation;
/// the driver crate only sees this trait.
pub trait RuleContext {
    /// Current committed value of an attribute
    fn attribute(&self, key: &str) -> Option<&serde_json::Value>;

    /// Update committed state (staged for persistence on actual change)
    fn set_attribute(&mut self, key: &str, value: serde_json::Value);

    /// Stage an attribute for outward broadcast
    fn emit_attribute(&mut self, key: &str, value: serde_json::Value);

    /// Stage the single reply body for the message being processed
    fn set_response(&mut self, body: serde_json::Value);

    /// Stage a raw payload to send through the device's protocol stack
    fn stage_send(&mut self, payload: serde_json::Value);

    /// Declare an inbound attribute write authoritatively handled
    fn mark_set_attribute_consumed(&mut self, key: &str);

    /// Record that a rule matched the current message
    fn mark_handled(&mut self);
}

enum MessageRef<'a> {
    Platform(&'a PlatformMessage),
    Protocol(&'a ProtocolMessage),
}

/// The executable form of a [`DriverDefinition`]
pub struct CompiledDriver {
    definition: DriverDefinition,
    /// Attribute metadata bound from the capability set
    attribute_types: HashMap<String, ValueType>,
    builtin: bool,
}

impl CompiledDriver {
    /// Compile a definition: validate the automaton and matchers, bind
    /// capability attribute metadata
    pub fn compile(definition: DriverDefinition) -> DriverResult<Arc<Self>> {
        if let Some(automaton) = &definition.automaton {
            automaton.validate()?;
        }

        let rule_matchers = definition.reflexes.iter().flat_map(|r| r.matchers.iter());
        let pool_matchers = definition
            .automaton
            .iter()
            .flat_map(|a| a.matchers.iter());
        for matcher in rule_matchers.chain(pool_matchers) {
            if let Matcher::ProtocolPrefix { prefix } = matcher {
                if prefix.is_empty() {
                    return Err(DriverError::InvalidMatcher(
                        "protocol prefix cannot be empty".to_string(),
                    ));
                }
            }
        }

        let mut attribute_types = HashMap::new();
        for capability in &definition.capabilities {
            for spec in &capability.attributes {
                attribute_types.insert(spec.name.clone(), spec.value_type);
            }
        }

        let builtin = definition.is_builtin();

        Ok(Arc::new(Self {
            definition,
            attribute_types,
            builtin,
        }))
    }

    /// Cache identity of the underlying definition
    pub fn key(&self) -> DriverKey {
        self.definition.key()
    }

    /// The source definition
    pub fn definition(&self) -> &DriverDefinition {
        &self.definition
    }

    /// Whether this driver is the built-in fast path
    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    /// Offline-timeout hint, when the definition declares a positive one
    pub fn offline_timeout(&self) -> Option<Duration> {
        self.definition
            .offline_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    /// Evaluate a platform message; returns whether any rule matched
    pub fn evaluate_platform(
        &self,
        message: &PlatformMessage,
        ctx: &mut dyn RuleContext,
    ) -> DriverResult<bool> {
        self.evaluate(MessageRef::Platform(message), ctx)
    }

    /// Evaluate a protocol message; returns whether any rule matched
    pub fn evaluate_protocol(
        &self,
        message: &ProtocolMessage,
        ctx: &mut dyn RuleContext,
    ) -> DriverResult<bool> {
        self.evaluate(MessageRef::Protocol(message), ctx)
    }

    fn evaluate(&self, message: MessageRef<'_>, ctx: &mut dyn RuleContext) -> DriverResult<bool> {
        if let Some(automaton) = &self.definition.automaton {
            for row in &automaton.rows {
                let matched = row.matchers.iter().try_fold(true, |acc, &idx| {
                    let matcher = automaton.matchers.get(idx).ok_or_else(|| {
                        DriverError::InvalidAutomaton(format!("matcher index {idx} out of range"))
                    })?;
                    Ok::<_, DriverError>(acc && self.matches(matcher, &message, ctx))
                })?;
                if !matched {
                    continue;
                }
                for &idx in &row.actions {
                    let action = automaton.actions.get(idx).ok_or_else(|| {
                        DriverError::InvalidAutomaton(format!("action index {idx} out of range"))
                    })?;
                    self.apply(action, ctx);
                }
                ctx.mark_handled();
                return Ok(true);
            }
            return Ok(false);
        }

        for rule in &self.definition.reflexes {
            if rule
                .matchers
                .iter()
                .all(|m| self.matches(m, &message, ctx))
            {
                for action in &rule.actions {
                    self.apply(action, ctx);
                }
                ctx.mark_handled();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches(&self, matcher: &Matcher, message: &MessageRef<'_>, ctx: &dyn RuleContext) -> bool {
        match (matcher, message) {
            (Matcher::Always, _) => true,
            (Matcher::Command { capability, name }, MessageRef::Platform(msg)) => {
                msg.capability == *capability && msg.name == *name
            }
            (Matcher::Lifecycle { event }, MessageRef::Platform(msg)) => {
                msg.capability == LIFECYCLE_CAPABILITY && msg.name == event.as_str()
            }
            (Matcher::ProtocolPrefix { prefix }, MessageRef::Protocol(msg)) => match &msg.body {
                ProtocolBody::Data(payload) => payload
                    .as_str()
                    .map(|s| s.starts_with(prefix.as_str()))
                    .unwrap_or(false),
                _ => false,
            },
            (Matcher::AttributeEquals { attribute, value }, _) => {
                ctx.attribute(attribute) == Some(value)
            }
            _ => false,
        }
    }

    fn apply(&self, action: &Action, ctx: &mut dyn RuleContext) {
        match action {
            Action::SetAttribute { attribute, value } => {
                if let Some(expected) = self.attribute_types.get(attribute) {
                    if !expected.accepts(value) {
                        warn!(
                            driver = %self.definition.name,
                            attribute = %attribute,
                            "Attribute value does not fit declared type, skipping write"
                        );
                        return;
                    }
                }
                ctx.set_attribute(attribute, value.clone());
            }
            Action::EmitAttribute { attribute, value } => {
                ctx.emit_attribute(attribute, value.clone());
            }
            Action::Respond { body } => ctx.set_response(body.clone()),
            Action::SendProtocol { payload } => ctx.stage_send(payload.clone()),
            Action::ConsumeWrite { attribute } => ctx.mark_set_attribute_consumed(attribute),
            Action::Noop => {
                trace!(driver = %self.definition.name, "Inert action");
            }
        }
    }
}
