//! Core types for the reflex hub
//!
//! This crate provides the fundamental types shared by the reflex engine:
//! DeviceAddress, LifecycleState, and the platform/protocol message types
//! that flow between the controller, processors, and the upstream gateway.

mod address;
mod lifecycle;
mod message;

pub use address::{DeviceAddress, DeviceAddressError};
pub use lifecycle::{LifecycleState, UnknownLifecycleState};
pub use message::{
    DegradedChange, Emission, Message, PlatformMessage, ProtocolBody, ProtocolMessage,
};

/// Version tag carried on every outbound reflex-protocol message
pub const REFLEX_PROTOCOL_VERSION: u16 = 2;

/// Capability name for synthetic lifecycle messages offered to drivers
pub const LIFECYCLE_CAPABILITY: &str = "lifecycle";
