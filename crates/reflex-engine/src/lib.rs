//! Per-device execution context and processor
//!
//! The execution context is the only surface through which a driver's rules
//! touch persistence and emission; the processor wraps one context plus a
//! compiled driver and exposes the lifecycle state machine the controller
//! schedules work against.

mod context;
mod processor;

pub use context::ExecutionContext;
pub use processor::{HandleResult, Processor};
