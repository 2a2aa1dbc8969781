//! Controller configuration

use crate::scheduler::BackoffPolicy;

/// Default upload payload bound (bytes of serialized JSON before compression)
pub const DEFAULT_UPLOAD_LIMIT: usize = 256 * 1024;

/// Default mailbox capacity
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Configuration resolved once at controller construction
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// When set, protocol-message dispatch degenerates to pure forwarding
    /// and no reflex evaluates locally
    pub disable_local_processing: bool,

    /// Place-scoped salt mixed into pin digests
    pub pin_salt: String,

    /// Backoff policy for sync upload retries
    pub backoff: BackoffPolicy,

    /// Bound on the serialized device digest list
    pub upload_limit: usize,

    /// Capacity of the controller mailbox
    pub mailbox_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            disable_local_processing: false,
            pin_salt: String::new(),
            backoff: BackoffPolicy::default(),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}
