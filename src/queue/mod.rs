//! Outbound message queue and reconnect backoff

pub mod backoff;
pub mod message_queue;

pub use backoff::ReconnectBackoff;
pub use message_queue::{CallOutcome, EnhancedMessage, MessageQueue, QueueKind, SendGate};
