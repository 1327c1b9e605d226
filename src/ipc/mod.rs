//! Cross-process transport over shared memory.
//!
//! Two fixed-size segments carry length-prefixed JSON envelopes: one for
//! requests, one for responses.

pub mod channel;
pub mod client;
pub mod envelope;
pub mod layout;
pub mod queue;
pub mod segment;

pub use channel::Channel;
pub use client::IpcClient;
pub use envelope::{IpcMessage, MessageKind, MessagePatch, MessageStatus};
pub use queue::SharedQueue;
pub use segment::Segment;
