//! Conversation checkpoint persistence.

pub mod memory;
pub mod traits;

pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
