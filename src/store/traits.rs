//! `CheckpointStore` trait: persistence of conversation state between turns.

use async_trait::async_trait;

use crate::conversation::{ConversationState, ThreadId};
use crate::error::CheckpointError;

/// Loads and saves whole conversation states keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The saved state, or `None` for a thread never seen (or cleared).
    async fn load(&self, thread_id: &ThreadId)
    -> Result<Option<ConversationState>, CheckpointError>;

    /// Replace the saved state of `state.thread_id`.
    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError>;

    /// Forget a thread. Deleting an unknown thread is not an error.
    async fn delete(&self, thread_id: &ThreadId) -> Result<(), CheckpointError>;
}
