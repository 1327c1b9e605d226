//! Process-lifetime checkpoint store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::conversation::{ConversationState, ThreadId};
use crate::error::CheckpointError;
use crate::store::traits::CheckpointStore;

/// Keeps serialized states in memory, so a loaded state never aliases the
/// one a caller is still mutating.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<ThreadId, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ConversationState>, CheckpointError> {
        let states = self.states.read().await;
        let Some(bytes) = states.get(thread_id) else {
            return Ok(None);
        };
        serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Decode {
                thread_id: thread_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save(&self, state: &ConversationState) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec(state).map_err(|e| CheckpointError::Decode {
            thread_id: state.thread_id.to_string(),
            reason: e.to_string(),
        })?;
        debug!(thread_id = %state.thread_id, bytes = bytes.len(), "Saved checkpoint");
        self.states
            .write()
            .await
            .insert(state.thread_id.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        if self.states.write().await.remove(thread_id).is_some() {
            debug!(thread_id = %thread_id, "Deleted checkpoint");
        }
        Ok(())
    }
}
