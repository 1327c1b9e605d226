//! Error types for Mira.

use std::time::Duration;

use crate::flows::FlowKind;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Shared-memory transport errors.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("Segment {name} is full: needed {needed} bytes, {available} available")]
    CapacityExceeded {
        name: String,
        needed: usize,
        available: usize,
    },

    #[error("Segment {name} is corrupt at offset {offset}: {reason}")]
    Corrupt {
        name: String,
        offset: usize,
        reason: String,
    },

    #[error("Shared memory segment {0} does not exist")]
    SegmentNotFound(String),

    #[error("Invalid segment name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Segment size {size} is too small (minimum {min})")]
    SegmentTooSmall { size: usize, min: usize },

    #[error("Message {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Invalid {field} payload in message {id}: {reason}")]
    InvalidPayload {
        id: String,
        field: String,
        reason: String,
    },

    #[error("No response for message {id} after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    #[error("Segment lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpcError {
    /// Whether the caller can retry the same operation later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. } | Self::Timeout { .. })
    }
}

/// Checkpoint store errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint backend unavailable: {0}")]
    Unavailable(String),

    #[error("Checkpoint for thread {thread_id} could not be decoded: {reason}")]
    Decode { thread_id: String, reason: String },
}

/// Flow-logic errors. Fatal for the session's active flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow {expected} was handed local state belonging to {found}")]
    StateMismatch { expected: FlowKind, found: FlowKind },

    #[error("No flow registered for {0}")]
    NotRegistered(FlowKind),

    #[error("Flow {flow} exceeded {limit} step transitions in one turn (last step: {step})")]
    Runaway {
        flow: FlowKind,
        step: String,
        limit: usize,
    },

    #[error("Flow {flow} reached step {step} without the data it needs: {missing}")]
    MissingData {
        flow: FlowKind,
        step: String,
        missing: String,
    },

    #[error("Tool failed during flow: {0}")]
    Tool(#[from] ToolError),
}

/// Errors from external tool/model collaborators.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("No face detected in the provided video")]
    NoFaceDetected,

    #[error("Nothing found for {query}")]
    NotFound { query: String },

    #[error("Invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("Tool {tool} is unavailable: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("Tool {tool} execution failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("Tool {tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
}

impl ToolError {
    /// Whether asking the user again can resolve the failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoFaceDetected | Self::NotFound { .. } | Self::InvalidInput { .. }
        )
    }
}

/// Intent classification errors. Never surfaced to the user.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    RequestFailed(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
