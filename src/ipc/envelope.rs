//! IPC message envelope exchanged over the shared-memory queues.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IpcError;

/// Thread id used when a request does not name one.
pub const DEFAULT_THREAD_ID: &str = "default";

/// What the sender wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Run one conversational turn.
    ServiceRequest,
    /// Drop the conversation state of a thread.
    ClearHistory,
    /// Stop the backend loop.
    Shutdown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ServiceRequest => "service_request",
            Self::ClearHistory => "clear_history",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Processing status of a message.
///
/// Moves forward only: Pending → Processing → Completed | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl MessageStatus {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Processing → Processing is allowed so partial text can be refreshed.
    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, target),
            (Pending, Pending)
                | (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Error)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

fn default_thread_id() -> String {
    DEFAULT_THREAD_ID.to_string()
}

/// The record serialized into each queue slot.
///
/// Media payloads travel base64-encoded. Empty strings are omitted on the
/// wire to keep records small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub kind: MessageKind,
    /// Correlation key, unique per request.
    pub id: String,
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub audio: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub video: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub voice: String,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_audio: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

impl IpcMessage {
    fn new(kind: MessageKind, thread_id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            text: String::new(),
            image: String::new(),
            audio: String::new(),
            video: String::new(),
            system_prompt: String::new(),
            voice: String::new(),
            status: MessageStatus::Pending,
            response_text: String::new(),
            response_audio: String::new(),
            error_message: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// A conversational turn for `thread_id`.
    pub fn service_request(thread_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::ServiceRequest, thread_id);
        msg.text = text.into();
        msg
    }

    pub fn clear_history(thread_id: impl Into<String>) -> Self {
        Self::new(MessageKind::ClearHistory, thread_id)
    }

    pub fn shutdown() -> Self {
        Self::new(MessageKind::Shutdown, DEFAULT_THREAD_ID)
    }

    /// Response envelope correlated with `request` (same kind, id and thread).
    pub fn response_to(request: &IpcMessage, status: MessageStatus) -> Self {
        let mut msg = Self::new(request.kind, request.thread_id.clone());
        msg.id = request.id.clone();
        msg.status = status;
        msg
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_image(mut self, bytes: &[u8]) -> Self {
        self.image = BASE64.encode(bytes);
        self
    }

    pub fn with_audio(mut self, bytes: &[u8]) -> Self {
        self.audio = BASE64.encode(bytes);
        self
    }

    pub fn with_video(mut self, bytes: &[u8]) -> Self {
        self.video = BASE64.encode(bytes);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn image_bytes(&self) -> Result<Option<Vec<u8>>, IpcError> {
        self.decode_field("image", &self.image)
    }

    pub fn audio_bytes(&self) -> Result<Option<Vec<u8>>, IpcError> {
        self.decode_field("audio", &self.audio)
    }

    pub fn video_bytes(&self) -> Result<Option<Vec<u8>>, IpcError> {
        self.decode_field("video", &self.video)
    }

    pub fn response_audio_bytes(&self) -> Result<Option<Vec<u8>>, IpcError> {
        self.decode_field("response_audio", &self.response_audio)
    }

    fn decode_field(&self, field: &str, value: &str) -> Result<Option<Vec<u8>>, IpcError> {
        if value.is_empty() {
            return Ok(None);
        }
        BASE64
            .decode(value)
            .map(Some)
            .map_err(|e| IpcError::InvalidPayload {
                id: self.id.clone(),
                field: field.to_string(),
                reason: e.to_string(),
            })
    }

    /// Merge `patch` into this message, enforcing forward-only status moves.
    pub fn apply(&mut self, patch: &MessagePatch) -> Result<(), IpcError> {
        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(IpcError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status.to_string(),
                    to: status.to_string(),
                });
            }
            self.status = status;
        }
        if let Some(ref text) = patch.response_text {
            self.response_text = text.clone();
        }
        if let Some(ref audio) = patch.response_audio {
            self.response_audio = audio.clone();
        }
        if let Some(ref error) = patch.error_message {
            self.error_message = error.clone();
        }
        self.timestamp = Utc::now();
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IpcError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Partial update applied by `SharedQueue::update_by_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub status: Option<MessageStatus>,
    pub response_text: Option<String>,
    pub response_audio: Option<String>,
    pub error_message: Option<String>,
}

impl MessagePatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    pub fn with_audio(mut self, bytes: &[u8]) -> Self {
        self.response_audio = Some(BASE64.encode(bytes));
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}
