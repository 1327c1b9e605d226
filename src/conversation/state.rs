//! Per-thread conversation state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::profile::{ProductDirectory, UserProfile};
use crate::flows::{FlowKind, FlowLocalState};

/// Opaque conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
}

/// One history entry. Media bytes are not kept, only which kinds were sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub modalities: Vec<Modality>,
    pub at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn user(content: impl Into<String>, modalities: Vec<Modality>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            modalities,
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            modalities: vec![Modality::Text],
            at: Utc::now(),
        }
    }
}

/// A flow paused at a step, waiting for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub local: FlowLocalState,
    /// The question the user was last asked.
    pub prompt: String,
    pub suspended_at: DateTime<Utc>,
}

/// Everything remembered about one conversation thread.
///
/// The active flow and the awaiting-resume flag are derived from
/// `suspension`, so a suspended flow always has matching local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    messages: Vec<TurnRecord>,
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub product_directory: ProductDirectory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suspension: Option<Suspension>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            messages: Vec::new(),
            user_profile: UserProfile::default(),
            product_directory: ProductDirectory::default(),
            suspension: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> &[TurnRecord] {
        &self.messages
    }

    /// Append to history. History is never reordered or truncated.
    pub fn push_turn(&mut self, turn: TurnRecord) {
        self.messages.push(turn);
        self.touch();
    }

    pub fn active_flow(&self) -> Option<FlowKind> {
        self.suspension.as_ref().map(|s| s.local.kind())
    }

    pub fn awaiting_resume(&self) -> bool {
        self.suspension.is_some()
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        self.suspension.as_ref()
    }

    /// Park a flow at its current step.
    pub fn suspend(&mut self, local: FlowLocalState, prompt: impl Into<String>) {
        self.suspension = Some(Suspension {
            local,
            prompt: prompt.into(),
            suspended_at: Utc::now(),
        });
        self.touch();
    }

    /// Remove and return the suspended flow, if any.
    pub fn clear_flow(&mut self) -> Option<Suspension> {
        let taken = self.suspension.take();
        if taken.is_some() {
            self.touch();
        }
        taken
    }

    /// Whether the suspension is older than `ttl` at `now`.
    pub fn suspension_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(ref s) = self.suspension else {
            return false;
        };
        // A TTL too large for chrono never expires.
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(s.suspended_at) > ttl,
            Err(_) => false,
        }
    }

    /// Drop a suspension older than `ttl`. Returns the expired flow.
    pub fn expire_suspension(&mut self, now: DateTime<Utc>, ttl: Duration) -> Option<FlowKind> {
        if self.suspension_expired(now, ttl) {
            self.clear_flow().map(|s| s.local.kind())
        } else {
            None
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Progress;
    use crate::flows::product_analysis::ProductStep;

    fn local() -> FlowLocalState {
        FlowLocalState::ProductAnalysis(Progress::start(ProductStep::ConfirmAdd))
    }

    #[test]
    fn fresh_state_has_no_flow() {
        let state = ConversationState::new(ThreadId::new());
        assert!(state.active_flow().is_none());
        assert!(!state.awaiting_resume());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn suspend_and_clear() {
        let mut state = ConversationState::new("t1".into());
        state.suspend(local(), "Add it?");
        assert!(state.awaiting_resume());
        assert_eq!(state.active_flow(), Some(FlowKind::ProductAnalysis));
        assert_eq!(state.suspension().unwrap().prompt, "Add it?");

        let cleared = state.clear_flow().unwrap();
        assert_eq!(cleared.local.kind(), FlowKind::ProductAnalysis);
        assert!(!state.awaiting_resume());
        assert!(state.active_flow().is_none());
    }

    #[test]
    fn history_is_append_only() {
        let mut state = ConversationState::new("t1".into());
        state.push_turn(TurnRecord::user("hi", vec![Modality::Text]));
        state.push_turn(TurnRecord::assistant("hello"));
        let roles: Vec<_> = state.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant]);
    }

    #[test]
    fn suspension_expires_after_ttl() {
        let mut state = ConversationState::new("t1".into());
        state.suspend(local(), "Add it?");
        let ttl = Duration::from_secs(3600);
        let now = Utc::now();
        assert!(state.expire_suspension(now, ttl).is_none());
        assert!(state.awaiting_resume());

        let later = now + chrono::Duration::hours(2);
        assert_eq!(
            state.expire_suspension(later, ttl),
            Some(FlowKind::ProductAnalysis)
        );
        assert!(!state.awaiting_resume());
    }

    #[test]
    fn serde_round_trip_keeps_suspension() {
        let mut state = ConversationState::new("t1".into());
        state.push_turn(TurnRecord::user("analyze this serum", vec![Modality::Text]));
        state.suspend(local(), "Add it?");
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
