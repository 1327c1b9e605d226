//! Collaborator interfaces the flows and the dispatcher call out to.
//!
//! Model and vision services live behind these traits. [`offline`] ships
//! deterministic implementations for local runs and tests.

pub mod offline;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::conversation::{FaceFeatures, TurnRecord, UserProfile};
use crate::error::ToolError;

/// Stream of reply increments from the chat responder.
pub type ReplyStream = BoxStream<'static, Result<String, ToolError>>;

/// Settings for one chat reply.
#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub system_prompt: String,
}

/// Free-form conversational replies.
#[async_trait]
pub trait ChatResponder: Send + Sync {
    /// Start a reply to `history`. Increments arrive in order.
    async fn respond(&self, history: &[TurnRecord], config: &ChatConfig)
    -> Result<ReplyStream, ToolError>;
}

/// Picks the clearest face frame from a video.
#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// Fails with [`ToolError::NoFaceDetected`] when no frame shows a face.
    async fn best_frame(&self, video: &[u8]) -> Result<Vec<u8>, ToolError>;
}

/// Scores skin dimensions on a face image, 0..=100 each.
#[async_trait]
pub trait SkinScorer: Send + Sync {
    async fn score(&self, face: &[u8]) -> Result<BTreeMap<String, u8>, ToolError>;
}

/// Result of a face-feature analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub features: FaceFeatures,
    pub skin_color: String,
    pub skin_types: Vec<String>,
}

#[async_trait]
pub trait FaceFeatureAnalyzer: Send + Sync {
    async fn analyze(&self, video: &[u8]) -> Result<FaceAnalysis, ToolError>;
}

/// A product as described by a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub brand: String,
    pub category: String,
    pub ingredients: Vec<String>,
    pub description: String,
}

#[async_trait]
pub trait ProductSearch: Send + Sync {
    /// Best matches first. An empty list means nothing matched.
    async fn search(&self, query: &str) -> Result<Vec<ProductInfo>, ToolError>;

    /// Read a search query off a photo of the product. Fails with
    /// [`ToolError::NotFound`] when nothing legible is in the picture.
    async fn recognize(&self, image: &[u8]) -> Result<String, ToolError>;
}

/// One step of a skincare or makeup routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideStep {
    pub title: String,
    pub instruction: String,
    #[serde(default)]
    pub product: String,
}

/// Which routine a guide covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideKind {
    #[default]
    Skincare,
    Makeup,
}

impl std::fmt::Display for GuideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skincare => write!(f, "skincare"),
            Self::Makeup => write!(f, "makeup"),
        }
    }
}

/// Writes the user-facing text of the flows.
#[async_trait]
pub trait FeedbackWriter: Send + Sync {
    async fn skin_report(
        &self,
        scores: &BTreeMap<String, u8>,
        profile: &UserProfile,
    ) -> Result<String, ToolError>;

    async fn product_fit(
        &self,
        product: &ProductInfo,
        profile: &UserProfile,
    ) -> Result<String, ToolError>;

    /// Plan a routine; `feedback` carries the user's requested changes to
    /// the previous plan.
    async fn plan_routine(
        &self,
        kind: GuideKind,
        request: &str,
        feedback: Option<&str>,
        profile: &UserProfile,
    ) -> Result<Vec<GuideStep>, ToolError>;

    async fn step_feedback(&self, step: &GuideStep, video: &[u8]) -> Result<String, ToolError>;

    async fn routine_summary(
        &self,
        kind: GuideKind,
        steps: &[GuideStep],
        profile: &UserProfile,
    ) -> Result<String, ToolError>;

    async fn profile_summary(&self, profile: &UserProfile) -> Result<String, ToolError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ToolError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ToolError>;
}

/// Bundle of collaborators passed to the dispatcher.
#[derive(Clone)]
pub struct ToolSet {
    pub chat: Arc<dyn ChatResponder>,
    pub face: Arc<dyn FaceExtractor>,
    pub skin: Arc<dyn SkinScorer>,
    pub features: Arc<dyn FaceFeatureAnalyzer>,
    pub products: Arc<dyn ProductSearch>,
    pub feedback: Arc<dyn FeedbackWriter>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl ToolSet {
    /// Deterministic local implementations of every collaborator.
    pub fn offline() -> Self {
        Self {
            chat: Arc::new(offline::EchoChat),
            face: Arc::new(offline::FirstFrameExtractor),
            skin: Arc::new(offline::FixedSkinScorer),
            features: Arc::new(offline::FixedFaceAnalyzer),
            products: Arc::new(offline::CatalogSearch::default()),
            feedback: Arc::new(offline::TemplateFeedback),
            speech: None,
            transcriber: None,
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("speech", &self.speech.is_some())
            .field("transcriber", &self.transcriber.is_some())
            .finish_non_exhaustive()
    }
}
