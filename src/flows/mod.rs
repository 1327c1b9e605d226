//! Guided conversation flows.
//!
//! Each flow is a [`machine::StepMachine`] whose resume point
//! ([`machine::Progress`]) is stored in the conversation as a
//! [`FlowLocalState`] while the flow waits for the user.

pub mod care_guide;
pub mod machine;
pub mod product_analysis;
pub mod profile_creation;
pub mod registry;
pub mod skin_analysis;

use serde::{Deserialize, Serialize};

use crate::conversation::{ProductEntry, ProfileUpdate};

pub use machine::{Flow, FlowLimits, Progress, StepContext, StepMachine, StepOutcome, TurnCursor};
pub use registry::FlowRegistry;

/// The fixed set of flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    ProfileCreation,
    SkinAnalysis,
    ProductAnalysis,
    CareGuide,
}

impl FlowKind {
    pub const ALL: [FlowKind; 4] = [
        Self::ProfileCreation,
        Self::SkinAnalysis,
        Self::ProductAnalysis,
        Self::CareGuide,
    ];
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProfileCreation => "profile_creation",
            Self::SkinAnalysis => "skin_analysis",
            Self::ProductAnalysis => "product_analysis",
            Self::CareGuide => "care_guide",
        };
        write!(f, "{s}")
    }
}

/// Resume point of whichever flow is suspended. The variant identifies the
/// flow, so the stored state can never belong to a different one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowLocalState {
    ProfileCreation(profile_creation::ProfileProgress),
    SkinAnalysis(skin_analysis::SkinProgress),
    ProductAnalysis(product_analysis::ProductProgress),
    CareGuide(care_guide::GuideProgress),
}

impl FlowLocalState {
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::ProfileCreation(_) => FlowKind::ProfileCreation,
            Self::SkinAnalysis(_) => FlowKind::SkinAnalysis,
            Self::ProductAnalysis(_) => FlowKind::ProductAnalysis,
            Self::CareGuide(_) => FlowKind::CareGuide,
        }
    }

    /// Name of the step the flow is waiting at.
    pub fn step_name(&self) -> String {
        match self {
            Self::ProfileCreation(p) => p.step.to_string(),
            Self::SkinAnalysis(p) => p.step.to_string(),
            Self::ProductAnalysis(p) => p.step.to_string(),
            Self::CareGuide(p) => p.step.to_string(),
        }
    }
}

/// What a finished flow hands back to the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowResult {
    pub reply: String,
    pub profile: Option<ProfileUpdate>,
    pub product: Option<ProductEntry>,
}

impl FlowResult {
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, update: ProfileUpdate) -> Self {
        self.profile = Some(update);
        self
    }

    pub fn with_product(mut self, entry: ProductEntry) -> Self {
        self.product = Some(entry);
        self
    }
}

/// Result of running a flow for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    /// Waiting for the user. `local` is the state to store.
    Suspended {
        prompt: String,
        step: String,
        local: FlowLocalState,
    },
    Completed(FlowResult),
    /// Ended without a result; `reply` is safe to show the user.
    Failed { reply: String, reason: String },
}
