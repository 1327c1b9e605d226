//! Conversation model: thread state, history, profile and products.

pub mod profile;
pub mod state;

pub use profile::{
    FaceFeatures, ProductDirectory, ProductEntry, ProfileUpdate, SkinQuality, UserProfile,
};
pub use state::{ConversationState, Modality, Role, Suspension, ThreadId, TurnRecord};
