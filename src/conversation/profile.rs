//! User profile, skin assessment and product directory.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facial features read from a face video.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaceFeatures {
    pub face_shape: String,
    pub eyes: String,
    pub nose: String,
    pub mouth: String,
    pub eyebrows: String,
}

impl FaceFeatures {
    fn summary(&self) -> String {
        [
            ("face shape", &self.face_shape),
            ("eyes", &self.eyes),
            ("nose", &self.nose),
            ("mouth", &self.mouth),
            ("eyebrows", &self.eyebrows),
        ]
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Result of a skin analysis. Scores run 0..=100 per dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkinQuality {
    pub scores: BTreeMap<String, u8>,
    pub report: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Everything the assistant knows about the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(default)]
    pub face_features: FaceFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_color: Option<String>,
    #[serde(default)]
    pub skin_types: Vec<String>,
    /// Self-rated, 1..=5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makeup_skill: Option<u8>,
    /// Self-rated, 1..=5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skincare_skill: Option<u8>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_quality: Option<SkinQuality>,
    #[serde(default)]
    pub profile_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_completed_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Render the profile as a markdown section for the chat system prompt.
    pub fn to_system_prompt_section(&self) -> String {
        let mut parts = vec!["# User Profile".to_string()];

        if !self.name.is_empty() {
            parts.push(format!("- **Name:** {}", self.name));
        }
        if let Some(ref gender) = self.gender {
            parts.push(format!("- **Gender:** {gender}"));
        }
        if let Some(age) = self.age {
            parts.push(format!("- **Age:** {age}"));
        }

        let features = self.face_features.summary();
        if !features.is_empty() {
            parts.push(format!("- **Face:** {features}"));
        }
        if let Some(ref color) = self.skin_color {
            parts.push(format!("- **Skin color:** {color}"));
        }
        if !self.skin_types.is_empty() {
            parts.push(format!("- **Skin types:** {}", self.skin_types.join(", ")));
        }
        if let Some(level) = self.makeup_skill {
            parts.push(format!("- **Makeup skill:** {level}/5"));
        }
        if let Some(level) = self.skincare_skill {
            parts.push(format!("- **Skincare skill:** {level}/5"));
        }
        if !self.preferences.is_empty() {
            parts.push(format!("- **Preferences:** {}", self.preferences.join(", ")));
        }

        if let Some(ref quality) = self.skin_quality {
            let scores = quality
                .scores
                .iter()
                .map(|(k, v)| format!("{k} {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "- **Skin quality ({}):** {scores}",
                quality.analyzed_at.format("%Y-%m-%d")
            ));
        }

        if !self.profile_completed {
            parts.push("- Profile not completed yet".to_string());
        }

        parts.join("\n")
    }
}

/// Partial profile produced by a flow. `Some` fields replace, `None` fields
/// leave the profile untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_features: Option<FaceFeatures>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub makeup_skill: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skincare_skill: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_quality: Option<SkinQuality>,
    #[serde(default)]
    pub mark_completed: bool,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `profile`. Lists and the skin assessment replace whole.
    pub fn apply(self, profile: &mut UserProfile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(gender) = self.gender {
            profile.gender = Some(gender);
        }
        if let Some(age) = self.age {
            profile.age = Some(age);
        }
        if let Some(features) = self.face_features {
            profile.face_features = features;
        }
        if let Some(color) = self.skin_color {
            profile.skin_color = Some(color);
        }
        if let Some(types) = self.skin_types {
            profile.skin_types = types;
        }
        if let Some(level) = self.makeup_skill {
            profile.makeup_skill = Some(level);
        }
        if let Some(level) = self.skincare_skill {
            profile.skincare_skill = Some(level);
        }
        if let Some(preferences) = self.preferences {
            profile.preferences = preferences;
        }
        if let Some(quality) = self.skin_quality {
            profile.skin_quality = Some(quality);
        }
        if self.mark_completed && !profile.profile_completed {
            profile.profile_completed = true;
            profile.profile_completed_at = Some(Utc::now());
        }
    }
}

/// A product the user owns or considered, with the assistant's assessment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductEntry {
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// How well the product suits the user's profile.
    #[serde(default)]
    pub assessment: String,
    pub added_at: DateTime<Utc>,
}

/// The user's products, unique by case-insensitive name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductDirectory {
    #[serde(default)]
    products: Vec<ProductEntry>,
}

impl ProductDirectory {
    /// Insert, or replace the entry with the same name ignoring case.
    pub fn upsert(&mut self, entry: ProductEntry) {
        let key = entry.name.to_lowercase();
        match self
            .products
            .iter_mut()
            .find(|p| p.name.to_lowercase() == key)
        {
            Some(existing) => *existing = entry,
            None => self.products.push(entry),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProductEntry> {
        let key = name.to_lowercase();
        self.products.iter().find(|p| p.name.to_lowercase() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductEntry> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
