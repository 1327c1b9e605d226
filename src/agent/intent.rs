//! Intent classification: which flow, if any, a turn belongs to.
//!
//! The model-backed classifier lives outside this crate; its raw output is
//! read back through [`parse_category`] and [`parse_verdict`], which accept
//! noisy text. [`KeywordClassifier`] is a regex-based stand-in for local
//! runs and tests.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifierError;
use crate::flows::FlowKind;

/// Intent of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Chat,
    ProfileCreation,
    SkinAnalysis,
    ProductAnalysis,
    MakeupGuide,
    SkincareGuide,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 6] = [
        Self::Chat,
        Self::ProfileCreation,
        Self::SkinAnalysis,
        Self::ProductAnalysis,
        Self::MakeupGuide,
        Self::SkincareGuide,
    ];

    /// Flow that handles this category. `None` for free chat.
    pub fn flow(self) -> Option<FlowKind> {
        match self {
            Self::Chat => None,
            Self::ProfileCreation => Some(FlowKind::ProfileCreation),
            Self::SkinAnalysis => Some(FlowKind::SkinAnalysis),
            Self::ProductAnalysis => Some(FlowKind::ProductAnalysis),
            Self::MakeupGuide | Self::SkincareGuide => Some(FlowKind::CareGuide),
        }
    }
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::ProfileCreation => "profile_creation",
            Self::SkinAnalysis => "skin_analysis",
            Self::ProductAnalysis => "product_analysis",
            Self::MakeupGuide => "makeup_guide",
            Self::SkincareGuide => "skincare_guide",
        };
        write!(f, "{s}")
    }
}

/// Classification of a turn while a flow is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveVerdict {
    /// The turn answers the suspended flow.
    Continue,
    Category(IntentCategory),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify a turn when no flow is active.
    async fn classify(&self, text: &str) -> Result<IntentCategory, ClassifierError>;

    /// Classify a turn while `active` waits for input.
    async fn classify_given_active(
        &self,
        text: &str,
        active: FlowKind,
    ) -> Result<ActiveVerdict, ClassifierError>;
}

/// Find the first known label in raw model output.
fn find_label(raw: &str) -> Option<IntentCategory> {
    let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
    // Specific labels first; "chat" can appear inside other words.
    IntentCategory::ALL
        .iter()
        .rev()
        .copied()
        .find(|c| normalized.contains(&c.to_string()))
}

/// Read a category out of raw model output, defaulting to chat.
pub fn parse_category(raw: &str) -> IntentCategory {
    find_label(raw).unwrap_or(IntentCategory::Chat)
}

/// Read a verdict out of raw model output, defaulting to continue.
pub fn parse_verdict(raw: &str) -> ActiveVerdict {
    if raw.to_lowercase().contains("continue") {
        return ActiveVerdict::Continue;
    }
    find_label(raw)
        .map(ActiveVerdict::Category)
        .unwrap_or(ActiveVerdict::Continue)
}

/// A category with its trigger pattern.
#[derive(Debug, Clone)]
struct KeywordRule {
    regex: Regex,
    category: IntentCategory,
}

/// Regex classifier. Rules are checked in order; the first match wins.
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    pub fn default_rules() -> Self {
        let rules = vec![
            KeywordRule {
                regex: Regex::new(
                    r"(?i)\b(create|set\s*up|make|build|start|fill\s*in)\b.{0,30}\bprofile\b",
                )
                .unwrap(),
                category: IntentCategory::ProfileCreation,
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(\b(analy[sz]e|check|scan|assess|examine)\b.{0,30}\bskin\b|\bskin\s+(analysis|check|scan|test)\b)",
                )
                .unwrap(),
                category: IntentCategory::SkinAnalysis,
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(\bmake\s?up\b.{0,40}\b(guide|routine|look|tutorial|lesson)\b|\b(guide|teach|help|show)\b.{0,40}\bmake\s?up\b)",
                )
                .unwrap(),
                category: IntentCategory::MakeupGuide,
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)(\bskin\s?care\b.{0,40}\b(guide|routine|tutorial|steps)\b|\b(guide|teach|help|show)\b.{0,40}\bskin\s?care\b|\b(morning|evening|night)\s+routine\b)",
                )
                .unwrap(),
                category: IntentCategory::SkincareGuide,
            },
            KeywordRule {
                regex: Regex::new(
                    r"(?i)\b(analy[sz]e|check|review|evaluate|look\s+at|is|recommend|suggest|find)\b.{0,40}\b(product|serum|cream|moisturi[sz]er|cleanser|sunscreen|spf|toner|lipstick|foundation|mascara|concealer)s?\b",
                )
                .unwrap(),
                category: IntentCategory::ProductAnalysis,
            },
        ];
        Self { rules }
    }

    /// A classifier with no rules; everything is chat.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a custom rule after the existing ones.
    pub fn add_rule(&mut self, pattern: &str, category: IntentCategory) -> Result<(), regex::Error> {
        self.rules.push(KeywordRule {
            regex: Regex::new(pattern)?,
            category,
        });
        Ok(())
    }

    fn evaluate(&self, text: &str) -> Option<IntentCategory> {
        let hit = self
            .rules
            .iter()
            .find(|rule| rule.regex.is_match(text))
            .map(|rule| rule.category);
        if let Some(category) = hit {
            debug!(category = %category, "Turn matched keyword rule");
        }
        hit
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<IntentCategory, ClassifierError> {
        Ok(self.evaluate(text).unwrap_or(IntentCategory::Chat))
    }

    async fn classify_given_active(
        &self,
        text: &str,
        _active: FlowKind,
    ) -> Result<ActiveVerdict, ClassifierError> {
        Ok(self
            .evaluate(text)
            .map(ActiveVerdict::Category)
            .unwrap_or(ActiveVerdict::Continue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serde() {
        for category in IntentCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }

    #[test]
    fn guides_share_the_care_flow() {
        assert_eq!(IntentCategory::MakeupGuide.flow(), Some(FlowKind::CareGuide));
        assert_eq!(IntentCategory::SkincareGuide.flow(), Some(FlowKind::CareGuide));
        assert_eq!(IntentCategory::Chat.flow(), None);
    }

    #[test]
    fn noisy_labels_are_tolerated() {
        assert_eq!(parse_category("  Skin Analysis\n"), IntentCategory::SkinAnalysis);
        assert_eq!(
            parse_category("Category: makeup-guide."),
            IntentCategory::MakeupGuide
        );
        assert_eq!(parse_category("I am not sure"), IntentCategory::Chat);
        assert_eq!(parse_verdict("CONTINUE"), ActiveVerdict::Continue);
        assert_eq!(
            parse_verdict("product_analysis"),
            ActiveVerdict::Category(IntentCategory::ProductAnalysis)
        );
        assert_eq!(parse_verdict("hmm"), ActiveVerdict::Continue);
    }

    #[tokio::test]
    async fn keyword_rules() {
        let classifier = KeywordClassifier::default_rules();
        let cases = [
            ("Please create my profile", IntentCategory::ProfileCreation),
            ("can you analyze my skin?", IntentCategory::SkinAnalysis),
            ("analyze the Hydra Glow serum", IntentCategory::ProductAnalysis),
            ("actually, recommend me a foundation", IntentCategory::ProductAnalysis),
            ("help me with an evening makeup look", IntentCategory::MakeupGuide),
            ("guide me through my skincare routine", IntentCategory::SkincareGuide),
            ("how are you today?", IntentCategory::Chat),
        ];
        for (text, expected) in cases {
            assert_eq!(classifier.classify(text).await.unwrap(), expected, "{text}");
        }
    }

    #[tokio::test]
    async fn plain_answers_continue_the_active_flow() {
        let classifier = KeywordClassifier::default_rules();
        let verdict = classifier
            .classify_given_active("28", FlowKind::ProfileCreation)
            .await
            .unwrap();
        assert_eq!(verdict, ActiveVerdict::Continue);

        let verdict = classifier
            .classify_given_active("actually, check my skin", FlowKind::ProfileCreation)
            .await
            .unwrap();
        assert_eq!(verdict, ActiveVerdict::Category(IntentCategory::SkinAnalysis));
    }

    #[tokio::test]
    async fn custom_rules_extend_the_defaults() {
        let mut classifier = KeywordClassifier::empty();
        assert_eq!(classifier.classify("scan my face").await.unwrap(), IntentCategory::Chat);
        classifier
            .add_rule(r"(?i)\bscan my face\b", IntentCategory::SkinAnalysis)
            .unwrap();
        assert_eq!(
            classifier.classify("scan my face").await.unwrap(),
            IntentCategory::SkinAnalysis
        );
    }
}
