//! Deterministic collaborators for local runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream;

use crate::conversation::{FaceFeatures, Role, TurnRecord, UserProfile};
use crate::error::ToolError;
use crate::tools::{
    ChatConfig, ChatResponder, FaceAnalysis, FaceExtractor, FaceFeatureAnalyzer, FeedbackWriter,
    GuideKind, GuideStep, ProductInfo, ProductSearch, ReplyStream, SkinScorer,
};

/// Replies by acknowledging the last user turn, one word per increment.
pub struct EchoChat;

#[async_trait]
impl ChatResponder for EchoChat {
    async fn respond(
        &self,
        history: &[TurnRecord],
        _config: &ChatConfig,
    ) -> Result<ReplyStream, ToolError> {
        let last = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.trim())
            .unwrap_or_default();
        let reply = if last.is_empty() {
            "I'm here. Tell me what you'd like to work on.".to_string()
        } else {
            format!("I hear you: {last}")
        };

        let mut words: Vec<Result<String, ToolError>> = Vec::new();
        for (i, word) in reply.split(' ').enumerate() {
            let piece = if i == 0 {
                word.to_string()
            } else {
                format!(" {word}")
            };
            words.push(Ok(piece));
        }
        Ok(Box::pin(stream::iter(words)))
    }
}

/// Treats the leading bytes of any non-empty video as the face frame.
pub struct FirstFrameExtractor;

const FRAME_BYTES: usize = 1024;

#[async_trait]
impl FaceExtractor for FirstFrameExtractor {
    async fn best_frame(&self, video: &[u8]) -> Result<Vec<u8>, ToolError> {
        if video.is_empty() {
            return Err(ToolError::NoFaceDetected);
        }
        Ok(video[..video.len().min(FRAME_BYTES)].to_vec())
    }
}

/// Returns the same scores for every face.
pub struct FixedSkinScorer;

#[async_trait]
impl SkinScorer for FixedSkinScorer {
    async fn score(&self, face: &[u8]) -> Result<BTreeMap<String, u8>, ToolError> {
        if face.is_empty() {
            return Err(ToolError::InvalidInput {
                tool: "skin_scorer".into(),
                reason: "empty face image".into(),
            });
        }
        Ok(BTreeMap::from([
            ("moisture".to_string(), 80),
            ("oiliness".to_string(), 30),
            ("wrinkle".to_string(), 10),
        ]))
    }
}

pub struct FixedFaceAnalyzer;

#[async_trait]
impl FaceFeatureAnalyzer for FixedFaceAnalyzer {
    async fn analyze(&self, video: &[u8]) -> Result<FaceAnalysis, ToolError> {
        if video.is_empty() {
            return Err(ToolError::NoFaceDetected);
        }
        Ok(FaceAnalysis {
            features: FaceFeatures {
                face_shape: "oval".into(),
                eyes: "almond".into(),
                nose: "straight".into(),
                mouth: "medium lips".into(),
                eyebrows: "soft arch".into(),
            },
            skin_color: "warm medium".into(),
            skin_types: vec!["combination".into()],
        })
    }
}

/// Case-insensitive word search over a fixed catalog.
pub struct CatalogSearch {
    catalog: Vec<ProductInfo>,
}

impl CatalogSearch {
    pub fn new(catalog: Vec<ProductInfo>) -> Self {
        Self { catalog }
    }
}

impl Default for CatalogSearch {
    fn default() -> Self {
        let product = |name: &str, brand: &str, category: &str, ingredients: &[&str]| ProductInfo {
            name: name.to_string(),
            brand: brand.to_string(),
            category: category.to_string(),
            ingredients: ingredients.iter().map(|s| s.to_string()).collect(),
            description: format!("{brand} {name}, a {category}"),
        };
        Self::new(vec![
            product(
                "Hydra Glow Serum",
                "Lumen",
                "serum",
                &["hyaluronic acid", "niacinamide", "glycerin"],
            ),
            product(
                "Barrier Repair Cream",
                "Dermaline",
                "moisturizer",
                &["ceramides", "cholesterol", "squalane"],
            ),
            product(
                "Daily Shield SPF 50",
                "Solis",
                "sunscreen",
                &["zinc oxide", "vitamin e"],
            ),
            product(
                "Silk Finish Foundation",
                "Rouge Atelier",
                "foundation",
                &["water", "dimethicone", "iron oxides"],
            ),
            product(
                "Velvet Matte Lipstick",
                "Rouge Atelier",
                "lipstick",
                &["castor oil", "beeswax"],
            ),
        ])
    }
}

#[async_trait]
impl ProductSearch for CatalogSearch {
    async fn search(&self, query: &str) -> Result<Vec<ProductInfo>, ToolError> {
        let words: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(str::to_string)
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &ProductInfo)> = self
            .catalog
            .iter()
            .filter_map(|p| {
                let haystack = format!("{} {} {}", p.name, p.brand, p.category).to_lowercase();
                let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                (hits > 0).then_some((hits, p))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().map(|(_, p)| p.clone()).collect())
    }

    /// The image bytes are read as the label text.
    async fn recognize(&self, image: &[u8]) -> Result<String, ToolError> {
        match std::str::from_utf8(image).map(str::trim) {
            Ok(label) if !label.is_empty() => Ok(label.to_string()),
            _ => Err(ToolError::NotFound {
                query: "product photo".into(),
            }),
        }
    }
}

/// Fills fixed templates with the inputs.
pub struct TemplateFeedback;

#[async_trait]
impl FeedbackWriter for TemplateFeedback {
    async fn skin_report(
        &self,
        scores: &BTreeMap<String, u8>,
        _profile: &UserProfile,
    ) -> Result<String, ToolError> {
        let lines = scores
            .iter()
            .map(|(k, v)| format!("- {k}: {v}/100"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Here is your skin analysis:\n{lines}"))
    }

    async fn product_fit(
        &self,
        product: &ProductInfo,
        profile: &UserProfile,
    ) -> Result<String, ToolError> {
        let skin = if profile.skin_types.is_empty() {
            "your skin".to_string()
        } else {
            format!("{} skin", profile.skin_types.join("/"))
        };
        Ok(format!(
            "{} by {} is a {} with {}. It should suit {skin}.",
            product.name,
            product.brand,
            product.category,
            product.ingredients.join(", ")
        ))
    }

    async fn plan_routine(
        &self,
        kind: GuideKind,
        request: &str,
        feedback: Option<&str>,
        _profile: &UserProfile,
    ) -> Result<Vec<GuideStep>, ToolError> {
        let step = |title: &str, instruction: &str, product: &str| GuideStep {
            title: title.to_string(),
            instruction: instruction.to_string(),
            product: product.to_string(),
        };
        let mut steps = match kind {
            GuideKind::Skincare => vec![
                step("Cleanse", "Massage a gentle cleanser for 30 seconds, then rinse.", "cleanser"),
                step("Treat", "Press two drops of serum into the skin.", "serum"),
                step("Protect", "Apply moisturizer, then sunscreen in the morning.", "moisturizer"),
            ],
            GuideKind::Makeup => vec![
                step("Base", "Blend a thin layer of foundation outward.", "foundation"),
                step("Eyes", "Sweep a neutral shadow across the lid.", "eyeshadow"),
                step("Lips", "Line, then fill in with lipstick.", "lipstick"),
            ],
        };
        if let Some(change) = feedback.map(str::trim).filter(|f| !f.is_empty()) {
            steps.push(step("Your request", change, ""));
        }
        if let Some(first) = steps.first_mut() {
            if !request.trim().is_empty() {
                first.instruction = format!("{} (for: {})", first.instruction, request.trim());
            }
        }
        Ok(steps)
    }

    async fn step_feedback(&self, step: &GuideStep, video: &[u8]) -> Result<String, ToolError> {
        if video.is_empty() {
            return Err(ToolError::InvalidInput {
                tool: "step_feedback".into(),
                reason: "empty video".into(),
            });
        }
        Ok(format!("Nice work on \"{}\". Your technique looks right.", step.title))
    }

    async fn routine_summary(
        &self,
        kind: GuideKind,
        steps: &[GuideStep],
        _profile: &UserProfile,
    ) -> Result<String, ToolError> {
        let titles = steps
            .iter()
            .map(|s| s.title.as_str())
            .collect::<Vec<_>>()
            .join(" → ");
        Ok(format!("Your {kind} routine is done: {titles}. Great job!"))
    }

    async fn profile_summary(&self, profile: &UserProfile) -> Result<String, ToolError> {
        Ok(format!(
            "Your profile is ready, {}.\n\n{}",
            profile.name,
            profile.to_system_prompt_section()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn echo_chat_streams_words() {
        let history = vec![TurnRecord::user("hello there", vec![])];
        let stream = EchoChat
            .respond(&history, &ChatConfig::default())
            .await
            .unwrap();
        let pieces: Vec<String> = stream.map(|p| p.unwrap()).collect().await;
        assert_eq!(pieces.concat(), "I hear you: hello there");
        assert!(pieces.len() > 1);
    }

    #[tokio::test]
    async fn empty_video_has_no_face() {
        let err = FirstFrameExtractor.best_frame(b"").await.unwrap_err();
        assert!(matches!(err, ToolError::NoFaceDetected));
    }

    #[tokio::test]
    async fn catalog_search_ranks_by_hits() {
        let search = CatalogSearch::default();
        let hits = search.search("lumen hydra serum").await.unwrap();
        assert_eq!(hits[0].name, "Hydra Glow Serum");
        assert!(search.search("unicorn dust").await.unwrap().is_empty());
        assert!(search.search("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn photo_label_becomes_the_query() {
        let search = CatalogSearch::default();
        assert_eq!(
            search.recognize(b"  Lumen Hydra Glow\n").await.unwrap(),
            "Lumen Hydra Glow"
        );
        assert!(matches!(
            search.recognize(&[0xff, 0xfe]).await,
            Err(ToolError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn plan_includes_requested_change() {
        let steps = TemplateFeedback
            .plan_routine(
                GuideKind::Makeup,
                "evening look",
                Some("add blush"),
                &UserProfile::default(),
            )
            .await
            .unwrap();
        assert_eq!(steps.last().unwrap().instruction, "add blush");
        assert!(steps[0].instruction.contains("evening look"));
    }
}
