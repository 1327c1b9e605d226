//! Profile creation: a short interview plus a face video, ending in a
//! completed user profile.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::ProfileUpdate;
use crate::error::FlowError;
use crate::flows::machine::{Progress, StepContext, StepMachine, StepOutcome};
use crate::flows::{FlowKind, FlowLocalState, FlowResult};
use crate::tools::FaceAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStep {
    Name,
    Gender,
    Age,
    FaceVideo,
    MakeupSkill,
    SkincareSkill,
    Preferences,
    Generate,
}

impl ProfileStep {
    /// The step after this one in the interview.
    pub fn next(&self) -> Option<ProfileStep> {
        use ProfileStep::*;
        match self {
            Name => Some(Gender),
            Gender => Some(Age),
            Age => Some(FaceVideo),
            FaceVideo => Some(MakeupSkill),
            MakeupSkill => Some(SkincareSkill),
            SkincareSkill => Some(Preferences),
            Preferences => Some(Generate),
            Generate => None,
        }
    }

    /// Only called by answer-collecting steps, which all have a successor.
    fn advance(self) -> StepOutcome<ProfileStep> {
        StepOutcome::advance(self.next().unwrap_or(ProfileStep::Generate))
    }
}

impl std::fmt::Display for ProfileStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Name => "name",
            Self::Gender => "gender",
            Self::Age => "age",
            Self::FaceVideo => "face_video",
            Self::MakeupSkill => "makeup_skill",
            Self::SkincareSkill => "skincare_skill",
            Self::Preferences => "preferences",
            Self::Generate => "generate",
        };
        write!(f, "{s}")
    }
}

/// Answers collected so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    age: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    face: Option<FaceAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    makeup_skill: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skincare_skill: Option<u8>,
    #[serde(default)]
    preferences: Vec<String>,
}

pub type ProfileProgress = Progress<ProfileStep, ProfileData>;

pub struct ProfileCreation;

#[async_trait]
impl StepMachine for ProfileCreation {
    type Step = ProfileStep;
    type Data = ProfileData;

    const KIND: FlowKind = FlowKind::ProfileCreation;
    const INITIAL: ProfileStep = ProfileStep::Name;

    fn project(local: FlowLocalState) -> Result<ProfileProgress, FlowError> {
        match local {
            FlowLocalState::ProfileCreation(progress) => Ok(progress),
            other => Err(FlowError::StateMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }

    fn embed(progress: ProfileProgress) -> FlowLocalState {
        FlowLocalState::ProfileCreation(progress)
    }

    async fn run_step(
        &self,
        step: ProfileStep,
        data: &mut ProfileData,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<ProfileStep>, FlowError> {
        match step {
            ProfileStep::Name => match ctx.cursor.reply_text() {
                Some(name) => {
                    data.name = Some(clean_name(&name));
                    Ok(step.advance())
                }
                None => Ok(ctx
                    .cursor
                    .request("Let's create your profile. What should I call you?")),
            },

            ProfileStep::Gender => {
                const PROMPT: &str = "What's your gender? (female, male or other)";
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(PROMPT));
                };
                match parse_gender(&answer) {
                    Some(gender) => {
                        data.gender = Some(gender.to_string());
                        Ok(step.advance())
                    }
                    None => Ok(StepOutcome::retry(format!(
                        "I didn't catch that. {PROMPT}"
                    ))),
                }
            }

            ProfileStep::Age => {
                const PROMPT: &str = "How old are you?";
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(PROMPT));
                };
                match first_number(&answer).filter(|n| (1..=120).contains(n)) {
                    Some(age) => {
                        data.age = Some(age as u8);
                        Ok(step.advance())
                    }
                    None => Ok(StepOutcome::retry(
                        "Please tell me your age as a number between 1 and 120.",
                    )),
                }
            }

            ProfileStep::FaceVideo => {
                const PROMPT: &str = "Now please record a short video of your face so I can \
                                      learn your features and skin tone.";
                let Some(video) = ctx.cursor.take_video() else {
                    return Ok(ctx.cursor.request(PROMPT));
                };
                ctx.progress.partial("Looking at your facial features…");
                match ctx.tools.features.analyze(&video).await {
                    Ok(analysis) => {
                        data.face = Some(analysis);
                        Ok(step.advance())
                    }
                    Err(e) if e.is_recoverable() => {
                        info!(error = %e, "Face analysis rejected the video");
                        Ok(StepOutcome::retry(format!(
                            "I couldn't see your face clearly. {PROMPT}"
                        )))
                    }
                    Err(e) => Err(e.into()),
                }
            }

            ProfileStep::MakeupSkill => {
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(skill_prompt("makeup")));
                };
                match parse_skill(&answer) {
                    Some(level) => {
                        data.makeup_skill = Some(level);
                        Ok(step.advance())
                    }
                    None => Ok(StepOutcome::retry(skill_retry("makeup"))),
                }
            }

            ProfileStep::SkincareSkill => {
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(skill_prompt("skincare")));
                };
                match parse_skill(&answer) {
                    Some(level) => {
                        data.skincare_skill = Some(level);
                        Ok(step.advance())
                    }
                    None => Ok(StepOutcome::retry(skill_retry("skincare"))),
                }
            }

            ProfileStep::Preferences => match ctx.cursor.reply_text() {
                Some(answer) => {
                    data.preferences = parse_preferences(&answer);
                    Ok(step.advance())
                }
                None => Ok(ctx.cursor.request(
                    "Any preferences I should know about? For example \"fragrance free, \
                     natural look\". Say \"none\" to skip.",
                )),
            },

            ProfileStep::Generate => {
                let face = data.face.clone().unwrap_or_default();
                let update = ProfileUpdate {
                    name: data.name.clone(),
                    gender: data.gender.clone(),
                    age: data.age,
                    face_features: Some(face.features),
                    skin_color: Some(face.skin_color).filter(|c| !c.is_empty()),
                    skin_types: Some(face.skin_types).filter(|t| !t.is_empty()),
                    makeup_skill: data.makeup_skill,
                    skincare_skill: data.skincare_skill,
                    preferences: Some(data.preferences.clone()),
                    skin_quality: None,
                    mark_completed: true,
                };
                let mut preview = ctx.profile.clone();
                update.clone().apply(&mut preview);
                let reply = ctx.tools.feedback.profile_summary(&preview).await?;
                Ok(StepOutcome::Done(FlowResult::reply(reply).with_profile(update)))
            }
        }
    }
}

fn skill_prompt(area: &str) -> String {
    format!("How would you rate your {area} skills from 1 (beginner) to 5 (expert)?")
}

fn skill_retry(area: &str) -> String {
    format!("Please answer with a number from 1 to 5. {}", skill_prompt(area))
}

fn parse_skill(answer: &str) -> Option<u8> {
    first_number(answer)
        .filter(|n| (1..=5).contains(n))
        .map(|n| n as u8)
}

fn clean_name(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let stripped = ["my name is ", "i'm ", "i am ", "call me "]
        .iter()
        .find_map(|prefix| lower.starts_with(prefix).then(|| &raw[prefix.len()..]))
        .unwrap_or(raw);
    stripped.trim().trim_end_matches(['.', '!']).to_string()
}

fn parse_gender(answer: &str) -> Option<&'static str> {
    let lower = answer.trim().to_lowercase();
    match lower.as_str() {
        "f" => return Some("female"),
        "m" => return Some("male"),
        _ => {}
    }
    let words: Vec<&str> = lower.split(|c: char| !c.is_alphabetic()).collect();
    let has = |options: &[&str]| words.iter().any(|w| options.contains(w));
    if has(&["female", "woman", "girl"]) {
        Some("female")
    } else if has(&["male", "man", "boy"]) {
        Some("male")
    } else if has(&["other", "nonbinary", "non", "prefer"]) {
        Some("other")
    } else {
        None
    }
}

fn first_number(text: &str) -> Option<u32> {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn parse_preferences(answer: &str) -> Vec<String> {
    let trimmed = answer.trim();
    if matches!(trimmed.to_lowercase().as_str(), "none" | "no" | "nothing" | "skip") {
        return Vec::new();
    }
    trimmed
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::dispatcher::{NoopProgress, TurnInput};
    use crate::agent::intent::IntentCategory;
    use crate::conversation::{ProductDirectory, UserProfile};
    use crate::flows::FlowOutcome;
    use crate::flows::machine::{Flow, FlowLimits, InputOrigin, TurnCursor};
    use crate::tools::ToolSet;

    async fn turn(input: TurnInput, resume: Option<FlowLocalState>) -> FlowOutcome {
        let tools = ToolSet::offline();
        let profile = UserProfile::default();
        let directory = ProductDirectory::default();
        let origin = if resume.is_some() {
            InputOrigin::Resume
        } else {
            InputOrigin::Trigger
        };
        let ctx = StepContext {
            cursor: TurnCursor::new(origin, &input),
            intent: IntentCategory::ProfileCreation,
            tools: &tools,
            profile: &profile,
            directory: &directory,
            progress: &NoopProgress,
        };
        ProfileCreation
            .run(resume, ctx, FlowLimits::default())
            .await
            .unwrap()
    }

    fn expect_step(outcome: FlowOutcome, expected: &str) -> FlowLocalState {
        match outcome {
            FlowOutcome::Suspended { step, local, .. } => {
                assert_eq!(step, expected);
                local
            }
            other => panic!("expected suspension at {expected}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_interview() {
        let local = expect_step(turn(TurnInput::text("create my profile"), None).await, "name");
        let local = expect_step(turn(TurnInput::text("My name is Ana"), Some(local)).await, "gender");
        let local = expect_step(turn(TurnInput::text("female"), Some(local)).await, "age");
        let local = expect_step(turn(TurnInput::text("I'm 29"), Some(local)).await, "face_video");
        let local = expect_step(
            turn(TurnInput::default().with_video(b"face".to_vec()), Some(local)).await,
            "makeup_skill",
        );
        let local = expect_step(turn(TurnInput::text("2"), Some(local)).await, "skincare_skill");
        let local = expect_step(turn(TurnInput::text("4"), Some(local)).await, "preferences");

        let FlowOutcome::Completed(result) =
            turn(TurnInput::text("fragrance free, natural look"), Some(local)).await
        else {
            panic!("expected completion");
        };
        let update = result.profile.unwrap();
        assert_eq!(update.name.as_deref(), Some("Ana"));
        assert_eq!(update.gender.as_deref(), Some("female"));
        assert_eq!(update.age, Some(29));
        assert_eq!(update.makeup_skill, Some(2));
        assert_eq!(update.skincare_skill, Some(4));
        assert_eq!(
            update.preferences.unwrap(),
            ["fragrance free", "natural look"]
        );
        assert_eq!(update.face_features.unwrap().face_shape, "oval");
        assert!(update.mark_completed);
        assert!(result.reply.contains("Ana"));
    }

    #[tokio::test]
    async fn invalid_answers_are_retried_at_the_same_step() {
        let local = expect_step(turn(TurnInput::text("create my profile"), None).await, "name");
        let local = expect_step(turn(TurnInput::text("Ana"), Some(local)).await, "gender");
        let local = expect_step(turn(TurnInput::text("female"), Some(local)).await, "age");
        let local = expect_step(turn(TurnInput::text("200"), Some(local)).await, "age");
        let FlowLocalState::ProfileCreation(ref progress) = local else {
            panic!("wrong flow");
        };
        assert_eq!(progress.attempts, 1);
        expect_step(turn(TurnInput::text("35"), Some(local)).await, "face_video");
    }

    #[test]
    fn steps_walk_in_order() {
        let mut step = ProfileStep::Name;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.last(), Some(&ProfileStep::Generate));
    }

    #[test]
    fn answer_parsing() {
        assert_eq!(clean_name("My name is Ana."), "Ana");
        assert_eq!(clean_name("Bea"), "Bea");
        assert_eq!(parse_gender("I'm a woman"), Some("female"));
        assert_eq!(parse_gender("Male"), Some("male"));
        assert_eq!(parse_gender("prefer not to say"), Some("other"));
        assert_eq!(parse_gender("banana"), None);
        assert_eq!(first_number("about 42 years"), Some(42));
        assert!(parse_preferences("none").is_empty());
    }
}
