//! Skin analysis: face video → best frame → scores → written report.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::{ProfileUpdate, SkinQuality};
use crate::error::{FlowError, ToolError};
use crate::flows::machine::{Progress, StepContext, StepMachine, StepOutcome};
use crate::flows::{FlowKind, FlowLocalState, FlowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinStep {
    AwaitVideo,
    ExtractFace,
    Score,
    Feedback,
}

impl std::fmt::Display for SkinStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitVideo => "await_video",
            Self::ExtractFace => "extract_face",
            Self::Score => "score",
            Self::Feedback => "feedback",
        };
        write!(f, "{s}")
    }
}

/// Media is consumed within the turn that delivered it and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinData {
    #[serde(skip)]
    video: Option<Vec<u8>>,
    #[serde(skip)]
    face: Option<Vec<u8>>,
    #[serde(default)]
    scores: BTreeMap<String, u8>,
}

pub type SkinProgress = Progress<SkinStep, SkinData>;

const VIDEO_PROMPT: &str =
    "Please record a short video of your face in good light, looking at the camera.";

pub struct SkinAnalysis;

#[async_trait]
impl StepMachine for SkinAnalysis {
    type Step = SkinStep;
    type Data = SkinData;

    const KIND: FlowKind = FlowKind::SkinAnalysis;
    const INITIAL: SkinStep = SkinStep::AwaitVideo;

    fn project(local: FlowLocalState) -> Result<SkinProgress, FlowError> {
        match local {
            FlowLocalState::SkinAnalysis(progress) => Ok(progress),
            other => Err(FlowError::StateMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }

    fn embed(progress: SkinProgress) -> FlowLocalState {
        FlowLocalState::SkinAnalysis(progress)
    }

    async fn run_step(
        &self,
        step: SkinStep,
        data: &mut SkinData,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<SkinStep>, FlowError> {
        match step {
            SkinStep::AwaitVideo => match ctx.cursor.take_video() {
                Some(video) => {
                    data.video = Some(video);
                    Ok(StepOutcome::advance(SkinStep::ExtractFace))
                }
                None => Ok(ctx.cursor.request(VIDEO_PROMPT)),
            },

            SkinStep::ExtractFace => {
                // A retry at this step is answered with a new video.
                let Some(video) = data.video.take().or_else(|| ctx.cursor.take_video()) else {
                    return Ok(ctx.cursor.request(VIDEO_PROMPT));
                };
                ctx.progress.partial("Looking for the clearest frame of your face…");
                match ctx.tools.face.best_frame(&video).await {
                    Ok(frame) => {
                        data.face = Some(frame);
                        Ok(StepOutcome::advance(SkinStep::Score))
                    }
                    Err(e) if e.is_recoverable() => {
                        info!(error = %e, "No usable face in video, asking again");
                        Ok(StepOutcome::retry(format!(
                            "I couldn't see your face clearly in that video. {VIDEO_PROMPT}"
                        )))
                    }
                    Err(e) => Err(e.into()),
                }
            }

            SkinStep::Score => {
                let face = data.face.take().ok_or_else(|| FlowError::MissingData {
                    flow: Self::KIND,
                    step: step.to_string(),
                    missing: "face frame".into(),
                })?;
                ctx.progress.partial("Analyzing your skin…");
                data.scores = ctx.tools.skin.score(&face).await?;
                Ok(StepOutcome::advance(SkinStep::Feedback))
            }

            SkinStep::Feedback => {
                if data.scores.is_empty() {
                    return Err(ToolError::ExecutionFailed {
                        tool: "skin_scorer".into(),
                        reason: "no scores returned".into(),
                    }
                    .into());
                }
                let report = ctx
                    .tools
                    .feedback
                    .skin_report(&data.scores, ctx.profile)
                    .await?;
                let quality = SkinQuality {
                    scores: std::mem::take(&mut data.scores),
                    report: report.clone(),
                    analyzed_at: Utc::now(),
                };
                Ok(StepOutcome::Done(FlowResult::reply(report).with_profile(
                    ProfileUpdate {
                        skin_quality: Some(quality),
                        ..Default::default()
                    },
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::dispatcher::{NoopProgress, TurnInput};
    use crate::agent::intent::IntentCategory;
    use crate::conversation::{ProductDirectory, UserProfile};
    use crate::flows::machine::{Flow, FlowLimits, InputOrigin, TurnCursor};
    use crate::flows::FlowOutcome;
    use crate::tools::{FaceExtractor, ToolSet};

    struct NeverAFace;

    #[async_trait]
    impl FaceExtractor for NeverAFace {
        async fn best_frame(&self, _video: &[u8]) -> Result<Vec<u8>, ToolError> {
            Err(ToolError::NoFaceDetected)
        }
    }

    async fn turn(
        tools: &ToolSet,
        origin: InputOrigin,
        input: TurnInput,
        resume: Option<FlowLocalState>,
    ) -> FlowOutcome {
        let profile = UserProfile::default();
        let directory = ProductDirectory::default();
        let ctx = StepContext {
            cursor: TurnCursor::new(origin, &input),
            intent: IntentCategory::SkinAnalysis,
            tools,
            profile: &profile,
            directory: &directory,
            progress: &NoopProgress,
        };
        SkinAnalysis
            .run(resume, ctx, FlowLimits::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn asks_for_video_then_reports() {
        let tools = ToolSet::offline();
        let first = turn(&tools, InputOrigin::Trigger, TurnInput::text("check my skin"), None).await;
        let FlowOutcome::Suspended { step, local, .. } = first else {
            panic!("expected suspension");
        };
        assert_eq!(step, "await_video");

        let second = turn(
            &tools,
            InputOrigin::Resume,
            TurnInput::default().with_video(b"face-video".to_vec()),
            Some(local),
        )
        .await;
        let FlowOutcome::Completed(result) = second else {
            panic!("expected completion");
        };
        let quality = result.profile.unwrap().skin_quality.unwrap();
        assert_eq!(quality.scores["moisture"], 80);
        assert!(result.reply.contains("oiliness: 30/100"));
    }

    #[tokio::test]
    async fn video_in_trigger_turn_completes_at_once() {
        let tools = ToolSet::offline();
        let input = TurnInput::text("analyze my skin").with_video(b"clip".to_vec());
        let outcome = turn(&tools, InputOrigin::Trigger, input, None).await;
        assert!(matches!(outcome, FlowOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn no_face_asks_again_until_limit() {
        let mut tools = ToolSet::offline();
        tools.face = Arc::new(NeverAFace);
        let video = || TurnInput::default().with_video(b"blurry".to_vec());

        let first = turn(&tools, InputOrigin::Trigger, video(), None).await;
        let FlowOutcome::Suspended { step, local, .. } = first else {
            panic!("expected re-ask");
        };
        assert_eq!(step, "extract_face");

        let second = turn(&tools, InputOrigin::Resume, video(), Some(local)).await;
        let FlowOutcome::Suspended { local, .. } = second else {
            panic!("expected re-ask");
        };
        let third = turn(&tools, InputOrigin::Resume, video(), Some(local)).await;
        assert!(matches!(third, FlowOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn text_while_video_expected_is_a_retry() {
        let tools = ToolSet::offline();
        let first = turn(&tools, InputOrigin::Trigger, TurnInput::text("skin check"), None).await;
        let FlowOutcome::Suspended { local, .. } = first else {
            panic!("expected suspension");
        };
        let second = turn(&tools, InputOrigin::Resume, TurnInput::text("here"), Some(local)).await;
        let FlowOutcome::Suspended { local, .. } = second else {
            panic!("expected suspension");
        };
        let FlowLocalState::SkinAnalysis(progress) = local else {
            panic!("wrong flow");
        };
        assert_eq!(progress.attempts, 1);
    }
}
