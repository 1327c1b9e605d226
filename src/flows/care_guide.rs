//! Care guide: plan a skincare or makeup routine with the user, then coach
//! them through it one step at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::intent::IntentCategory;
use crate::error::{FlowError, ToolError};
use crate::flows::machine::{
    Progress, StepContext, StepMachine, StepOutcome, is_bare_yes_no, parse_yes_no,
};
use crate::flows::{FlowKind, FlowLocalState, FlowResult};
use crate::tools::{GuideKind, GuideStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidePhase {
    CollectRequest,
    Plan,
    Confirm,
    GuideStep,
    StepCheck,
    Summary,
}

impl std::fmt::Display for GuidePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CollectRequest => "collect_request",
            Self::Plan => "plan",
            Self::Confirm => "confirm",
            Self::GuideStep => "guide_step",
            Self::StepCheck => "step_check",
            Self::Summary => "summary",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideData {
    #[serde(default)]
    kind: GuideKind,
    #[serde(default)]
    request: String,
    /// Requested changes to the last plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
    #[serde(default)]
    steps: Vec<GuideStep>,
    /// Index into `steps` of the step being coached.
    #[serde(default)]
    current: usize,
    #[serde(default)]
    last_feedback: String,
}

impl GuideData {
    fn plan_text(&self) -> String {
        let mut lines = vec![format!("Here's your {} plan:", self.kind)];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("{}. {}: {}", i + 1, step.title, step.instruction));
        }
        lines.push(String::new());
        lines.push("Reply \"confirm\" to start, or tell me what to change.".to_string());
        lines.join("\n")
    }
}

pub type GuideProgress = Progress<GuidePhase, GuideData>;

pub struct CareGuide;

impl CareGuide {
    fn current_step(data: &GuideData, phase: GuidePhase) -> Result<&GuideStep, FlowError> {
        data.steps
            .get(data.current)
            .ok_or_else(|| FlowError::MissingData {
                flow: FlowKind::CareGuide,
                step: phase.to_string(),
                missing: format!("routine step {}", data.current + 1),
            })
    }
}

fn guide_kind(intent: IntentCategory, text: &str) -> Option<GuideKind> {
    match intent {
        IntentCategory::MakeupGuide => Some(GuideKind::Makeup),
        IntentCategory::SkincareGuide => Some(GuideKind::Skincare),
        _ if text.to_lowercase().contains("makeup") => Some(GuideKind::Makeup),
        _ => None,
    }
}

#[async_trait]
impl StepMachine for CareGuide {
    type Step = GuidePhase;
    type Data = GuideData;

    const KIND: FlowKind = FlowKind::CareGuide;
    const INITIAL: GuidePhase = GuidePhase::CollectRequest;

    fn project(local: FlowLocalState) -> Result<GuideProgress, FlowError> {
        match local {
            FlowLocalState::CareGuide(progress) => Ok(progress),
            other => Err(FlowError::StateMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }

    fn embed(progress: GuideProgress) -> FlowLocalState {
        FlowLocalState::CareGuide(progress)
    }

    async fn run_step(
        &self,
        phase: GuidePhase,
        data: &mut GuideData,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<GuidePhase>, FlowError> {
        match phase {
            GuidePhase::CollectRequest => {
                let Some(request) = ctx.cursor.request_text() else {
                    return Ok(ctx.cursor.request(
                        "What would you like help with? For example a morning skincare \
                         routine or an evening makeup look.",
                    ));
                };
                if let Some(kind) = guide_kind(ctx.intent, &request) {
                    data.kind = kind;
                }
                data.request = request;
                Ok(StepOutcome::advance(GuidePhase::Plan))
            }

            GuidePhase::Plan => {
                ctx.progress.partial("Putting a plan together…");
                let steps = ctx
                    .tools
                    .feedback
                    .plan_routine(
                        data.kind,
                        &data.request,
                        data.revision.as_deref(),
                        ctx.profile,
                    )
                    .await?;
                if steps.is_empty() {
                    return Err(ToolError::ExecutionFailed {
                        tool: "plan_routine".into(),
                        reason: "empty plan".into(),
                    }
                    .into());
                }
                info!(kind = %data.kind, steps = steps.len(), "Routine planned");
                data.steps = steps;
                data.current = 0;
                Ok(StepOutcome::advance(GuidePhase::Confirm))
            }

            GuidePhase::Confirm => {
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(data.plan_text()));
                };
                // Anything beyond a plain yes/no is feedback on the plan.
                let verdict = parse_yes_no(&answer).filter(|_| is_bare_yes_no(&answer));
                match verdict {
                    Some(true) => Ok(StepOutcome::advance(GuidePhase::GuideStep)),
                    Some(false) => Ok(StepOutcome::retry(
                        "What would you like me to change in the plan?",
                    )),
                    None => {
                        debug!(revision = %answer, "Re-planning with feedback");
                        data.revision = Some(answer);
                        Ok(StepOutcome::advance(GuidePhase::Plan))
                    }
                }
            }

            GuidePhase::GuideStep => {
                let total = data.steps.len();
                let step = Self::current_step(data, phase)?.clone();
                let prompt = format!(
                    "Step {}/{total}: {}. {} Send me a short video while you do it.",
                    data.current + 1,
                    step.title,
                    step.instruction
                );
                let Some(video) = ctx.cursor.take_video() else {
                    return Ok(ctx.cursor.request(prompt));
                };
                ctx.progress.partial("Watching your technique…");
                match ctx.tools.feedback.step_feedback(&step, &video).await {
                    Ok(feedback) => {
                        data.last_feedback = feedback;
                        Ok(StepOutcome::advance(GuidePhase::StepCheck))
                    }
                    Err(e) if e.is_recoverable() => Ok(StepOutcome::retry(format!(
                        "I couldn't follow that video. {prompt}"
                    ))),
                    Err(e) => Err(e.into()),
                }
            }

            GuidePhase::StepCheck => {
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(format!(
                        "{}\n\nIs this step done? (yes/no)",
                        data.last_feedback
                    )));
                };
                match parse_yes_no(&answer) {
                    Some(true) => {
                        data.current += 1;
                        if data.current < data.steps.len() {
                            Ok(StepOutcome::advance(GuidePhase::GuideStep))
                        } else {
                            Ok(StepOutcome::advance(GuidePhase::Summary))
                        }
                    }
                    Some(false) => Ok(StepOutcome::advance(GuidePhase::GuideStep)),
                    None => Ok(StepOutcome::retry(
                        "Please answer yes or no: is this step done?",
                    )),
                }
            }

            GuidePhase::Summary => {
                let summary = ctx
                    .tools
                    .feedback
                    .routine_summary(data.kind, &data.steps, ctx.profile)
                    .await?;
                Ok(StepOutcome::Done(FlowResult::reply(summary)))
            }
        }
    }
}
