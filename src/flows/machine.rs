//! Step machine and the generic driver shared by every flow.
//!
//! A flow runs step after step within one turn until a step needs input it
//! does not have (the flow suspends) or the flow finishes. Suspension stores
//! a [`Progress`] so the next turn resumes at exactly that step.

use std::fmt::{Debug, Display};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::dispatcher::{ProgressSink, TurnInput};
use crate::agent::intent::IntentCategory;
use crate::config::DispatcherConfig;
use crate::conversation::{ProductDirectory, UserProfile};
use crate::error::{FlowError, ToolError};
use crate::flows::{FlowKind, FlowLocalState, FlowOutcome, FlowResult};
use crate::tools::ToolSet;

/// What a single step decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<S> {
    /// Suspend at this step. `retry` means the step rejected input it was
    /// given and is asking again.
    NeedsInput { prompt: String, retry: bool },
    /// Continue with `next` in the same turn.
    Advance { next: S },
    Done(FlowResult),
}

impl<S> StepOutcome<S> {
    pub fn ask(prompt: impl Into<String>) -> Self {
        Self::NeedsInput {
            prompt: prompt.into(),
            retry: false,
        }
    }

    pub fn retry(prompt: impl Into<String>) -> Self {
        Self::NeedsInput {
            prompt: prompt.into(),
            retry: true,
        }
    }

    pub fn advance(next: S) -> Self {
        Self::Advance { next }
    }
}

/// Serializable resume point of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress<S, D> {
    pub step: S,
    #[serde(default)]
    pub data: D,
    /// Rejected answers at the current step.
    #[serde(default)]
    pub attempts: u32,
}

impl<S, D: Default> Progress<S, D> {
    pub fn start(step: S) -> Self {
        Self {
            step,
            data: D::default(),
            attempts: 0,
        }
    }
}

/// Driver bounds.
#[derive(Debug, Clone, Copy)]
pub struct FlowLimits {
    pub max_input_retries: u32,
    pub max_transitions: usize,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for FlowLimits {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            max_input_retries: config.max_input_retries,
            max_transitions: config.max_transitions_per_turn,
        }
    }
}

/// Whether the turn started the flow or answers a suspended step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOrigin {
    Trigger,
    Resume,
}

/// The turn's input as offered to steps.
///
/// A turn answers at most one step: once any field is taken the cursor is
/// spent and later steps in the same turn see nothing.
#[derive(Debug, Clone)]
pub struct TurnCursor {
    origin: InputOrigin,
    text: Option<String>,
    image: Option<Vec<u8>>,
    video: Option<Vec<u8>>,
    spent: bool,
}

impl TurnCursor {
    pub fn new(origin: InputOrigin, input: &TurnInput) -> Self {
        let text = Some(input.text.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            origin,
            text,
            image: input.image.clone(),
            video: input.video.clone(),
            spent: false,
        }
    }

    pub fn origin(&self) -> InputOrigin {
        self.origin
    }

    /// Free-text answer to a question. Never the trigger text.
    pub fn reply_text(&mut self) -> Option<String> {
        if self.origin == InputOrigin::Trigger {
            return None;
        }
        self.request_text()
    }

    /// Text of this turn, trigger or resume.
    pub fn request_text(&mut self) -> Option<String> {
        if self.spent {
            return None;
        }
        let text = self.text.take()?;
        self.spent = true;
        Some(text)
    }

    pub fn take_video(&mut self) -> Option<Vec<u8>> {
        if self.spent {
            return None;
        }
        let video = self.video.take()?;
        self.spent = true;
        Some(video)
    }

    pub fn take_image(&mut self) -> Option<Vec<u8>> {
        if self.spent {
            return None;
        }
        let image = self.image.take()?;
        self.spent = true;
        Some(image)
    }

    /// Ask for input at the current step. A resume turn whose input went
    /// unused counts as a rejected answer.
    pub fn request<S>(&self, prompt: impl Into<String>) -> StepOutcome<S> {
        if self.origin == InputOrigin::Resume && !self.spent {
            StepOutcome::retry(prompt)
        } else {
            StepOutcome::ask(prompt)
        }
    }
}

/// Everything a step may read or call.
pub struct StepContext<'a> {
    pub cursor: TurnCursor,
    /// Category the classifier assigned to this turn.
    pub intent: IntentCategory,
    pub tools: &'a ToolSet,
    pub profile: &'a UserProfile,
    pub directory: &'a ProductDirectory,
    pub progress: &'a dyn ProgressSink,
}

/// A flow described as typed steps.
#[async_trait]
pub trait StepMachine: Send + Sync + 'static {
    type Step: Copy + PartialEq + Debug + Display + Send + Sync + Serialize + DeserializeOwned;
    type Data: Default + Clone + Debug + Send + Sync + Serialize + DeserializeOwned;

    const KIND: FlowKind;
    const INITIAL: Self::Step;

    /// Extract this flow's progress from stored state.
    fn project(local: FlowLocalState) -> Result<Progress<Self::Step, Self::Data>, FlowError>;

    fn embed(progress: Progress<Self::Step, Self::Data>) -> FlowLocalState;

    async fn run_step(
        &self,
        step: Self::Step,
        data: &mut Self::Data,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::Step>, FlowError>;
}

/// Object-safe view of a flow used by the registry and the dispatcher.
#[async_trait]
pub trait Flow: Send + Sync {
    fn kind(&self) -> FlowKind;

    /// Run from `resume` (or from the initial step when `None`) until the
    /// flow suspends or ends.
    async fn run(
        &self,
        resume: Option<FlowLocalState>,
        ctx: StepContext<'_>,
        limits: FlowLimits,
    ) -> Result<FlowOutcome, FlowError>;
}

#[async_trait]
impl<M: StepMachine> Flow for M {
    fn kind(&self) -> FlowKind {
        M::KIND
    }

    async fn run(
        &self,
        resume: Option<FlowLocalState>,
        mut ctx: StepContext<'_>,
        limits: FlowLimits,
    ) -> Result<FlowOutcome, FlowError> {
        let mut progress = match resume {
            Some(local) => M::project(local)?,
            None => {
                info!(flow = %M::KIND, "Starting flow");
                Progress::start(M::INITIAL)
            }
        };
        let mut transitions = 0usize;

        loop {
            let step = progress.step;
            let outcome = match self.run_step(step, &mut progress.data, &mut ctx).await {
                Ok(outcome) => outcome,
                Err(FlowError::Tool(e)) => {
                    warn!(flow = %M::KIND, step = %step, error = %e, "Tool failed, ending flow");
                    return Ok(FlowOutcome::Failed {
                        reply: tool_failure_reply(&e),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };

            match outcome {
                StepOutcome::NeedsInput { prompt, retry } => {
                    if retry {
                        progress.attempts += 1;
                        if progress.attempts >= limits.max_input_retries {
                            warn!(
                                flow = %M::KIND,
                                step = %step,
                                attempts = progress.attempts,
                                "Too many rejected answers, ending flow"
                            );
                            return Ok(FlowOutcome::Failed {
                                reply: format!(
                                    "Sorry, I still couldn't get what I need for the {} step. \
                                     Let's stop here. You can start again any time.",
                                    step
                                ),
                                reason: format!(
                                    "step {step} rejected input {} times",
                                    progress.attempts
                                ),
                            });
                        }
                    }
                    debug!(flow = %M::KIND, step = %step, retry, "Flow waiting for input");
                    return Ok(FlowOutcome::Suspended {
                        prompt,
                        step: step.to_string(),
                        local: M::embed(progress),
                    });
                }
                StepOutcome::Advance { next } => {
                    transitions += 1;
                    if transitions > limits.max_transitions {
                        return Err(FlowError::Runaway {
                            flow: M::KIND,
                            step: next.to_string(),
                            limit: limits.max_transitions,
                        });
                    }
                    debug!(flow = %M::KIND, from = %step, to = %next, "Step advanced");
                    progress.step = next;
                    progress.attempts = 0;
                }
                StepOutcome::Done(result) => {
                    info!(flow = %M::KIND, "Flow completed");
                    return Ok(FlowOutcome::Completed(result));
                }
            }
        }
    }
}

fn tool_failure_reply(err: &ToolError) -> String {
    match err {
        ToolError::Timeout { .. } | ToolError::Unavailable { .. } => {
            "Sorry, one of my tools is not responding right now. Please try again later."
                .to_string()
        }
        _ => "Sorry, something went wrong while I was working on that. Please try again."
            .to_string(),
    }
}

const YES_PHRASES: &[&str] = &["confirm", "done", "add it", "go ahead", "please do"];
const NO_PHRASES: &[&str] = &["not yet", "don't", "do not", "skip", "cancel", "no thanks"];

fn normalize_answer(text: &str) -> String {
    let t = text.trim().to_lowercase();
    t.trim_end_matches(['.', '!', '?']).to_string()
}

/// Read a yes/no answer. `None` when the text is neither.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let t = normalize_answer(text);
    if YES_PHRASES.contains(&t.as_str()) {
        return Some(true);
    }
    if NO_PHRASES.contains(&t.as_str()) {
        return Some(false);
    }
    let first = t.split(|c: char| !c.is_alphanumeric()).next().unwrap_or("");
    match first {
        "yes" | "y" | "yeah" | "yep" | "sure" | "ok" | "okay" => Some(true),
        "no" | "n" | "nope" | "nah" => Some(false),
        _ => None,
    }
}

/// Whether `text` is a yes/no answer and nothing more. "no" is bare,
/// "no blush, add bronzer" is not.
pub fn is_bare_yes_no(text: &str) -> bool {
    let t = normalize_answer(text);
    if YES_PHRASES.contains(&t.as_str()) || NO_PHRASES.contains(&t.as_str()) {
        return true;
    }
    !t.contains(|c: char| !c.is_alphanumeric()) && parse_yes_no(&t).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::dispatcher::NoopProgress;

    /// Counts to a target, asking for one number per turn.
    struct Counter;

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    enum CountStep {
        Ask,
        Loop,
    }

    impl std::fmt::Display for CountStep {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[async_trait]
    impl StepMachine for Counter {
        type Step = CountStep;
        type Data = ();

        const KIND: FlowKind = FlowKind::SkinAnalysis;
        const INITIAL: CountStep = CountStep::Ask;

        fn project(_local: FlowLocalState) -> Result<Progress<CountStep, ()>, FlowError> {
            Ok(Progress::start(CountStep::Ask))
        }

        // Counter has no stored variant; any placeholder works for the driver.
        fn embed(_progress: Progress<CountStep, ()>) -> FlowLocalState {
            FlowLocalState::SkinAnalysis(Progress::start(
                crate::flows::skin_analysis::SkinStep::AwaitVideo,
            ))
        }

        async fn run_step(
            &self,
            step: CountStep,
            _data: &mut (),
            ctx: &mut StepContext<'_>,
        ) -> Result<StepOutcome<CountStep>, FlowError> {
            match step {
                CountStep::Ask => match ctx.cursor.reply_text() {
                    Some(t) if t == "loop" => Ok(StepOutcome::advance(CountStep::Loop)),
                    Some(t) if t.parse::<u32>().is_ok() => Ok(StepOutcome::Done(FlowResult::reply(t))),
                    Some(_) => Ok(StepOutcome::retry("A number, please.")),
                    None => Ok(ctx.cursor.request("Give me a number.")),
                },
                CountStep::Loop => Ok(StepOutcome::advance(CountStep::Loop)),
            }
        }
    }

    fn input(text: &str) -> TurnInput {
        TurnInput::text(text)
    }

    async fn run(origin: InputOrigin, text: &str, limits: FlowLimits) -> Result<FlowOutcome, FlowError> {
        let tools = ToolSet::offline();
        let profile = UserProfile::default();
        let directory = ProductDirectory::default();
        let ctx = StepContext {
            cursor: TurnCursor::new(origin, &input(text)),
            intent: IntentCategory::Chat,
            tools: &tools,
            profile: &profile,
            directory: &directory,
            progress: &NoopProgress,
        };
        let resume = match origin {
            InputOrigin::Trigger => None,
            InputOrigin::Resume => Some(Counter::embed(Progress::start(CountStep::Ask))),
        };
        Counter.run(resume, ctx, limits).await
    }

    #[tokio::test]
    async fn trigger_text_is_not_an_answer() {
        let outcome = run(InputOrigin::Trigger, "42", FlowLimits::default()).await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Suspended { ref prompt, .. } if prompt == "Give me a number."));
    }

    #[tokio::test]
    async fn resume_answer_completes() {
        let outcome = run(InputOrigin::Resume, "42", FlowLimits::default()).await.unwrap();
        assert_eq!(outcome, FlowOutcome::Completed(FlowResult::reply("42")));
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let limits = FlowLimits {
            max_input_retries: 1,
            max_transitions: 8,
        };
        let outcome = run(InputOrigin::Resume, "banana", limits).await.unwrap();
        assert!(matches!(outcome, FlowOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn step_loops_are_cut_off() {
        let err = run(InputOrigin::Resume, "loop", FlowLimits::default()).await.unwrap_err();
        assert!(matches!(err, FlowError::Runaway { limit: 64, .. }));
    }

    #[test]
    fn cursor_gives_out_one_answer_per_turn() {
        let turn = TurnInput::text("Ana").with_video(b"clip".to_vec());
        let mut cursor = TurnCursor::new(InputOrigin::Resume, &turn);
        assert_eq!(cursor.reply_text().as_deref(), Some("Ana"));
        assert!(cursor.take_video().is_none());
        assert!(matches!(cursor.request::<()>("next?"), StepOutcome::NeedsInput { retry: false, .. }));

        let untouched = TurnCursor::new(InputOrigin::Resume, &turn);
        assert!(matches!(untouched.request::<()>("video?"), StepOutcome::NeedsInput { retry: true, .. }));
    }

    #[test]
    fn yes_no() {
        assert_eq!(parse_yes_no("Yes please"), Some(true));
        assert_eq!(parse_yes_no("ok!"), Some(true));
        assert_eq!(parse_yes_no("Nope."), Some(false));
        assert_eq!(parse_yes_no("not yet"), Some(false));
        assert_eq!(parse_yes_no("maybe later"), None);
    }

    #[test]
    fn bare_answers_have_no_extra_words() {
        assert!(is_bare_yes_no("No."));
        assert!(is_bare_yes_no("not yet"));
        assert!(is_bare_yes_no("yes!"));
        assert!(!is_bare_yes_no("no blush, add bronzer"));
        assert!(!is_bare_yes_no("yes but shorter"));
        assert!(!is_bare_yes_no("maybe"));
    }
}
