//! Per-turn routing: decide whether a turn starts, resumes or switches a
//! flow, or goes to free chat, then fold the result back into the
//! conversation state.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::agent::intent::{ActiveVerdict, IntentCategory, IntentClassifier, KeywordClassifier};
use crate::config::DispatcherConfig;
use crate::conversation::{ConversationState, Modality, ThreadId, TurnRecord};
use crate::error::CheckpointError;
use crate::flows::machine::{FlowLimits, InputOrigin, StepContext, TurnCursor};
use crate::flows::{FlowKind, FlowLocalState, FlowOutcome, FlowRegistry};
use crate::store::{CheckpointStore, InMemoryCheckpointStore};
use crate::tools::{ChatConfig, ToolSet};

/// One user turn as it reaches the dispatcher. Media is raw bytes.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub image: Option<Vec<u8>>,
    pub audio: Option<Vec<u8>>,
    pub video: Option<Vec<u8>>,
    /// Overrides the configured chat system prompt.
    pub system_prompt: Option<String>,
    /// Voice for a spoken reply. No audio is produced when unset.
    pub voice: Option<String>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_video(mut self, video: Vec<u8>) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Which kinds of content the turn carries.
    pub fn modalities(&self) -> Vec<Modality> {
        let mut kinds = Vec::new();
        if !self.text.trim().is_empty() {
            kinds.push(Modality::Text);
        }
        if self.image.is_some() {
            kinds.push(Modality::Image);
        }
        if self.audio.is_some() {
            kinds.push(Modality::Audio);
        }
        if self.video.is_some() {
            kinds.push(Modality::Video);
        }
        kinds
    }
}

/// Receives the growing reply text while a turn is being handled.
pub trait ProgressSink: Send + Sync {
    fn partial(&self, text: &str);
}

/// Discards progress.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn partial(&self, _text: &str) {}
}

/// Where a turn goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Chat,
    Start(FlowKind),
    Resume(FlowKind),
    /// Drop the suspended `from` flow and start `to`.
    Switch { from: FlowKind, to: FlowKind },
}

/// Routing decision from the active flow and the classifier's verdict.
///
/// Chat while a flow is active resumes it: off-topic or ambiguous turns are
/// treated as answers. Categories are compared by flow, so both guide
/// categories continue a running care guide.
pub fn decide_route(active: Option<FlowKind>, verdict: ActiveVerdict) -> Route {
    match (active, verdict) {
        (None, ActiveVerdict::Continue) => Route::Chat,
        (None, ActiveVerdict::Category(category)) => {
            category.flow().map(Route::Start).unwrap_or(Route::Chat)
        }
        (Some(active), ActiveVerdict::Continue) => Route::Resume(active),
        (Some(active), ActiveVerdict::Category(category)) => match category.flow() {
            Some(to) if to != active => Route::Switch { from: active, to },
            _ => Route::Resume(active),
        },
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Chat,
    Suspended { flow: FlowKind, step: String },
    Completed { flow: FlowKind },
    /// `flow` is `None` when free chat failed.
    Failed {
        flow: Option<FlowKind>,
        reason: String,
    },
}

impl Disposition {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Spoken reply, when a voice was requested and synthesis succeeded.
    pub audio: Option<Vec<u8>>,
    pub disposition: Disposition,
    /// Flow discarded by a switch in this turn.
    pub interrupted: Option<FlowKind>,
}

const CHAT_FAILURE_REPLY: &str =
    "Sorry, I couldn't come up with a reply just now. Please try again.";

/// Routes turns to flows or chat and keeps conversation state current.
pub struct Dispatcher {
    config: DispatcherConfig,
    classifier: Arc<dyn IntentClassifier>,
    registry: FlowRegistry,
    tools: ToolSet,
    store: Arc<dyn CheckpointStore>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        classifier: Arc<dyn IntentClassifier>,
        registry: FlowRegistry,
        tools: ToolSet,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            classifier,
            registry,
            tools,
            store,
        }
    }

    /// Keyword classifier, built-in flows, offline tools, in-memory store.
    pub fn offline(config: DispatcherConfig) -> Self {
        Self::new(
            config,
            Arc::new(KeywordClassifier::default_rules()),
            FlowRegistry::with_defaults(),
            ToolSet::offline(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Load the thread's state (or start one), dispatch, save.
    pub async fn handle_turn(
        &self,
        thread_id: &ThreadId,
        input: TurnInput,
        sink: &dyn ProgressSink,
    ) -> Result<TurnOutcome, CheckpointError> {
        let mut state = match self.store.load(thread_id).await? {
            Some(state) => state,
            None => {
                info!(thread_id = %thread_id, "Starting new conversation");
                ConversationState::new(thread_id.clone())
            }
        };
        let outcome = self.dispatch(&mut state, input, sink).await;
        self.store.save(&state).await?;
        Ok(outcome)
    }

    /// A fresh thread id. Nothing is stored until its first turn.
    pub fn new_chat(&self) -> ThreadId {
        let id = ThreadId::new();
        info!(thread_id = %id, "New chat");
        id
    }

    /// Forget everything about `thread_id`.
    pub async fn clear_history(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        info!(thread_id = %thread_id, "Clearing history");
        self.store.delete(thread_id).await
    }

    /// Handle one turn against in-memory state.
    pub async fn dispatch(
        &self,
        state: &mut ConversationState,
        mut input: TurnInput,
        sink: &dyn ProgressSink,
    ) -> TurnOutcome {
        self.transcribe(&mut input).await;

        if let Some(expired) = state.expire_suspension(Utc::now(), self.config.suspend_ttl) {
            info!(thread_id = %state.thread_id, flow = %expired, "Suspended flow expired");
        }

        state.push_turn(TurnRecord::user(input.text.clone(), input.modalities()));

        let active = state.active_flow();
        let verdict = self.classify(&input.text, active).await;
        let route = decide_route(active, verdict);
        let intent = match verdict {
            ActiveVerdict::Category(category) => category,
            ActiveVerdict::Continue => IntentCategory::Chat,
        };
        info!(
            thread_id = %state.thread_id,
            route = ?route,
            intent = %intent,
            "Routing turn"
        );

        let mut outcome = match route {
            Route::Chat => self.chat(state, &input, sink).await,
            Route::Start(kind) => {
                self.run_flow(state, kind, None, intent, &input, sink)
                    .await
            }
            Route::Resume(kind) => {
                let resume = state.clear_flow().map(|s| s.local);
                self.run_flow(state, kind, resume, intent, &input, sink)
                    .await
            }
            Route::Switch { from, to } => {
                info!(thread_id = %state.thread_id, from = %from, to = %to, "Switching flow");
                state.clear_flow();
                let mut outcome = self
                    .run_flow(state, to, None, intent, &input, sink)
                    .await;
                outcome.interrupted = Some(from);
                outcome
            }
        };

        state.push_turn(TurnRecord::assistant(outcome.reply.clone()));
        outcome.audio = self.speak(&outcome.reply, input.voice.as_deref()).await;
        outcome
    }

    async fn transcribe(&self, input: &mut TurnInput) {
        if !input.text.trim().is_empty() {
            return;
        }
        let (Some(audio), Some(transcriber)) = (&input.audio, &self.tools.transcriber) else {
            return;
        };
        match transcriber.transcribe(audio).await {
            Ok(transcript) => {
                debug!(chars = transcript.len(), "Transcribed audio turn");
                input.text = transcript;
            }
            Err(e) => warn!(error = %e, "Transcription failed, continuing without text"),
        }
    }

    /// Classifier failures fall back to continue (flow active) or chat.
    async fn classify(&self, text: &str, active: Option<FlowKind>) -> ActiveVerdict {
        match active {
            Some(kind) => match self.classifier.classify_given_active(text, kind).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(error = %e, flow = %kind, "Classifier failed, continuing active flow");
                    ActiveVerdict::Continue
                }
            },
            None => match self.classifier.classify(text).await {
                Ok(category) => ActiveVerdict::Category(category),
                Err(e) => {
                    warn!(error = %e, "Classifier failed, treating turn as chat");
                    ActiveVerdict::Category(IntentCategory::Chat)
                }
            },
        }
    }

    /// Run a flow for this turn. `resume` is `None` when the turn starts it.
    async fn run_flow(
        &self,
        state: &mut ConversationState,
        kind: FlowKind,
        resume: Option<FlowLocalState>,
        intent: IntentCategory,
        input: &TurnInput,
        sink: &dyn ProgressSink,
    ) -> TurnOutcome {
        let origin = if resume.is_some() {
            InputOrigin::Resume
        } else {
            InputOrigin::Trigger
        };

        let result = match self.registry.get(kind) {
            Ok(flow) => {
                let ctx = StepContext {
                    cursor: TurnCursor::new(origin, input),
                    intent,
                    tools: &self.tools,
                    profile: &state.user_profile,
                    directory: &state.product_directory,
                    progress: sink,
                };
                flow.run(resume, ctx, FlowLimits::from(&self.config)).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(FlowOutcome::Suspended {
                prompt,
                step,
                local,
            }) => {
                debug!(thread_id = %state.thread_id, flow = %kind, step = %step, "Flow suspended");
                state.suspend(local, prompt.clone());
                TurnOutcome {
                    reply: prompt,
                    audio: None,
                    disposition: Disposition::Suspended { flow: kind, step },
                    interrupted: None,
                }
            }
            Ok(FlowOutcome::Completed(result)) => {
                if let Some(update) = result.profile {
                    update.apply(&mut state.user_profile);
                }
                if let Some(entry) = result.product {
                    info!(thread_id = %state.thread_id, product = %entry.name, "Product saved");
                    state.product_directory.upsert(entry);
                }
                TurnOutcome {
                    reply: result.reply,
                    audio: None,
                    disposition: Disposition::Completed { flow: kind },
                    interrupted: None,
                }
            }
            Ok(FlowOutcome::Failed { reply, reason }) => {
                warn!(thread_id = %state.thread_id, flow = %kind, reason = %reason, "Flow failed");
                TurnOutcome {
                    reply,
                    audio: None,
                    disposition: Disposition::Failed {
                        flow: Some(kind),
                        reason,
                    },
                    interrupted: None,
                }
            }
            Err(e) => {
                error!(
                    thread_id = %state.thread_id,
                    flow = %kind,
                    error = %e,
                    "Flow error, falling back to chat"
                );
                state.clear_flow();
                self.chat(state, input, sink).await
            }
        }
    }

    /// Free chat over the whole history, streaming increments to `sink`.
    async fn chat(
        &self,
        state: &ConversationState,
        input: &TurnInput,
        sink: &dyn ProgressSink,
    ) -> TurnOutcome {
        let base = input
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.config.default_system_prompt.clone());
        let profile = &state.user_profile;
        let system_prompt = if profile.profile_completed || !profile.name.is_empty() {
            format!("{base}\n\n{}", profile.to_system_prompt_section())
        } else {
            base
        };
        let config = ChatConfig { system_prompt };

        let failed = |reason: String| TurnOutcome {
            reply: CHAT_FAILURE_REPLY.to_string(),
            audio: None,
            disposition: Disposition::Failed { flow: None, reason },
            interrupted: None,
        };

        let mut stream = match self.tools.chat.respond(state.messages(), &config).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(thread_id = %state.thread_id, error = %e, "Chat responder failed");
                return failed(e.to_string());
            }
        };

        let mut reply = String::new();
        while let Some(piece) = stream.next().await {
            match piece {
                Ok(piece) => {
                    reply.push_str(&piece);
                    sink.partial(&reply);
                }
                Err(e) if reply.is_empty() => {
                    error!(thread_id = %state.thread_id, error = %e, "Chat stream failed");
                    return failed(e.to_string());
                }
                Err(e) => {
                    warn!(error = %e, "Chat stream ended early, keeping partial reply");
                    break;
                }
            }
        }

        TurnOutcome {
            reply,
            audio: None,
            disposition: Disposition::Chat,
            interrupted: None,
        }
    }

    async fn speak(&self, reply: &str, voice: Option<&str>) -> Option<Vec<u8>> {
        let (Some(voice), Some(speech)) = (voice, &self.tools.speech) else {
            return None;
        };
        match speech.synthesize(reply, voice).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(error = %e, voice = %voice, "Speech synthesis failed, replying with text only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{ClassifierError, FlowError, ToolError};
    use crate::flows::machine::{Progress, StepMachine, StepOutcome};
    use crate::flows::skin_analysis::SkinStep;
    use crate::tools::{SpeechSynthesizer, Transcriber};

    struct BrokenClassifier;

    #[async_trait]
    impl IntentClassifier for BrokenClassifier {
        async fn classify(&self, _text: &str) -> Result<IntentCategory, ClassifierError> {
            Err(ClassifierError::RequestFailed("offline".into()))
        }

        async fn classify_given_active(
            &self,
            _text: &str,
            _active: FlowKind,
        ) -> Result<ActiveVerdict, ClassifierError> {
            Err(ClassifierError::RequestFailed("offline".into()))
        }
    }

    /// Skin analysis stand-in that never stops advancing.
    struct Spinner;

    #[async_trait]
    impl StepMachine for Spinner {
        type Step = SkinStep;
        type Data = ();

        const KIND: FlowKind = FlowKind::SkinAnalysis;
        const INITIAL: SkinStep = SkinStep::AwaitVideo;

        fn project(_local: FlowLocalState) -> Result<Progress<SkinStep, ()>, FlowError> {
            Ok(Progress::start(SkinStep::AwaitVideo))
        }

        fn embed(_progress: Progress<SkinStep, ()>) -> FlowLocalState {
            FlowLocalState::SkinAnalysis(Progress::start(SkinStep::AwaitVideo))
        }

        async fn run_step(
            &self,
            _step: SkinStep,
            _data: &mut (),
            _ctx: &mut StepContext<'_>,
        ) -> Result<StepOutcome<SkinStep>, FlowError> {
            Ok(StepOutcome::advance(SkinStep::ExtractFace))
        }
    }

    struct FixedTranscript;

    #[async_trait]
    impl Transcriber for FixedTranscript {
        async fn transcribe(&self, _audio: &[u8]) -> Result<String, ToolError> {
            Ok("please analyze my skin".into())
        }
    }

    struct Mute;

    #[async_trait]
    impl SpeechSynthesizer for Mute {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, ToolError> {
            Err(ToolError::Unavailable {
                tool: "tts".into(),
                reason: "no speaker".into(),
            })
        }
    }

    struct Loud;

    #[async_trait]
    impl SpeechSynthesizer for Loud {
        async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ToolError> {
            Ok(format!("{voice}:{text}").into_bytes())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressSink for Recorder {
        fn partial(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::offline(DispatcherConfig::default())
    }

    fn state() -> ConversationState {
        ConversationState::new("t1".into())
    }

    #[test]
    fn routing_table() {
        use IntentCategory::*;
        let verdict = ActiveVerdict::Category;
        assert_eq!(decide_route(None, verdict(Chat)), Route::Chat);
        assert_eq!(
            decide_route(None, verdict(SkinAnalysis)),
            Route::Start(FlowKind::SkinAnalysis)
        );
        assert_eq!(decide_route(None, ActiveVerdict::Continue), Route::Chat);

        let active = Some(FlowKind::CareGuide);
        assert_eq!(
            decide_route(active, ActiveVerdict::Continue),
            Route::Resume(FlowKind::CareGuide)
        );
        assert_eq!(decide_route(active, verdict(Chat)), Route::Resume(FlowKind::CareGuide));
        assert_eq!(
            decide_route(active, verdict(SkincareGuide)),
            Route::Resume(FlowKind::CareGuide)
        );
        assert_eq!(
            decide_route(active, verdict(ProductAnalysis)),
            Route::Switch {
                from: FlowKind::CareGuide,
                to: FlowKind::ProductAnalysis
            }
        );
    }

    #[tokio::test]
    async fn chat_streams_to_the_sink() {
        let dispatcher = dispatcher();
        let mut state = state();
        let sink = Recorder::default();
        let outcome = dispatcher
            .dispatch(&mut state, TurnInput::text("hello there"), &sink)
            .await;
        assert_eq!(outcome.disposition, Disposition::Chat);
        assert_eq!(outcome.reply, "I hear you: hello there");
        let partials = sink.0.lock().unwrap();
        assert!(partials.len() > 1);
        assert_eq!(partials.last().unwrap(), &outcome.reply);
        assert_eq!(state.messages().len(), 2);
        assert!(state.active_flow().is_none());
    }

    #[tokio::test]
    async fn suspend_then_resume_with_media() {
        let dispatcher = dispatcher();
        let mut state = state();
        let first = dispatcher
            .dispatch(&mut state, TurnInput::text("check my skin"), &NoopProgress)
            .await;
        assert_eq!(
            first.disposition,
            Disposition::Suspended {
                flow: FlowKind::SkinAnalysis,
                step: "await_video".into()
            }
        );
        assert!(state.awaiting_resume());

        let second = dispatcher
            .dispatch(
                &mut state,
                TurnInput::default().with_video(b"face".to_vec()),
                &NoopProgress,
            )
            .await;
        assert_eq!(
            second.disposition,
            Disposition::Completed {
                flow: FlowKind::SkinAnalysis
            }
        );
        assert!(!state.awaiting_resume());
        assert!(state.user_profile.skin_quality.is_some());
    }

    #[tokio::test]
    async fn classifier_failure_defaults() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(BrokenClassifier),
            FlowRegistry::with_defaults(),
            ToolSet::offline(),
            Arc::new(InMemoryCheckpointStore::new()),
        );

        let mut idle = state();
        let outcome = dispatcher
            .dispatch(&mut idle, TurnInput::text("check my skin"), &NoopProgress)
            .await;
        assert_eq!(outcome.disposition, Disposition::Chat);

        let mut busy = state();
        busy.suspend(
            FlowLocalState::SkinAnalysis(Progress::start(SkinStep::AwaitVideo)),
            "Send a video",
        );
        let outcome = dispatcher
            .dispatch(
                &mut busy,
                TurnInput::default().with_video(b"face".to_vec()),
                &NoopProgress,
            )
            .await;
        assert_eq!(
            outcome.disposition,
            Disposition::Completed {
                flow: FlowKind::SkinAnalysis
            }
        );
    }

    #[tokio::test]
    async fn runaway_flow_degrades_to_chat() {
        let mut registry = FlowRegistry::with_defaults();
        registry.register(Arc::new(Spinner));
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(KeywordClassifier::default_rules()),
            registry,
            ToolSet::offline(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let mut state = state();
        let outcome = dispatcher
            .dispatch(&mut state, TurnInput::text("check my skin"), &NoopProgress)
            .await;
        assert_eq!(outcome.disposition, Disposition::Chat);
        assert_eq!(outcome.reply, "I hear you: check my skin");
        assert!(state.active_flow().is_none());
    }

    #[tokio::test]
    async fn expired_suspension_is_dropped() {
        let config = DispatcherConfig {
            suspend_ttl: std::time::Duration::ZERO,
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::offline(config);
        let mut state = state();
        dispatcher
            .dispatch(&mut state, TurnInput::text("check my skin"), &NoopProgress)
            .await;
        assert!(state.awaiting_resume());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let outcome = dispatcher
            .dispatch(&mut state, TurnInput::text("thanks"), &NoopProgress)
            .await;
        assert_eq!(outcome.disposition, Disposition::Chat);
        assert!(!state.awaiting_resume());
    }

    #[tokio::test]
    async fn audio_only_turn_is_transcribed() {
        let mut tools = ToolSet::offline();
        tools.transcriber = Some(Arc::new(FixedTranscript));
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(KeywordClassifier::default_rules()),
            FlowRegistry::with_defaults(),
            tools,
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let mut state = state();
        let outcome = dispatcher
            .dispatch(
                &mut state,
                TurnInput::default().with_audio(b"pcm".to_vec()),
                &NoopProgress,
            )
            .await;
        assert!(matches!(
            outcome.disposition,
            Disposition::Suspended {
                flow: FlowKind::SkinAnalysis,
                ..
            }
        ));
        let first = &state.messages()[0];
        assert_eq!(first.content, "please analyze my skin");
        assert_eq!(first.modalities, vec![Modality::Text, Modality::Audio]);
    }

    #[tokio::test]
    async fn speech_is_optional() {
        let mut tools = ToolSet::offline();
        tools.speech = Some(Arc::new(Loud));
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(KeywordClassifier::default_rules()),
            FlowRegistry::with_defaults(),
            tools.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let input = TurnInput::text("hi").with_voice("nova");
        let outcome = dispatcher.dispatch(&mut state(), input.clone(), &NoopProgress).await;
        assert_eq!(outcome.audio.unwrap(), b"nova:I hear you: hi");

        let plain = dispatcher
            .dispatch(&mut state(), TurnInput::text("hi"), &NoopProgress)
            .await;
        assert!(plain.audio.is_none());

        tools.speech = Some(Arc::new(Mute));
        let muted = Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(KeywordClassifier::default_rules()),
            FlowRegistry::with_defaults(),
            tools,
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let outcome = muted.dispatch(&mut state(), input, &NoopProgress).await;
        assert!(outcome.audio.is_none());
        assert_eq!(outcome.reply, "I hear you: hi");
    }

    #[tokio::test]
    async fn handle_turn_persists_and_clear_history_forgets() {
        let dispatcher = dispatcher();
        let thread = dispatcher.new_chat();
        dispatcher
            .handle_turn(&thread, TurnInput::text("check my skin"), &NoopProgress)
            .await
            .unwrap();
        let outcome = dispatcher
            .handle_turn(
                &thread,
                TurnInput::default().with_video(b"face".to_vec()),
                &NoopProgress,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.disposition,
            Disposition::Completed {
                flow: FlowKind::SkinAnalysis
            }
        );

        dispatcher.clear_history(&thread).await.unwrap();
        assert!(dispatcher.store.load(&thread).await.unwrap().is_none());
    }
}
