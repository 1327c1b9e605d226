//! Turn handling: intent classification and flow dispatch.

pub mod dispatcher;
pub mod intent;

pub use dispatcher::{
    Dispatcher, Disposition, NoopProgress, ProgressSink, Route, TurnInput, TurnOutcome,
};
pub use intent::{ActiveVerdict, IntentCategory, IntentClassifier, KeywordClassifier};
