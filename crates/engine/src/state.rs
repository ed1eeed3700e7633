//! Engine states.

use serde::Serialize;

/// The engine's finite states. Transitions are total with respect to
/// defined inputs; undefined inputs are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    ListeningOff,
    ListeningOn,
    CapturingTarget,
    Transcribing,
    ResolvingTarget,
    AwaitingConfirmation,
    Executing,
    /// Failure hold. Only an ambiguous resolution parks here waiting for a
    /// user selection; other failures pass through back to listening.
    Error,
}
