//! Event contracts for the voice router.
//!
//! This crate defines the formal event stream the engine emits — the sole
//! contract between the engine and any UI layer — plus the broadcast bus
//! that delivers it. Using shared typed payloads prevents drift between the
//! engine and its consumers.

mod bus;

pub use bus::{EventBus, Listener, SubscriptionId};

use serde::Serialize;

use sayso_dom::{ActionKind, IndexScope, RiskLevel};
use sayso_resolve::MatchKind;

/// Stable error codes surfaced in [`EventKind::EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MicPermissionDenied,
    MicNotAvailable,
    KwsInitFailed,
    VadInitFailed,
    AsrInitFailed,
    AsrFailed,
    NoSpeechDetected,
    NoMatch,
    AmbiguousMatch,
    MisconfigDuplicateLabels,
    MisconfigNoAddressableTargets,
    ExecutionFailed,
}

/// Why a capture window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureEndReason {
    Vad,
    Timeout,
    Stop,
    Cancel,
}

/// Why target resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionFailure {
    NoMatch,
    Ambiguous,
    Misconfiguration,
}

/// One event on the stream: a discriminated payload stamped with a
/// wall-clock timestamp and, when it belongs to a request, that request's
/// identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Milliseconds since epoch.
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event discriminators and their variant payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    ListeningChanged {
        enabled: bool,
    },
    KeywordDetected {
        keyword: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    CaptureStarted,
    CaptureEnded {
        reason: CaptureEndReason,
    },
    TranscriptionStarted,
    TranscriptReady {
        transcript: String,
    },
    TargetIndexBuilt {
        target_count: usize,
        scope: IndexScope,
    },
    TargetResolved {
        target_id: String,
        label: String,
        #[serde(rename = "match")]
        match_kind: MatchKind,
    },
    TargetResolutionFailed {
        reason: ResolutionFailure,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    ActionProposed {
        action: ActionKind,
        target_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        risk: Option<RiskLevel>,
    },
    ConfirmationRequired {
        action: ActionKind,
        target_id: String,
        label: String,
    },
    ActionExecuted {
        action: ActionKind,
        target_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    EngineError {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl EventKind {
    /// Short discriminator name, as serialized in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ListeningChanged { .. } => "ListeningChanged",
            EventKind::KeywordDetected { .. } => "KeywordDetected",
            EventKind::CaptureStarted => "CaptureStarted",
            EventKind::CaptureEnded { .. } => "CaptureEnded",
            EventKind::TranscriptionStarted => "TranscriptionStarted",
            EventKind::TranscriptReady { .. } => "TranscriptReady",
            EventKind::TargetIndexBuilt { .. } => "TargetIndexBuilt",
            EventKind::TargetResolved { .. } => "TargetResolved",
            EventKind::TargetResolutionFailed { .. } => "TargetResolutionFailed",
            EventKind::ActionProposed { .. } => "ActionProposed",
            EventKind::ConfirmationRequired { .. } => "ConfirmationRequired",
            EventKind::ActionExecuted { .. } => "ActionExecuted",
            EventKind::EngineError { .. } => "EngineError",
        }
    }
}
