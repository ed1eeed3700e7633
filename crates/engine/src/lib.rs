//! The engine: a finite state machine coupling keyword detection, speech
//! capture, transcription, target resolution, and action execution.
//!
//! Everything runs on one logical thread. Audio frames arrive through
//! [`VoiceEngine::on_frame`]; pipelines return event vectors instead of
//! re-entrant callbacks, and timers are deadlines checked on each tick.
//! State transitions publish typed events on the bus, which is the sole
//! contract to any UI layer.

mod clock;
mod config;
mod engine;
mod error;
mod state;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{keywords, EngineConfig};
pub use engine::VoiceEngine;
pub use error::EngineError;
pub use state::EngineState;

// The event stream and component seams, re-exported for hosts.
pub use sayso_asr::{AsrEngine, WhisperOnnx, WhisperPaths};
pub use sayso_dom::{DomHost, PageDocument, TargetIndex};
pub use sayso_events::{
    CaptureEndReason, ErrorCode, Event, EventBus, EventKind, ResolutionFailure, SubscriptionId,
};
pub use sayso_kws::{KeywordSpotter, OnnxKeywordSpotter};
pub use sayso_vad::{OnnxSpeechGate, SpeechGate};
