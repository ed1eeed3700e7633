//! Engine-level errors returned by the public API.
//!
//! Distinct from the stable [`sayso_events::ErrorCode`] values carried on
//! the event stream; these are the Rust errors a host program handles.

use sayso_asr::AsrError;
use sayso_dom::SelectorError;
use sayso_kws::KwsError;
use sayso_vad::VadError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid deny selector '{selector}': {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: SelectorError,
    },

    #[error("keyword spotter initialization failed: {0}")]
    KwsInit(#[from] KwsError),

    #[error("voice activity detector initialization failed: {0}")]
    VadInit(#[from] VadError),

    #[error("speech recognizer initialization failed: {0}")]
    AsrInit(#[from] AsrError),
}
