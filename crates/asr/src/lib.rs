//! Pluggable utterance transcription.
//!
//! The engine depends only on the [`AsrEngine`] capability. The bundled
//! reference implementation is [`WhisperOnnx`], an encoder/decoder speech
//! model with greedy decoding; other back-ends substitute freely as long as
//! they turn one buffered utterance into one transcript string.

mod features;
mod vocab;
mod whisper;

pub use features::{compute_log_mel, N_FRAMES, N_MELS};
pub use vocab::Vocab;
pub use whisper::{WhisperOnnx, WhisperPaths};

#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    #[error("failed to load model '{name}': {message}")]
    ModelLoad { name: String, message: String },
    #[error("failed to load vocabulary: {0}")]
    Vocab(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("models not loaded")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, AsrError>;

/// One-shot utterance transcription.
pub trait AsrEngine {
    /// Load models. Failure here is fatal for engine startup.
    fn init(&mut self) -> Result<()>;

    /// Transcribe one buffered utterance of 16 kHz mono PCM.
    ///
    /// Empty audio returns an empty string immediately.
    fn transcribe(&mut self, samples: &[f32]) -> Result<String>;

    /// Release all sessions.
    fn destroy(&mut self);
}
