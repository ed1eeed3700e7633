//! Voice-activity gating for the capture window.
//!
//! Re-chunks 80 ms PCM frames to the VAD model's native 512-sample window,
//! runs a recurrent ONNX model per chunk, and turns the probability stream
//! into `speech-start` / `speech-end` events with silence-hold endpointing.

mod onnx;

pub use onnx::OnnxSpeechGate;

/// Native model window: 512 samples, 32 ms at 16 kHz.
pub const CHUNK_SAMPLES: usize = 512;
/// Recurrent state tensor is `[2, 1, STATE_DIM]`.
pub const STATE_DIM: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model not loaded")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, VadError>;

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Probability at or above which speech starts.
    pub start_threshold: f32,
    /// Probability at or above which ongoing speech is sustained.
    pub end_threshold: f32,
    /// Silence duration that closes an utterance.
    pub silence_hold_ms: i64,
    /// Minimum utterance length before an end can be reported.
    pub min_speech_ms: i64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.5,
            end_threshold: 0.35,
            silence_hold_ms: 1000,
            min_speech_ms: 250,
        }
    }
}

/// Speech boundary observed during an active capture window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    Started { at_ms: i64 },
    Ended { at_ms: i64 },
}

/// Pluggable speech gate consumed by the engine during capture.
pub trait SpeechGate {
    /// Load the model. Failure here is fatal for engine startup.
    fn init(&mut self) -> Result<()>;

    /// Begin a capture window: zero the recurrent state and clear buffers.
    fn start(&mut self);

    /// Feed one PCM frame; returns any boundaries crossed within it.
    fn process_frame(&mut self, frame: &[f32], now_ms: i64) -> Vec<SpeechEvent>;

    /// End the capture window and drop any buffered tail.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Speech { started_ms: i64, last_speech_ms: i64 },
}

/// Turns a per-chunk probability stream into start/end events.
#[derive(Debug)]
pub struct Endpointer {
    config: VadConfig,
    phase: Phase,
}

impl Endpointer {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
        }
    }

    /// Observe one probability at `now_ms`.
    pub fn observe(&mut self, p: f32, now_ms: i64) -> Option<SpeechEvent> {
        match self.phase {
            Phase::Idle => {
                if p >= self.config.start_threshold {
                    self.phase = Phase::Speech {
                        started_ms: now_ms,
                        last_speech_ms: now_ms,
                    };
                    return Some(SpeechEvent::Started { at_ms: now_ms });
                }
                None
            }
            Phase::Speech {
                started_ms,
                last_speech_ms,
            } => {
                if p >= self.config.end_threshold {
                    self.phase = Phase::Speech {
                        started_ms,
                        last_speech_ms: now_ms,
                    };
                    return None;
                }
                if now_ms - last_speech_ms >= self.config.silence_hold_ms
                    && now_ms - started_ms >= self.config.min_speech_ms
                {
                    self.phase = Phase::Idle;
                    return Some(SpeechEvent::Ended { at_ms: now_ms });
                }
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn in_speech(&self) -> bool {
        matches!(self.phase, Phase::Speech { .. })
    }
}

/// Drain every complete chunk from `buffer`, leaving the tail for the next
/// frame.
pub(crate) fn take_chunks(buffer: &mut Vec<f32>) -> Vec<Vec<f32>> {
    let mut chunks = Vec::new();
    while buffer.len() >= CHUNK_SAMPLES {
        chunks.push(buffer.drain(..CHUNK_SAMPLES).collect());
    }
    chunks
}
