//! Streaming keyword spotting over a shared mel→embedding backbone.
//!
//! One mel model and one embedding model are shared by any number of small
//! per-keyword classifier heads. Scores are precision-first: a keyword fires
//! only when its score clears its threshold *and* its cooldown has elapsed,
//! so a score hovering at the boundary cannot flap.

mod spotter;

pub use spotter::OnnxKeywordSpotter;

use std::collections::HashMap;
use std::path::PathBuf;

/// Mel bins per mel frame.
pub const MEL_BINS: usize = 32;
/// Mel frames consumed by one embedding window.
pub const EMBEDDING_WINDOW: usize = 76;
/// Dimensions of one embedding vector.
pub const EMBEDDING_DIM: usize = 96;
/// Embeddings consumed by one classifier step.
pub const CLASSIFIER_FRAMES: usize = 16;

/// Zero-padded context prepended to each mel input (30 ms at 16 kHz).
pub const CONTEXT_SAMPLES: usize = 480;
/// Raw-audio ring capacity (2 s at 16 kHz).
pub const RAW_RING_CAP: usize = 32_000;
/// Mel ring capacity in frames.
pub const MEL_RING_CAP: usize = 100;
/// Embedding ring capacity in frames.
pub const EMB_RING_CAP: usize = 120;

/// Silent frames pushed through the pipeline before live audio so the
/// rings are full and the first live scores are meaningful.
pub const WARMUP_FRAMES: usize = 15;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_COOLDOWN_MS: i64 = 1500;

#[derive(Debug, thiserror::Error)]
pub enum KwsError {
    #[error("failed to load model '{name}': {message}")]
    ModelLoad { name: String, message: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("models not loaded")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, KwsError>;

/// One keyword firing.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDetection {
    pub keyword: String,
    pub score: f32,
}

/// Receives the raw score of every keyword on every classifier step,
/// regardless of threshold. Intended for live metering UIs.
pub type ScoreObserver = Box<dyn FnMut(&str, f32) + Send>;

/// Per-keyword detection settings. The classifier model is expected at
/// `<model_dir>/<name>.onnx`.
#[derive(Debug, Clone)]
pub struct KeywordConfig {
    pub name: String,
    pub threshold: f32,
    pub cooldown_ms: i64,
}

impl KeywordConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            threshold: DEFAULT_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }
}

/// Spotter configuration: where the shared backbone lives and which
/// keyword heads to load next to it.
#[derive(Debug, Clone)]
pub struct KwsConfig {
    /// Directory holding `melspectrogram.onnx`, `embedding_model.onnx`, and
    /// one `<keyword>.onnx` per configured keyword.
    pub model_dir: PathBuf,
    pub keywords: Vec<KeywordConfig>,
}

/// Pluggable keyword source consumed by the engine.
pub trait KeywordSpotter {
    /// Load models. Failure here is fatal for engine startup.
    fn init(&mut self) -> Result<()>;

    /// Pre-fill the internal rings with silence. Required before live audio.
    fn warm_up(&mut self);

    /// Feed one 80 ms PCM frame; returns the keywords that fired on it.
    fn process_frame(&mut self, frame: &[f32], now_ms: i64) -> Vec<KeywordDetection>;

    /// Clear all internal buffers and cooldown state.
    fn reset(&mut self);

    fn set_score_observer(&mut self, observer: Option<ScoreObserver>);
}

/// Tracks the last firing time per keyword and suppresses re-fires inside
/// the cooldown window.
#[derive(Debug, Default)]
pub struct CooldownGate {
    last_fired_ms: HashMap<String, i64>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a firing at `now_ms` unless the keyword fired less than
    /// `cooldown_ms` ago. Returns whether the firing is allowed.
    pub fn try_fire(&mut self, keyword: &str, now_ms: i64, cooldown_ms: i64) -> bool {
        if let Some(&last) = self.last_fired_ms.get(keyword) {
            if now_ms - last < cooldown_ms {
                return false;
            }
        }
        self.last_fired_ms.insert(keyword.to_string(), now_ms);
        true
    }

    pub fn reset(&mut self) {
        self.last_fired_ms.clear();
    }
}
