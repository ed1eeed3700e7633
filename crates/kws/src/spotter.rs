//! ONNX keyword spotter with the three-ring streaming topology.
//!
//! Raw audio ring → mel ring → embedding ring, with fixed-ratio frame
//! accounting: each 80 ms PCM frame yields a handful of mel frames, each
//! full 76-frame mel window yields one 96-dim embedding, and each
//! classifier step consumes the latest 16 embeddings.

use std::collections::VecDeque;
use std::path::Path;

use ndarray::{Array2, Array3, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use sayso_audio::ensure_frame;

use crate::{
    CooldownGate, KeywordConfig, KeywordDetection, KeywordSpotter, KwsConfig, KwsError, Result,
    ScoreObserver, CLASSIFIER_FRAMES, CONTEXT_SAMPLES, EMBEDDING_DIM, EMBEDDING_WINDOW,
    EMB_RING_CAP, MEL_BINS, MEL_RING_CAP, RAW_RING_CAP, WARMUP_FRAMES,
};

/// Scale a [-1, 1] sample to the 16-bit integer range, clamped.
fn scale_to_i16_range(sample: f32) -> f32 {
    (sample * 32767.0).clamp(-32768.0, 32767.0)
}

/// Affine transform aligning the mel operator's output with the embedding
/// model's training distribution. The constants are load-bearing.
fn mel_affine(x: f32) -> f32 {
    x / 10.0 + 2.0
}

struct KeywordHead {
    config: KeywordConfig,
    session: Session,
}

struct Backbone {
    mel: Session,
    embedding: Session,
    heads: Vec<KeywordHead>,
}

/// Streaming spotter over ONNX mel/embedding/classifier models.
pub struct OnnxKeywordSpotter {
    config: KwsConfig,
    backbone: Option<Backbone>,
    raw_ring: VecDeque<f32>,
    mel_ring: VecDeque<[f32; MEL_BINS]>,
    emb_ring: VecDeque<[f32; EMBEDDING_DIM]>,
    gate: CooldownGate,
    observer: Option<ScoreObserver>,
}

impl OnnxKeywordSpotter {
    pub fn new(config: KwsConfig) -> Self {
        let mut spotter = Self {
            config,
            backbone: None,
            raw_ring: VecDeque::with_capacity(RAW_RING_CAP),
            mel_ring: VecDeque::with_capacity(MEL_RING_CAP),
            emb_ring: VecDeque::with_capacity(EMB_RING_CAP),
            gate: CooldownGate::new(),
            observer: None,
        };
        spotter.seed_context();
        spotter
    }

    /// Initialize the raw ring with 30 ms of silence so the first mel input
    /// has its full left context.
    fn seed_context(&mut self) {
        self.raw_ring.clear();
        self.raw_ring.extend(std::iter::repeat(0.0f32).take(CONTEXT_SAMPLES));
    }

    fn load_session(path: &Path) -> Result<Session> {
        macro_rules! to_err {
            ($e:expr) => {
                $e.map_err(|e| KwsError::ModelLoad {
                    name: path.display().to_string(),
                    message: e.to_string(),
                })
            };
        }
        let builder = to_err!(Session::builder())?;
        let builder = to_err!(builder.with_optimization_level(GraphOptimizationLevel::Level3))?;
        let builder = to_err!(builder.with_intra_threads(1))?;
        let mut builder = to_err!(builder.with_inter_threads(1))?;
        to_err!(builder.commit_from_file(path))
    }

    /// Run one frame through all three stages. Returns raw per-keyword
    /// scores when a classifier step ran, or an empty vector while the
    /// rings are still filling.
    fn infer_frame(&mut self, frame: &[f32]) -> Result<Vec<(String, f32)>> {
        let backbone = self.backbone.as_mut().ok_or(KwsError::NotLoaded)?;

        for &sample in frame {
            if self.raw_ring.len() >= RAW_RING_CAP {
                self.raw_ring.pop_front();
            }
            self.raw_ring.push_back(scale_to_i16_range(sample));
        }

        // Mel stage: the current frame prefixed by 30 ms of context.
        let mel_window = frame.len() + CONTEXT_SAMPLES;
        let start = self.raw_ring.len().saturating_sub(mel_window);
        let mel_input: Vec<f32> = self.raw_ring.iter().skip(start).copied().collect();
        let input = Array2::from_shape_vec((1, mel_input.len()), mel_input)
            .map_err(|e| KwsError::Inference(e.to_string()))?;
        let tensor = Tensor::from_array(input).map_err(|e| KwsError::Inference(e.to_string()))?;
        let outputs = backbone
            .mel
            .run(ort::inputs![tensor])
            .map_err(|e| KwsError::Inference(e.to_string()))?;
        let mel_out: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .map_err(|e| KwsError::Inference(e.to_string()))?;

        // Mel output is [1, N, 32] or [1, 1, N, 32] depending on export.
        let shape = mel_out.shape().to_vec();
        let (n_frames, bins) = match shape.len() {
            3 => (shape[1], shape[2]),
            4 => (shape[2], shape[3]),
            _ => {
                return Err(KwsError::Inference(format!(
                    "unexpected mel output shape {shape:?}"
                )))
            }
        };
        if bins != MEL_BINS {
            return Err(KwsError::Inference(format!(
                "mel output has {bins} bins, expected {MEL_BINS}"
            )));
        }
        for frame_idx in 0..n_frames {
            let mut mel_frame = [0.0f32; MEL_BINS];
            for (bin, value) in mel_frame.iter_mut().enumerate() {
                let raw = if shape.len() == 3 {
                    mel_out[[0, frame_idx, bin]]
                } else {
                    mel_out[[0, 0, frame_idx, bin]]
                };
                *value = mel_affine(raw);
            }
            if self.mel_ring.len() >= MEL_RING_CAP {
                self.mel_ring.pop_front();
            }
            self.mel_ring.push_back(mel_frame);
        }

        // Embedding stage: one step per new mel-frame group once the window
        // is full.
        if self.mel_ring.len() < EMBEDDING_WINDOW {
            return Ok(Vec::new());
        }
        let window_start = self.mel_ring.len() - EMBEDDING_WINDOW;
        let mut window = Vec::with_capacity(EMBEDDING_WINDOW * MEL_BINS);
        for i in window_start..self.mel_ring.len() {
            window.extend_from_slice(&self.mel_ring[i]);
        }
        let input = Array4::from_shape_vec((1, EMBEDDING_WINDOW, MEL_BINS, 1), window)
            .map_err(|e| KwsError::Inference(e.to_string()))?;
        let tensor = Tensor::from_array(input).map_err(|e| KwsError::Inference(e.to_string()))?;
        let outputs = backbone
            .embedding
            .run(ort::inputs![tensor])
            .map_err(|e| KwsError::Inference(e.to_string()))?;
        let emb_out: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .map_err(|e| KwsError::Inference(e.to_string()))?;
        let flat: Vec<f32> = emb_out.iter().copied().collect();
        if flat.len() != EMBEDDING_DIM {
            return Err(KwsError::Inference(format!(
                "embedding output has {} values, expected {EMBEDDING_DIM}",
                flat.len()
            )));
        }
        let mut embedding = [0.0f32; EMBEDDING_DIM];
        embedding.copy_from_slice(&flat);
        if self.emb_ring.len() >= EMB_RING_CAP {
            self.emb_ring.pop_front();
        }
        self.emb_ring.push_back(embedding);

        // Classifier stage: every head over the latest 16 embeddings.
        if self.emb_ring.len() < CLASSIFIER_FRAMES {
            return Ok(Vec::new());
        }
        let stack_start = self.emb_ring.len() - CLASSIFIER_FRAMES;
        let mut stacked = Vec::with_capacity(CLASSIFIER_FRAMES * EMBEDDING_DIM);
        for i in stack_start..self.emb_ring.len() {
            stacked.extend_from_slice(&self.emb_ring[i]);
        }
        let input = Array3::from_shape_vec((1, CLASSIFIER_FRAMES, EMBEDDING_DIM), stacked)
            .map_err(|e| KwsError::Inference(e.to_string()))?;

        let mut scores = Vec::with_capacity(backbone.heads.len());
        for head in &mut backbone.heads {
            let tensor = Tensor::from_array(input.clone())
                .map_err(|e| KwsError::Inference(e.to_string()))?;
            let outputs = head
                .session
                .run(ort::inputs![tensor])
                .map_err(|e| KwsError::Inference(e.to_string()))?;
            let out: ndarray::ArrayViewD<f32> = outputs[0]
                .try_extract_array()
                .map_err(|e| KwsError::Inference(e.to_string()))?;
            let score = out.iter().copied().last().unwrap_or(0.0);
            scores.push((head.config.name.clone(), score));
        }
        Ok(scores)
    }
}

impl KeywordSpotter for OnnxKeywordSpotter {
    fn init(&mut self) -> Result<()> {
        let mel = Self::load_session(&self.config.model_dir.join("melspectrogram.onnx"))?;
        let embedding = Self::load_session(&self.config.model_dir.join("embedding_model.onnx"))?;

        let mut heads = Vec::with_capacity(self.config.keywords.len());
        for keyword in &self.config.keywords {
            let path = self.config.model_dir.join(format!("{}.onnx", keyword.name));
            let session = Self::load_session(&path)?;
            heads.push(KeywordHead {
                config: keyword.clone(),
                session,
            });
        }

        tracing::info!(
            keywords = heads.len(),
            dir = %self.config.model_dir.display(),
            "keyword spotter loaded"
        );
        self.backbone = Some(Backbone {
            mel,
            embedding,
            heads,
        });
        Ok(())
    }

    // Scores produced here are discarded; the observer only sees live audio.
    fn warm_up(&mut self) {
        let silence = vec![0.0f32; sayso_audio::FRAME_SAMPLES];
        for _ in 0..WARMUP_FRAMES {
            if let Err(e) = self.infer_frame(&silence) {
                tracing::warn!(err = %e, "warm-up inference failed");
                break;
            }
        }
    }

    fn process_frame(&mut self, frame: &[f32], now_ms: i64) -> Vec<KeywordDetection> {
        if let Err(e) = ensure_frame(frame) {
            tracing::warn!(err = %e, "dropping malformed frame");
            return Vec::new();
        }

        // A single bad frame must never halt the stream.
        let scores = match self.infer_frame(frame) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(err = %e, "frame inference failed, continuing");
                return Vec::new();
            }
        };

        let mut detections = Vec::new();
        for (keyword, score) in scores {
            // Raw scores go to the observer unconditionally; thresholding
            // and cooldown only gate the detection callback.
            if let Some(observer) = self.observer.as_mut() {
                observer(&keyword, score);
            }
            let head = self
                .config
                .keywords
                .iter()
                .find(|k| k.name == keyword);
            let Some(head) = head else { continue };
            if score >= head.threshold && self.gate.try_fire(&keyword, now_ms, head.cooldown_ms) {
                tracing::debug!(keyword = %keyword, score, "keyword fired");
                detections.push(KeywordDetection { keyword, score });
            }
        }
        detections
    }

    fn reset(&mut self) {
        self.seed_context();
        self.mel_ring.clear();
        self.emb_ring.clear();
        self.gate.reset();
    }

    fn set_score_observer(&mut self, observer: Option<ScoreObserver>) {
        self.observer = observer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_scale_clamps() {
        assert_eq!(scale_to_i16_range(0.0), 0.0);
        assert_eq!(scale_to_i16_range(1.0), 32767.0);
        assert_eq!(scale_to_i16_range(-2.0), -32768.0);
    }

    #[test]
    fn test_mel_affine_constants() {
        assert_eq!(mel_affine(0.0), 2.0);
        assert_eq!(mel_affine(-20.0), 0.0);
        assert_eq!(mel_affine(10.0), 3.0);
    }

    #[test]
    fn test_unloaded_spotter_swallows_frames() {
        let mut spotter = OnnxKeywordSpotter::new(KwsConfig {
            model_dir: PathBuf::from("/nonexistent"),
            keywords: vec![KeywordConfig::new("open")],
        });
        let frame = vec![0.0f32; sayso_audio::FRAME_SAMPLES];
        assert!(spotter.process_frame(&frame, 0).is_empty());
    }

    #[test]
    fn test_context_seeded_on_new_and_reset() {
        let mut spotter = OnnxKeywordSpotter::new(KwsConfig {
            model_dir: PathBuf::from("/nonexistent"),
            keywords: vec![],
        });
        assert_eq!(spotter.raw_ring.len(), CONTEXT_SAMPLES);
        spotter.raw_ring.extend([0.5f32; 10]);
        spotter.reset();
        assert_eq!(spotter.raw_ring.len(), CONTEXT_SAMPLES);
        assert!(spotter.raw_ring.iter().all(|&s| s == 0.0));
    }
}
