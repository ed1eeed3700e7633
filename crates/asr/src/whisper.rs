//! Reference encoder/decoder transcription engine over ONNX sessions.

use std::path::PathBuf;

use ndarray::{Array2, Array3, ArrayD};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::features::{compute_log_mel, N_FRAMES, N_MELS};
use crate::vocab::Vocab;
use crate::{AsrEngine, AsrError, Result};

// Decoder prompt prefix: start-of-transcript, English, transcribe task,
// no timestamps. Specific to the reference tokenizer; other back-ends
// supply their own prefix.
const TOKEN_SOT: i64 = 50_258;
const TOKEN_LANG_EN: i64 = 50_259;
const TOKEN_TASK_TRANSCRIBE: i64 = 50_359;
const TOKEN_NO_TIMESTAMPS: i64 = 50_363;
const TOKEN_EOT: i64 = 50_257;

const DEFAULT_MAX_TOKENS: usize = 128;

/// Model artifact locations for [`WhisperOnnx`].
#[derive(Debug, Clone)]
pub struct WhisperPaths {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub vocab: PathBuf,
}

struct Sessions {
    encoder: Session,
    decoder: Session,
    encoder_input: String,
    decoder_tokens_input: String,
    decoder_audio_input: String,
}

/// Greedy-decoding speech transcriber.
///
/// The encoder maps `[1, 80, 3000]` log-mel features to audio features;
/// the decoder is run autoregressively from a fixed prompt prefix until it
/// emits end-of-transcript or the token budget runs out.
pub struct WhisperOnnx {
    paths: WhisperPaths,
    max_tokens: usize,
    sessions: Option<Sessions>,
    vocab: Option<Vocab>,
}

impl WhisperOnnx {
    pub fn new(paths: WhisperPaths) -> Self {
        Self {
            paths,
            max_tokens: DEFAULT_MAX_TOKENS,
            sessions: None,
            vocab: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn load_session(path: &PathBuf) -> Result<Session> {
        macro_rules! to_err {
            ($e:expr) => {
                $e.map_err(|e| AsrError::ModelLoad {
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

    /// Resolve an input name, preferring `wanted` and falling back to the
    /// input at `position`.
    fn input_name(session: &Session, wanted: &str, position: usize) -> Result<String> {
        session
            .inputs()
            .iter()
            .find(|i| i.name == wanted)
            .map(|i| i.name.clone())
            .or_else(|| session.inputs().get(position).map(|i| i.name.clone()))
            .ok_or_else(|| AsrError::ModelLoad {
                name: wanted.to_string(),
                message: "model input not found".to_string(),
            })
    }

    fn encode(&mut self, samples: &[f32]) -> Result<ArrayD<f32>> {
        let sessions = self.sessions.as_mut().ok_or(AsrError::NotLoaded)?;

        let mel = compute_log_mel(samples);
        let mel = Array3::from_shape_vec((1, N_MELS, N_FRAMES), mel)
            .map_err(|e| AsrError::Transcription(e.to_string()))?;
        let tensor = Tensor::from_array(mel).map_err(|e| AsrError::Transcription(e.to_string()))?;

        let outputs = sessions
            .encoder
            .run(ort::inputs![sessions.encoder_input.as_str() => tensor])
            .map_err(|e| AsrError::Transcription(e.to_string()))?;
        let features: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .map_err(|e| AsrError::Transcription(e.to_string()))?;
        Ok(features.to_owned())
    }

    /// Greedy decode: extend the prompt one argmax token at a time until
    /// end-of-transcript or the budget is exhausted.
    fn decode(&mut self, audio_features: &ArrayD<f32>) -> Result<Vec<i64>> {
        let sessions = self.sessions.as_mut().ok_or(AsrError::NotLoaded)?;

        let prefix = [TOKEN_SOT, TOKEN_LANG_EN, TOKEN_TASK_TRANSCRIBE, TOKEN_NO_TIMESTAMPS];
        let mut tokens: Vec<i64> = prefix.to_vec();

        for _ in 0..self.max_tokens {
            let token_input = Array2::from_shape_vec((1, tokens.len()), tokens.clone())
                .map_err(|e| AsrError::Transcription(e.to_string()))?;
            let token_tensor = Tensor::from_array(token_input)
                .map_err(|e| AsrError::Transcription(e.to_string()))?;
            let feature_tensor = Tensor::from_array(audio_features.clone())
                .map_err(|e| AsrError::Transcription(e.to_string()))?;

            let outputs = sessions
                .decoder
                .run(ort::inputs![
                    sessions.decoder_tokens_input.as_str() => token_tensor,
                    sessions.decoder_audio_input.as_str() => feature_tensor
                ])
                .map_err(|e| AsrError::Transcription(e.to_string()))?;
            let logits: ndarray::ArrayViewD<f32> = outputs[0]
                .try_extract_array()
                .map_err(|e| AsrError::Transcription(e.to_string()))?;

            // Argmax of the last position.
            let shape = logits.shape().to_vec();
            let vocab_size = *shape
                .last()
                .ok_or_else(|| AsrError::Transcription("empty logits".to_string()))?;
            let last = tokens.len() - 1;
            let mut best = TOKEN_EOT;
            let mut best_score = f32::NEG_INFINITY;
            for v in 0..vocab_size {
                let score = logits[[0, last, v]];
                if score > best_score {
                    best_score = score;
                    best = v as i64;
                }
            }

            if best == TOKEN_EOT {
                break;
            }
            tokens.push(best);
        }

        Ok(tokens[prefix.len()..].to_vec())
    }
}

impl AsrEngine for WhisperOnnx {
    fn init(&mut self) -> Result<()> {
        let encoder = Self::load_session(&self.paths.encoder)?;
        let decoder = Self::load_session(&self.paths.decoder)?;
        let vocab = Vocab::load(&self.paths.vocab)?;

        let encoder_input = Self::input_name(&encoder, "mel", 0)?;
        let decoder_tokens_input = Self::input_name(&decoder, "tokens", 0)?;
        let decoder_audio_input = Self::input_name(&decoder, "audio_features", 1)?;

        tracing::info!(
            encoder = %self.paths.encoder.display(),
            decoder = %self.paths.decoder.display(),
            vocab_len = vocab.len(),
            "speech recognizer loaded"
        );

        self.sessions = Some(Sessions {
            encoder,
            decoder,
            encoder_input,
            decoder_tokens_input,
            decoder_audio_input,
        });
        self.vocab = Some(vocab);
        Ok(())
    }

    fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        if self.sessions.is_none() {
            return Err(AsrError::NotLoaded);
        }

        let audio_features = self.encode(samples)?;
        let tokens = self.decode(&audio_features)?;
        let vocab = self.vocab.as_ref().ok_or(AsrError::NotLoaded)?;
        Ok(vocab.decode(&tokens))
    }

    fn destroy(&mut self) {
        self.sessions = None;
        self.vocab = None;
    }
}
