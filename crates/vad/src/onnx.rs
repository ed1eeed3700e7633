//! ONNX speech gate over a recurrent VAD model.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use crate::{
    take_chunks, Endpointer, Result, SpeechEvent, SpeechGate, VadConfig, VadError, CHUNK_SAMPLES,
    STATE_DIM,
};

const SAMPLE_RATE: i64 = 16_000;

/// Speech gate backed by a recurrent ONNX VAD model.
///
/// The model consumes `[1, 512]` float chunks plus a `[2, 1, 128]` state
/// tensor and the sample rate, and produces one probability per chunk along
/// with the next state.
pub struct OnnxSpeechGate {
    model_path: PathBuf,
    session: Option<Session>,
    state: Array3<f32>,
    tail: Vec<f32>,
    endpointer: Endpointer,
}

impl OnnxSpeechGate {
    pub fn new(model_path: impl AsRef<Path>, config: VadConfig) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            session: None,
            state: Array3::zeros((2, 1, STATE_DIM)),
            tail: Vec::with_capacity(CHUNK_SAMPLES * 4),
            endpointer: Endpointer::new(config),
        }
    }

    fn infer_chunk(&mut self, chunk: &[f32]) -> Result<f32> {
        let session = self.session.as_mut().ok_or(VadError::NotLoaded)?;

        let input = Array2::from_shape_vec((1, chunk.len()), chunk.to_vec())
            .map_err(|e| VadError::Inference(e.to_string()))?;
        let input = Tensor::from_array(input).map_err(|e| VadError::Inference(e.to_string()))?;
        let state = Tensor::from_array(self.state.clone())
            .map_err(|e| VadError::Inference(e.to_string()))?;
        let sr = Tensor::from_array(Array1::from_elem(1, SAMPLE_RATE))
            .map_err(|e| VadError::Inference(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![input, state, sr])
            .map_err(|e| VadError::Inference(e.to_string()))?;

        let prob: ndarray::ArrayViewD<f32> = outputs[0]
            .try_extract_array()
            .map_err(|e| VadError::Inference(e.to_string()))?;
        let p = prob
            .iter()
            .copied()
            .next()
            .ok_or_else(|| VadError::Inference("empty probability output".to_string()))?;

        let new_state: ndarray::ArrayViewD<f32> = outputs[1]
            .try_extract_array()
            .map_err(|e| VadError::Inference(e.to_string()))?;
        for i in 0..2 {
            for j in 0..STATE_DIM {
                self.state[[i, 0, j]] = new_state[[i, 0, j]];
            }
        }

        Ok(p)
    }
}

impl SpeechGate for OnnxSpeechGate {
    fn init(&mut self) -> Result<()> {
        let builder = Session::builder().map_err(|e| VadError::ModelLoad(e.to_string()))?;
        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VadError::ModelLoad(e.to_string()))?;
        let builder = builder.with_intra_threads(1).map_err(|e| VadError::ModelLoad(e.to_string()))?;
        let mut builder = builder.with_inter_threads(1).map_err(|e| VadError::ModelLoad(e.to_string()))?;
        let session = builder
            .commit_from_file(&self.model_path)
            .map_err(|e| VadError::ModelLoad(e.to_string()))?;
        tracing::info!(model = %self.model_path.display(), "VAD model loaded");
        self.session = Some(session);
        Ok(())
    }

    fn start(&mut self) {
        self.state.fill(0.0);
        self.tail.clear();
        self.endpointer.reset();
    }

    fn process_frame(&mut self, frame: &[f32], now_ms: i64) -> Vec<SpeechEvent> {
        self.tail.extend_from_slice(frame);

        let mut events = Vec::new();
        for chunk in take_chunks(&mut self.tail) {
            // One bad chunk must not end the capture window.
            let p = match self.infer_chunk(&chunk) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(err = %e, "VAD chunk inference failed, continuing");
                    continue;
                }
            };
            if let Some(event) = self.endpointer.observe(p, now_ms) {
                tracing::debug!(?event, p, "speech boundary");
                events.push(event);
            }
        }
        events
    }

    fn stop(&mut self) {
        self.tail.clear();
        self.endpointer.reset();
    }
}
