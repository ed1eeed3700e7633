//! PCM frame contract and the utterance capture buffer.
//!
//! The audio source is a host collaborator: it delivers 80 ms frames of
//! 16 kHz mono float PCM and knows nothing about the rest of the router.
//! This crate pins down the frame contract and owns the buffer that
//! accumulates one utterance between capture start and capture end.

/// Standard sample rate for all audio entering the router (16 kHz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Duration of one PCM frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 80;

/// Samples per frame at the standard sample rate (80 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame has {got} samples, expected {FRAME_SAMPLES}")]
    BadFrameSize { got: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Validate that a slice is exactly one PCM frame.
pub fn ensure_frame(frame: &[f32]) -> Result<()> {
    if frame.len() != FRAME_SAMPLES {
        return Err(FrameError::BadFrameSize { got: frame.len() });
    }
    Ok(())
}

/// Duration in milliseconds of a sample count at the standard rate.
pub fn samples_duration_ms(samples: usize) -> u64 {
    (samples as u64 * 1000) / SAMPLE_RATE as u64
}

/// Accumulates the PCM frames of one utterance.
///
/// Cleared on capture start, appended while capturing, and detached
/// (moved out) when the capture window closes. Frames pushed while no
/// capture is active are dropped.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    samples: Vec<f32>,
    capturing: bool,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a capture window, discarding any previous contents.
    pub fn begin(&mut self) {
        self.samples.clear();
        self.capturing = true;
    }

    /// Append one frame. No-op outside a capture window.
    pub fn push(&mut self, frame: &[f32]) {
        if self.capturing {
            self.samples.extend_from_slice(frame);
        }
    }

    /// Close the window and move the buffered utterance out.
    pub fn detach(&mut self) -> Vec<f32> {
        self.capturing = false;
        std::mem::take(&mut self.samples)
    }

    /// Close the window and drop the buffered audio.
    pub fn discard(&mut self) {
        self.capturing = false;
        self.samples.clear();
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the buffered audio in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        samples_duration_ms(self.samples.len())
    }
}
