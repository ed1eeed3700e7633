//! Scripted component doubles for exercising the state machine without
//! ONNX models or a microphone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use sayso_asr::{AsrEngine, AsrError};
use sayso_kws::{KeywordDetection, KeywordSpotter, KwsError, ScoreObserver};
use sayso_vad::{SpeechEvent, SpeechGate, VadError};

use crate::clock::Clock;

/// Manually advanced clock. Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Spotter that returns pre-scripted detections, one batch per frame.
#[derive(Default)]
pub struct ScriptedSpotter {
    script: VecDeque<Vec<KeywordDetection>>,
    fail_init: bool,
    observer: Option<ScoreObserver>,
    pub frames_seen: usize,
    pub resets: usize,
}

impl ScriptedSpotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    /// Script the next frame to fire `keyword`.
    pub fn queue_detection(&mut self, keyword: &str, score: f32) {
        self.script.push_back(vec![KeywordDetection {
            keyword: keyword.to_string(),
            score,
        }]);
    }

    /// Script `n` silent frames.
    pub fn queue_silence(&mut self, n: usize) {
        for _ in 0..n {
            self.script.push_back(Vec::new());
        }
    }
}

impl KeywordSpotter for ScriptedSpotter {
    fn init(&mut self) -> sayso_kws::Result<()> {
        if self.fail_init {
            return Err(KwsError::ModelLoad {
                name: "scripted".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn warm_up(&mut self) {}

    fn process_frame(&mut self, _frame: &[f32], _now_ms: i64) -> Vec<KeywordDetection> {
        self.frames_seen += 1;
        self.script.pop_front().unwrap_or_default()
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.script.clear();
    }

    fn set_score_observer(&mut self, observer: Option<ScoreObserver>) {
        self.observer = observer;
    }
}

/// Speech gate that returns pre-scripted boundaries, one batch per frame.
#[derive(Default)]
pub struct ScriptedGate {
    script: VecDeque<Vec<SpeechEvent>>,
    fail_init: bool,
    pub starts: usize,
    pub stops: usize,
    pub frames_seen: usize,
}

impl ScriptedGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn queue_events(&mut self, events: Vec<SpeechEvent>) {
        self.script.push_back(events);
    }

    pub fn queue_silence(&mut self, n: usize) {
        for _ in 0..n {
            self.script.push_back(Vec::new());
        }
    }
}

impl SpeechGate for ScriptedGate {
    fn init(&mut self) -> sayso_vad::Result<()> {
        if self.fail_init {
            return Err(VadError::ModelLoad("scripted failure".to_string()));
        }
        Ok(())
    }

    fn start(&mut self) {
        self.starts += 1;
    }

    fn process_frame(&mut self, _frame: &[f32], _now_ms: i64) -> Vec<SpeechEvent> {
        self.frames_seen += 1;
        self.script.pop_front().unwrap_or_default()
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}

enum FakeResponse {
    Text(String),
    Fail(String),
}

/// Transcriber that replays scripted responses and records what it saw.
#[derive(Default)]
pub struct FakeAsr {
    responses: VecDeque<FakeResponse>,
    fail_init: bool,
    received: Arc<Mutex<Vec<usize>>>,
    pub destroyed: bool,
}

impl FakeAsr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn queue_text(&mut self, text: &str) {
        self.responses.push_back(FakeResponse::Text(text.to_string()));
    }

    pub fn queue_failure(&mut self, message: &str) {
        self.responses.push_back(FakeResponse::Fail(message.to_string()));
    }

    /// Shared handle to the sample counts of each utterance received;
    /// stays valid after the fake moves into the engine.
    pub fn received_handle(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.received)
    }
}

impl AsrEngine for FakeAsr {
    fn init(&mut self) -> sayso_asr::Result<()> {
        if self.fail_init {
            return Err(AsrError::ModelLoad {
                name: "scripted".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn transcribe(&mut self, samples: &[f32]) -> sayso_asr::Result<String> {
        self.received.lock().unwrap().push(samples.len());
        match self.responses.pop_front() {
            Some(FakeResponse::Text(text)) => Ok(text),
            Some(FakeResponse::Fail(message)) => Err(AsrError::Transcription(message)),
            None => Ok(String::new()),
        }
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}
