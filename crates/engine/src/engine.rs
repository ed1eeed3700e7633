//! The voice router engine.

use uuid::Uuid;

use sayso_asr::AsrEngine;
use sayso_audio::CaptureBuffer;
use sayso_dom::{
    build_index, default_action, run_action, ActionKind, DomHost, NodeId, RiskLevel, Selector,
    TargetIndex,
};
use sayso_events::{
    CaptureEndReason, ErrorCode, Event, EventBus, EventKind, ResolutionFailure, SubscriptionId,
};
use sayso_kws::{KeywordDetection, KeywordSpotter, ScoreObserver};
use sayso_resolve::{normalize, resolve, Candidate, MatchKind, Resolution};
use sayso_vad::{SpeechEvent, SpeechGate};

use crate::clock::{Clock, SystemClock};
use crate::config::{keywords, EngineConfig};
use crate::error::EngineError;
use crate::state::EngineState;

/// Why a confirmation or ambiguity hold exists.
enum Hold {
    Ambiguous { candidate_ids: Vec<String> },
    Confirmation { target_id: String, node: NodeId, action: ActionKind },
}

/// Action armed behind the highlight delay.
struct PendingAction {
    target_id: String,
    node: NodeId,
    action: ActionKind,
    due_ms: i64,
}

/// One open-keyword-through-action lifecycle.
struct Request {
    id: String,
    index: TargetIndex,
    capture_deadline_ms: Option<i64>,
    pending: Option<PendingAction>,
    hold: Option<Hold>,
}

/// Deterministic voice router: maps spoken labels to visible elements and
/// performs a safe default action, or refuses.
///
/// Hosts feed PCM frames through [`on_frame`](Self::on_frame); everything
/// else happens through the narrow command surface and the event stream.
pub struct VoiceEngine {
    config: EngineConfig,
    deny: Vec<Selector>,
    bus: EventBus,
    clock: Box<dyn Clock>,
    host: Box<dyn DomHost>,
    kws: Box<dyn KeywordSpotter>,
    vad: Box<dyn SpeechGate>,
    asr: Box<dyn AsrEngine>,
    state: EngineState,
    request: Option<Request>,
    capture: CaptureBuffer,
    initialized: bool,
}

impl VoiceEngine {
    pub fn new(
        config: EngineConfig,
        host: Box<dyn DomHost>,
        kws: Box<dyn KeywordSpotter>,
        vad: Box<dyn SpeechGate>,
        asr: Box<dyn AsrEngine>,
    ) -> Result<Self, EngineError> {
        Self::with_clock(config, host, kws, vad, asr, Box::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        host: Box<dyn DomHost>,
        kws: Box<dyn KeywordSpotter>,
        vad: Box<dyn SpeechGate>,
        asr: Box<dyn AsrEngine>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let mut deny = Vec::with_capacity(config.global_deny_selectors.len());
        for raw in &config.global_deny_selectors {
            let selector = Selector::parse(raw).map_err(|source| EngineError::InvalidSelector {
                selector: raw.clone(),
                source,
            })?;
            deny.push(selector);
        }

        Ok(Self {
            config,
            deny,
            bus: EventBus::new(),
            clock,
            host,
            kws,
            vad,
            asr,
            state: EngineState::ListeningOff,
            request: None,
            capture: CaptureBuffer::new(),
            initialized: false,
        })
    }

    /// Load all models. Fatal on failure: the error is both returned and
    /// broadcast as an `EngineError` event.
    pub fn init(&mut self) -> Result<(), EngineError> {
        if let Err(e) = self.kws.init() {
            self.emit_error(None, ErrorCode::KwsInitFailed, e.to_string());
            return Err(e.into());
        }
        if let Err(e) = self.vad.init() {
            self.emit_error(None, ErrorCode::VadInitFailed, e.to_string());
            return Err(e.into());
        }
        if let Err(e) = self.asr.init() {
            self.emit_error(None, ErrorCode::AsrInitFailed, e.to_string());
            return Err(e.into());
        }
        // Pre-fill the spotter rings so the first live scores are meaningful.
        self.kws.warm_up();
        self.initialized = true;
        tracing::info!("engine initialized");
        Ok(())
    }

    // --- Listening lifecycle ---

    pub fn start_listening(&mut self) {
        if self.state != EngineState::ListeningOff {
            return;
        }
        self.state = EngineState::ListeningOn;
        self.emit(None, EventKind::ListeningChanged { enabled: true });
    }

    /// Disable listening. An in-flight request is cancelled first.
    pub fn stop_listening(&mut self) {
        if self.state == EngineState::ListeningOff {
            return;
        }
        self.cancel();
        self.kws.reset();
        self.state = EngineState::ListeningOff;
        self.emit(None, EventKind::ListeningChanged { enabled: false });
    }

    /// Abort the in-flight request, if any. Listening stays enabled.
    pub fn cancel(&mut self) {
        match self.state {
            EngineState::CapturingTarget => self.abort_capture(CaptureEndReason::Cancel),
            EngineState::Error | EngineState::AwaitingConfirmation | EngineState::Executing => {
                self.finish_request();
            }
            _ => {}
        }
    }

    /// Release sessions, clear buffers and history.
    pub fn destroy(&mut self) {
        self.cancel();
        self.vad.stop();
        self.kws.reset();
        self.asr.destroy();
        self.capture.discard();
        self.request = None;
        self.state = EngineState::ListeningOff;
        self.bus.clear();
        self.initialized = false;
    }

    // --- Audio path ---

    /// Feed one 80 ms PCM frame from the audio source.
    ///
    /// The spotter sees every frame while listening is enabled; during a
    /// capture window the capture buffer and the speech gate see it too.
    pub fn on_frame(&mut self, frame: &[f32]) {
        if self.state == EngineState::ListeningOff {
            return;
        }
        let now = self.clock.now_ms();

        for detection in self.kws.process_frame(frame, now) {
            self.handle_keyword(detection);
        }

        if self.state == EngineState::CapturingTarget {
            self.capture.push(frame);
            let boundaries = self.vad.process_frame(frame, now);
            for boundary in boundaries {
                if matches!(boundary, SpeechEvent::Ended { .. }) {
                    self.end_capture(CaptureEndReason::Vad);
                    break;
                }
            }
        }

        self.tick();
    }

    /// Drive deadline timers (capture timeout, highlight delay) without
    /// audio. Called automatically from [`on_frame`](Self::on_frame).
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        if self.state == EngineState::CapturingTarget {
            let expired = self
                .request
                .as_ref()
                .and_then(|r| r.capture_deadline_ms)
                .is_some_and(|deadline| now >= deadline);
            if expired {
                self.end_capture(CaptureEndReason::Timeout);
            }
        }

        if self.state == EngineState::Executing {
            let due = self.request.as_mut().and_then(|r| {
                if r.pending.as_ref().is_some_and(|p| now >= p.due_ms) {
                    r.pending.take()
                } else {
                    None
                }
            });
            if let Some(pending) = due {
                self.execute_now(pending.target_id, pending.node, pending.action);
            }
        }
    }

    /// Report a fault from the external audio source (microphone wrapper).
    pub fn notify_source_error(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.emit_error(None, code, message.into());
    }

    /// Forward raw per-keyword scores to a metering observer.
    pub fn set_score_observer(&mut self, observer: Option<ScoreObserver>) {
        self.kws.set_score_observer(observer);
    }

    // --- Simulated path ---

    /// Run the resolution flow on `text` as if it had been transcribed,
    /// bypassing the audio stages.
    pub fn simulate_transcript(&mut self, text: &str) {
        if self.state != EngineState::ListeningOn {
            tracing::warn!(state = ?self.state, "simulate_transcript ignored");
            return;
        }
        self.begin_request(None);
        self.emit_index_built();
        self.emit(
            self.request_id(),
            EventKind::TranscriptReady {
                transcript: text.to_string(),
            },
        );
        self.resolve_transcript(text);
    }

    // --- Disambiguation and confirmation ---

    /// Resolve an ambiguity hold by picking one candidate id.
    pub fn select_disambiguation_target(&mut self, target_id: &str) {
        if self.state != EngineState::Error {
            tracing::warn!(state = ?self.state, "no ambiguity hold to select from");
            return;
        }
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some(Hold::Ambiguous { candidate_ids }) = &req.hold else {
            return;
        };
        if !candidate_ids.iter().any(|id| id == target_id) {
            tracing::warn!(target_id, "selection is not one of the held candidates");
            return;
        }
        let Some(target) = req.index.target_by_id(target_id) else {
            tracing::warn!(target_id, "selected target vanished from the index");
            return;
        };
        let node = target.node;
        let action = default_action(self.host.as_ref(), node);
        self.state = EngineState::Executing;
        self.execute_now(target_id.to_string(), node, action);
    }

    /// Approve the held high-risk action.
    pub fn confirm_action(&mut self) {
        if self.state != EngineState::AwaitingConfirmation {
            tracing::warn!(state = ?self.state, "no confirmation pending");
            return;
        }
        let held = self
            .request
            .as_mut()
            .and_then(|r| r.hold.take());
        let Some(Hold::Confirmation {
            target_id,
            node,
            action,
        }) = held
        else {
            self.finish_request();
            return;
        };
        self.state = EngineState::Executing;
        self.execute_now(target_id, node, action);
    }

    /// Decline the held high-risk action. No action is performed.
    pub fn cancel_confirmation(&mut self) {
        if self.state != EngineState::AwaitingConfirmation {
            return;
        }
        self.finish_request();
    }

    // --- Introspection ---

    pub fn subscribe(
        &self,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    pub fn event_history(&self) -> Vec<Event> {
        self.bus.history()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The in-flight request's index snapshot, if any.
    pub fn current_index(&self) -> Option<&TargetIndex> {
        self.request.as_ref().map(|r| &r.index)
    }

    pub fn host(&self) -> &dyn DomHost {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> &mut dyn DomHost {
        self.host.as_mut()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // --- Internals ---

    fn emit(&self, request_id: Option<String>, kind: EventKind) {
        self.bus.emit(Event {
            ts: self.clock.now_ms(),
            request_id,
            kind,
        });
    }

    fn emit_error(&self, request_id: Option<String>, code: ErrorCode, message: String) {
        self.emit(
            request_id,
            EventKind::EngineError {
                code,
                message,
                details: None,
            },
        );
    }

    fn request_id(&self) -> Option<String> {
        self.request.as_ref().map(|r| r.id.clone())
    }

    fn handle_keyword(&mut self, detection: KeywordDetection) {
        let KeywordDetection { keyword, score } = detection;
        match (self.state, keyword.as_str()) {
            (EngineState::ListeningOn, keywords::OPEN | keywords::CLICK) => {
                self.emit(
                    None,
                    EventKind::KeywordDetected {
                        keyword: keyword.clone(),
                        confidence: Some(score),
                    },
                );
                let deadline = self.clock.now_ms() + self.config.capture_timeout_ms;
                self.begin_request(Some(deadline));
                self.capture.begin();
                self.vad.start();
                self.state = EngineState::CapturingTarget;
                self.emit(self.request_id(), EventKind::CaptureStarted);
            }
            (EngineState::ListeningOn, keywords::HELP) => {
                self.emit(
                    None,
                    EventKind::KeywordDetected {
                        keyword: keyword.clone(),
                        confidence: Some(score),
                    },
                );
            }
            (EngineState::CapturingTarget, keywords::STOP) => {
                self.abort_capture(CaptureEndReason::Stop);
            }
            (EngineState::CapturingTarget, keywords::CANCEL) => {
                self.abort_capture(CaptureEndReason::Cancel);
            }
            // Everything else is an undefined input for the current state.
            _ => {
                tracing::debug!(keyword = %keyword, state = ?self.state, "keyword ignored");
            }
        }
    }

    /// Mint a request and snapshot the target index.
    fn begin_request(&mut self, capture_deadline_ms: Option<i64>) {
        let id = Uuid::new_v4().to_string();
        let index = build_index(self.host.as_mut(), &self.deny);
        tracing::debug!(request = %id, targets = index.targets.len(), "request started");
        self.request = Some(Request {
            id,
            index,
            capture_deadline_ms,
            pending: None,
            hold: None,
        });
    }

    fn emit_index_built(&self) {
        if let Some(req) = self.request.as_ref() {
            self.emit(
                Some(req.id.clone()),
                EventKind::TargetIndexBuilt {
                    target_count: req.index.targets.len(),
                    scope: req.index.scope,
                },
            );
        }
    }

    /// Close the capture window without transcribing.
    fn abort_capture(&mut self, reason: CaptureEndReason) {
        self.capture.discard();
        self.vad.stop();
        self.emit(self.request_id(), EventKind::CaptureEnded { reason });
        self.finish_request();
    }

    /// Close the capture window and run the utterance through ASR.
    fn end_capture(&mut self, reason: CaptureEndReason) {
        let samples = self.capture.detach();
        self.vad.stop();
        if let Some(req) = self.request.as_mut() {
            req.capture_deadline_ms = None;
        }
        self.emit(self.request_id(), EventKind::CaptureEnded { reason });

        self.state = EngineState::Transcribing;
        self.emit(self.request_id(), EventKind::TranscriptionStarted);

        match self.asr.transcribe(&samples) {
            Err(e) => {
                self.emit_error(self.request_id(), ErrorCode::AsrFailed, e.to_string());
                self.finish_request();
            }
            Ok(text) => {
                let transcript = text.trim().to_string();
                if transcript.is_empty() {
                    self.emit_error(
                        self.request_id(),
                        ErrorCode::NoSpeechDetected,
                        "no speech detected in capture window".to_string(),
                    );
                    self.finish_request();
                } else {
                    self.emit(
                        self.request_id(),
                        EventKind::TranscriptReady {
                            transcript: transcript.clone(),
                        },
                    );
                    self.emit_index_built();
                    self.resolve_transcript(&transcript);
                }
            }
        }
    }

    fn resolve_transcript(&mut self, transcript: &str) {
        self.state = EngineState::ResolvingTarget;
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let rid = Some(req.id.clone());

        if req.index.targets.is_empty() {
            self.emit(
                rid,
                EventKind::TargetResolutionFailed {
                    reason: ResolutionFailure::Misconfiguration,
                    details: Some(serde_json::json!({
                        "code": ErrorCode::MisconfigNoAddressableTargets,
                    })),
                },
            );
            self.finish_request();
            return;
        }

        let candidates: Vec<Candidate> = req
            .index
            .targets
            .iter()
            .map(|t| Candidate {
                id: t.id.clone(),
                label: t.label.clone(),
                synonyms: t.synonyms.clone(),
            })
            .collect();
        let query = normalize(transcript);
        let resolution = resolve(&query, &candidates, &self.config.matcher_config());

        match resolution {
            Resolution::Unique { id, kind, .. } => self.accept_target(&id, kind),
            Resolution::Ambiguous { candidates } => {
                let detail: Vec<serde_json::Value> = match self.request.as_ref() {
                    Some(req) => candidates
                        .iter()
                        .filter_map(|c| req.index.target_by_id(&c.id))
                        .map(|t| serde_json::json!({ "id": t.id, "label": t.label }))
                        .collect(),
                    None => return,
                };
                self.emit(
                    rid,
                    EventKind::TargetResolutionFailed {
                        reason: ResolutionFailure::Ambiguous,
                        details: Some(serde_json::json!({ "candidates": detail })),
                    },
                );
                // Hold in the failure state awaiting a user selection.
                self.state = EngineState::Error;
                let ids = candidates.into_iter().map(|c| c.id).collect();
                if let Some(req) = self.request.as_mut() {
                    req.hold = Some(Hold::Ambiguous { candidate_ids: ids });
                }
            }
            Resolution::NoMatch => {
                self.emit(
                    rid,
                    EventKind::TargetResolutionFailed {
                        reason: ResolutionFailure::NoMatch,
                        details: Some(serde_json::json!({ "transcript": query })),
                    },
                );
                self.finish_request();
            }
            Resolution::Misconfiguration { duplicates } => {
                self.emit(
                    rid,
                    EventKind::TargetResolutionFailed {
                        reason: ResolutionFailure::Misconfiguration,
                        details: Some(serde_json::json!({
                            "code": ErrorCode::MisconfigDuplicateLabels,
                            "duplicates": duplicates,
                        })),
                    },
                );
                self.finish_request();
            }
        }
    }

    fn accept_target(&mut self, target_id: &str, kind: MatchKind) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let rid = Some(req.id.clone());
        let Some(target) = req.index.target_by_id(target_id) else {
            tracing::warn!(target_id, "resolved target vanished from the index");
            self.finish_request();
            return;
        };
        let node = target.node;
        let label = target.label.clone();
        let risk = target.risk;

        let action = default_action(self.host.as_ref(), node);
        self.emit(
            rid.clone(),
            EventKind::TargetResolved {
                target_id: target_id.to_string(),
                label: label.clone(),
                match_kind: kind,
            },
        );
        self.emit(
            rid.clone(),
            EventKind::ActionProposed {
                action,
                target_id: target_id.to_string(),
                risk,
            },
        );

        if risk == Some(RiskLevel::High) {
            self.emit(
                rid,
                EventKind::ConfirmationRequired {
                    action,
                    target_id: target_id.to_string(),
                    label,
                },
            );
            self.state = EngineState::AwaitingConfirmation;
            if let Some(req) = self.request.as_mut() {
                req.hold = Some(Hold::Confirmation {
                    target_id: target_id.to_string(),
                    node,
                    action,
                });
            }
        } else {
            self.schedule_execution(target_id.to_string(), node, action);
        }
    }

    /// Arm the highlight delay, or execute immediately when it is zero.
    fn schedule_execution(&mut self, target_id: String, node: NodeId, action: ActionKind) {
        self.state = EngineState::Executing;
        if self.config.highlight_ms <= 0 {
            self.execute_now(target_id, node, action);
            return;
        }
        let due_ms = self.clock.now_ms() + self.config.highlight_ms;
        if let Some(req) = self.request.as_mut() {
            req.pending = Some(PendingAction {
                target_id,
                node,
                action,
                due_ms,
            });
        }
    }

    fn execute_now(&mut self, target_id: String, node: NodeId, action: ActionKind) {
        let rid = self.request_id();
        match run_action(self.host.as_mut(), node, action) {
            Ok(()) => {
                self.emit(
                    rid,
                    EventKind::ActionExecuted {
                        action,
                        target_id,
                        ok: true,
                        error: None,
                    },
                );
            }
            Err(message) => {
                self.emit(
                    rid.clone(),
                    EventKind::ActionExecuted {
                        action,
                        target_id,
                        ok: false,
                        error: Some(message.clone()),
                    },
                );
                self.emit_error(rid, ErrorCode::ExecutionFailed, message);
            }
        }
        self.finish_request();
    }

    /// Retire the current request and return to listening.
    fn finish_request(&mut self) {
        self.request = None;
        if self.state != EngineState::ListeningOff {
            self.state = EngineState::ListeningOn;
        }
    }
}
