//! End-to-end scenarios: page in, spoken (or simulated) label in, exactly
//! one safe action out — or a refusal.

use sayso_dom::{ActionKind, IndexScope, PageDocument};
use sayso_engine::testing::{FakeAsr, ManualClock, ScriptedGate, ScriptedSpotter};
use sayso_engine::{
    CaptureEndReason, EngineConfig, EngineState, ErrorCode, Event, EventKind, ResolutionFailure,
    VoiceEngine,
};
use sayso_resolve::{CollisionPolicy, MatchKind};
use sayso_vad::SpeechEvent;

const FRAME: usize = sayso_audio::FRAME_SAMPLES;

fn quiet_config() -> EngineConfig {
    EngineConfig {
        highlight_ms: 0,
        ..EngineConfig::default()
    }
}

fn engine(config: EngineConfig, doc: PageDocument) -> VoiceEngine {
    engine_with(
        config,
        doc,
        ScriptedSpotter::new(),
        ScriptedGate::new(),
        FakeAsr::new(),
    )
}

fn engine_with(
    config: EngineConfig,
    doc: PageDocument,
    spotter: ScriptedSpotter,
    gate: ScriptedGate,
    asr: FakeAsr,
) -> VoiceEngine {
    VoiceEngine::with_clock(
        config,
        Box::new(doc),
        Box::new(spotter),
        Box::new(gate),
        Box::new(asr),
        Box::new(ManualClock::new(10_000)),
    )
    .unwrap()
}

fn names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

fn page_doc(doc: &VoiceEngine) -> &PageDocument {
    doc.host().as_any().downcast_ref::<PageDocument>().unwrap()
}

#[test]
fn exact_unique_click() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    let button = doc.element(root, "button").text("Submit").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("Submit");

    let history = engine.event_history();
    assert_eq!(
        names(&history),
        vec![
            "ListeningChanged",
            "TargetIndexBuilt",
            "TranscriptReady",
            "TargetResolved",
            "ActionProposed",
            "ActionExecuted",
        ]
    );
    assert!(matches!(
        &history[1].kind,
        EventKind::TargetIndexBuilt { target_count: 1, scope: IndexScope::Page }
    ));
    assert!(matches!(
        &history[2].kind,
        EventKind::TranscriptReady { transcript } if transcript == "Submit"
    ));
    assert!(matches!(
        &history[3].kind,
        EventKind::TargetResolved { label, match_kind: MatchKind::Exact, .. } if label == "submit"
    ));
    assert!(matches!(
        &history[4].kind,
        EventKind::ActionProposed { action: ActionKind::Click, .. }
    ));
    assert!(matches!(
        &history[5].kind,
        EventKind::ActionExecuted { ok: true, action: ActionKind::Click, .. }
    ));
    assert_eq!(engine.state(), EngineState::ListeningOn);

    let actions = page_doc(&engine).actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].node, button);
    assert_eq!(actions[0].action, ActionKind::Click);
}

#[test]
fn synonym_resolves_as_exact() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "a")
        .attr("href", "/billing")
        .attr("data-voice-label", "Billing")
        .attr("data-voice-synonyms", "invoices, payments")
        .done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("invoices");

    let resolved = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolved { label, match_kind, .. } => Some((label, match_kind)),
            _ => None,
        })
        .expect("target resolved");
    assert_eq!(resolved, ("billing".to_string(), MatchKind::Exact));
    assert_eq!(page_doc(&engine).actions().len(), 1);
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn fuzzy_unique_resolves() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();
    doc.element(root, "button").text("Preferences").done();
    doc.element(root, "a").attr("href", "/logout").text("Log out").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("submti");

    let resolved = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolved { label, match_kind, .. } => Some((label, match_kind)),
            _ => None,
        })
        .expect("target resolved");
    assert_eq!(resolved, ("submit".to_string(), MatchKind::Fuzzy));
    assert_eq!(page_doc(&engine).actions().len(), 1);
}

#[test]
fn ambiguous_holds_until_selection() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Delete").done();
    let second = doc.element(root, "button").text("Delete").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("delete");

    let failure = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolutionFailed { reason, details } => Some((reason, details)),
            _ => None,
        })
        .expect("resolution failed");
    assert_eq!(failure.0, ResolutionFailure::Ambiguous);
    let candidates = failure.1.unwrap()["candidates"].as_array().unwrap().len();
    assert_eq!(candidates, 2);
    assert_eq!(engine.state(), EngineState::Error);
    assert!(page_doc(&engine).actions().is_empty());

    // Picking the second candidate executes against it specifically.
    let second_id = engine.current_index().unwrap().targets[1].id.clone();
    engine.select_disambiguation_target(&second_id);

    let executed = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::ActionExecuted { target_id, ok, .. } => Some((target_id, ok)),
            _ => None,
        })
        .expect("action executed");
    assert_eq!(executed, (second_id, true));
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert_eq!(page_doc(&engine).actions()[0].node, second);
}

#[test]
fn ambiguous_hold_cancels_cleanly() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Delete").done();
    doc.element(root, "button").text("Delete").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("delete");
    assert_eq!(engine.state(), EngineState::Error);

    engine.cancel();
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert!(page_doc(&engine).actions().is_empty());

    // A stale selection after cancel is a no-op.
    engine.select_disambiguation_target("vt-1");
    assert!(page_doc(&engine).actions().is_empty());
}

#[test]
fn error_policy_refuses_everything() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Delete").done();
    doc.element(root, "button").text("Delete").done();
    doc.element(root, "button").text("Submit").done();

    let config = EngineConfig {
        collision_policy: CollisionPolicy::Error,
        ..quiet_config()
    };
    let mut engine = engine(config, doc);
    engine.start_listening();
    // The query does not even mention the colliding label.
    engine.simulate_transcript("submit");

    let failure = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolutionFailed { reason, details } => Some((reason, details)),
            _ => None,
        })
        .expect("resolution failed");
    assert_eq!(failure.0, ResolutionFailure::Misconfiguration);
    assert_eq!(failure.1.unwrap()["code"], "MISCONFIG_DUPLICATE_LABELS");
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert!(page_doc(&engine).actions().is_empty());
}

#[test]
fn high_risk_requires_confirmation() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button")
        .text("Delete Account")
        .attr("data-voice-risk", "high")
        .done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("delete account");

    let kinds = names(&engine.event_history());
    assert!(kinds.contains(&"TargetResolved"));
    assert!(kinds.contains(&"ConfirmationRequired"));
    assert!(!kinds.contains(&"ActionExecuted"));
    assert_eq!(engine.state(), EngineState::AwaitingConfirmation);

    engine.confirm_action();
    let executed = engine
        .event_history()
        .into_iter()
        .any(|e| matches!(e.kind, EventKind::ActionExecuted { ok: true, .. }));
    assert!(executed);
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert_eq!(page_doc(&engine).actions().len(), 1);
}

#[test]
fn high_risk_cancel_performs_nothing() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button")
        .text("Delete Account")
        .attr("data-voice-risk", "high")
        .done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("delete account");
    assert_eq!(engine.state(), EngineState::AwaitingConfirmation);

    engine.cancel_confirmation();
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert!(page_doc(&engine).actions().is_empty());
    let executed = engine
        .event_history()
        .into_iter()
        .any(|e| matches!(e.kind, EventKind::ActionExecuted { .. }));
    assert!(!executed);
}

#[test]
fn modal_scope_shadows_background() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Close").done();
    let dialog = doc
        .element(root, "div")
        .attr("role", "dialog")
        .attr("aria-modal", "true")
        .done();
    let dialog_close = doc.element(dialog, "button").text("Close").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("close");

    let built = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetIndexBuilt { target_count, scope } => Some((target_count, scope)),
            _ => None,
        })
        .expect("index built");
    assert_eq!(built, (1, IndexScope::Modal));

    // Only the dialog's button is addressable; no ambiguity with the page.
    let actions = page_doc(&engine).actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].node, dialog_close);
}

#[test]
fn real_audio_path_event_order_and_fanout() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("open", 0.92);
    spotter.queue_silence(3);

    let mut gate = ScriptedGate::new();
    gate.queue_silence(1);
    gate.queue_events(vec![SpeechEvent::Started { at_ms: 10_080 }]);
    gate.queue_silence(1);
    gate.queue_events(vec![SpeechEvent::Ended { at_ms: 10_320 }]);

    let mut asr = FakeAsr::new();
    asr.queue_text("Submit");
    let received = asr.received_handle();

    let mut engine = engine_with(quiet_config(), doc, spotter, gate, asr);
    engine.start_listening();
    let frame = vec![0.0f32; FRAME];
    for _ in 0..4 {
        engine.on_frame(&frame);
    }

    let history = engine.event_history();
    assert_eq!(
        names(&history),
        vec![
            "ListeningChanged",
            "KeywordDetected",
            "CaptureStarted",
            "CaptureEnded",
            "TranscriptionStarted",
            "TranscriptReady",
            "TargetIndexBuilt",
            "TargetResolved",
            "ActionProposed",
            "ActionExecuted",
        ]
    );
    assert!(matches!(
        &history[3].kind,
        EventKind::CaptureEnded { reason: CaptureEndReason::Vad }
    ));

    // Every event from CaptureStarted on carries the same request id.
    let rid = history[2].request_id.clone().expect("request id");
    for event in &history[2..] {
        assert_eq!(event.request_id.as_ref(), Some(&rid));
    }
    assert_eq!(history[1].request_id, None); // KeywordDetected precedes the request

    // The capture buffer saw all four frames before speech end detached it.
    assert_eq!(*received.lock().unwrap(), vec![4 * FRAME]);
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert_eq!(page_doc(&engine).actions().len(), 1);
}

#[test]
fn capture_timeout_closes_window() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("open", 0.9);
    spotter.queue_silence(10);

    let clock = ManualClock::new(10_000);
    let mut engine = VoiceEngine::with_clock(
        quiet_config(),
        Box::new(doc),
        Box::new(spotter),
        Box::new(ScriptedGate::new()),
        Box::new(FakeAsr::new()),
        Box::new(clock.clone()),
    )
    .unwrap();

    engine.start_listening();
    let frame = vec![0.0f32; FRAME];
    engine.on_frame(&frame);
    assert_eq!(engine.state(), EngineState::CapturingTarget);

    clock.advance(5_001);
    engine.on_frame(&frame);

    let history = engine.event_history();
    let ended = history
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::CaptureEnded { reason } => Some(*reason),
            _ => None,
        })
        .expect("capture ended");
    assert_eq!(ended, CaptureEndReason::Timeout);

    // Empty transcript from the fake: refusal, not a guess.
    let error = history
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::EngineError { code, .. } => Some(*code),
            _ => None,
        })
        .expect("engine error");
    assert_eq!(error, ErrorCode::NoSpeechDetected);
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn stop_keyword_aborts_capture() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("open", 0.9);
    spotter.queue_detection("stop", 0.8);

    let mut engine = engine_with(
        quiet_config(),
        doc,
        spotter,
        ScriptedGate::new(),
        FakeAsr::new(),
    );
    engine.start_listening();
    let frame = vec![0.0f32; FRAME];
    engine.on_frame(&frame);
    engine.on_frame(&frame);

    let history = engine.event_history();
    let ended = history
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::CaptureEnded { reason } => Some(*reason),
            _ => None,
        })
        .expect("capture ended");
    assert_eq!(ended, CaptureEndReason::Stop);
    assert!(!names(&history).contains(&"TranscriptionStarted"));
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn cancel_mid_capture_discards_buffer() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("click", 0.9);
    spotter.queue_silence(2);

    let mut engine = engine_with(
        quiet_config(),
        doc,
        spotter,
        ScriptedGate::new(),
        FakeAsr::new(),
    );
    engine.start_listening();
    let frame = vec![0.0f32; FRAME];
    engine.on_frame(&frame);
    assert_eq!(engine.state(), EngineState::CapturingTarget);

    engine.cancel();
    let ended = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::CaptureEnded { reason } => Some(reason),
            _ => None,
        })
        .expect("capture ended");
    assert_eq!(ended, CaptureEndReason::Cancel);
    assert_eq!(engine.state(), EngineState::ListeningOn);

    // Listening stays enabled; a later request works.
    engine.simulate_transcript("submit");
    assert_eq!(page_doc(&engine).actions().len(), 1);
}

#[test]
fn help_keyword_only_emits() {
    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("help", 0.9);

    let mut engine = engine_with(
        quiet_config(),
        PageDocument::new(),
        spotter,
        ScriptedGate::new(),
        FakeAsr::new(),
    );
    engine.start_listening();
    engine.on_frame(&vec![0.0f32; FRAME]);

    let history = engine.event_history();
    assert_eq!(names(&history), vec!["ListeningChanged", "KeywordDetected"]);
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn asr_failure_returns_to_listening() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("open", 0.9);
    spotter.queue_silence(1);

    let mut gate = ScriptedGate::new();
    gate.queue_events(vec![SpeechEvent::Started { at_ms: 10_000 }]);
    gate.queue_events(vec![SpeechEvent::Ended { at_ms: 10_080 }]);

    let mut asr = FakeAsr::new();
    asr.queue_failure("decoder exploded");

    let mut engine = engine_with(quiet_config(), doc, spotter, gate, asr);
    engine.start_listening();
    let frame = vec![0.0f32; FRAME];
    engine.on_frame(&frame);
    engine.on_frame(&frame);

    let error = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::EngineError { code, .. } => Some(code),
            _ => None,
        })
        .expect("engine error");
    assert_eq!(error, ErrorCode::AsrFailed);
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert!(page_doc(&engine).actions().is_empty());
}

#[test]
fn empty_page_is_a_misconfiguration() {
    let mut engine = engine(quiet_config(), PageDocument::new());
    engine.start_listening();
    engine.simulate_transcript("anything");

    let failure = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolutionFailed { reason, details } => Some((reason, details)),
            _ => None,
        })
        .expect("resolution failed");
    assert_eq!(failure.0, ResolutionFailure::Misconfiguration);
    assert_eq!(failure.1.unwrap()["code"], "MISCONFIG_NO_ADDRESSABLE_TARGETS");
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn no_match_returns_to_listening() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("zebra carousel");

    let failure = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolutionFailed { reason, .. } => Some(reason),
            _ => None,
        })
        .expect("resolution failed");
    assert_eq!(failure, ResolutionFailure::NoMatch);
    assert_eq!(engine.state(), EngineState::ListeningOn);
    assert!(page_doc(&engine).actions().is_empty());
}

#[test]
fn execution_failure_surfaces_both_events() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();
    doc.fail_actions("element detached");

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();
    engine.simulate_transcript("submit");

    let history = engine.event_history();
    let executed = history
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::ActionExecuted { ok, error, .. } => Some((*ok, error.clone())),
            _ => None,
        })
        .expect("action executed event");
    assert_eq!(executed, (false, Some("element detached".to_string())));

    let error = history
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::EngineError { code, .. } => Some(*code),
            _ => None,
        })
        .expect("engine error");
    assert_eq!(error, ErrorCode::ExecutionFailed);
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn highlight_delay_defers_execution() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let config = EngineConfig {
        highlight_ms: 300,
        ..EngineConfig::default()
    };
    let clock = ManualClock::new(10_000);
    let mut engine = VoiceEngine::with_clock(
        config,
        Box::new(doc),
        Box::new(ScriptedSpotter::new()),
        Box::new(ScriptedGate::new()),
        Box::new(FakeAsr::new()),
        Box::new(clock.clone()),
    )
    .unwrap();

    engine.start_listening();
    engine.simulate_transcript("submit");

    // Proposed but not yet executed.
    assert_eq!(engine.state(), EngineState::Executing);
    assert!(page_doc(&engine).actions().is_empty());

    clock.advance(299);
    engine.tick();
    assert!(page_doc(&engine).actions().is_empty());

    clock.advance(1);
    engine.tick();
    assert_eq!(page_doc(&engine).actions().len(), 1);
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn cancel_during_highlight_skips_action() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let config = EngineConfig {
        highlight_ms: 300,
        ..EngineConfig::default()
    };
    let clock = ManualClock::new(10_000);
    let mut engine = VoiceEngine::with_clock(
        config,
        Box::new(doc),
        Box::new(ScriptedSpotter::new()),
        Box::new(ScriptedGate::new()),
        Box::new(FakeAsr::new()),
        Box::new(clock.clone()),
    )
    .unwrap();

    engine.start_listening();
    engine.simulate_transcript("submit");
    assert_eq!(engine.state(), EngineState::Executing);

    engine.cancel();
    clock.advance(500);
    engine.tick();

    assert!(page_doc(&engine).actions().is_empty());
    assert_eq!(engine.state(), EngineState::ListeningOn);
}

#[test]
fn stop_listening_cancels_in_flight_request() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();

    let mut spotter = ScriptedSpotter::new();
    spotter.queue_detection("open", 0.9);

    let mut engine = engine_with(
        quiet_config(),
        doc,
        spotter,
        ScriptedGate::new(),
        FakeAsr::new(),
    );
    engine.start_listening();
    engine.on_frame(&vec![0.0f32; FRAME]);
    assert_eq!(engine.state(), EngineState::CapturingTarget);

    engine.stop_listening();

    let history = engine.event_history();
    let kinds = names(&history);
    // The request was cancelled before listening went down.
    let cancel_pos = kinds.iter().position(|k| *k == "CaptureEnded").unwrap();
    let off_pos = kinds.iter().rposition(|k| *k == "ListeningChanged").unwrap();
    assert!(cancel_pos < off_pos);
    assert_eq!(engine.state(), EngineState::ListeningOff);
}

#[test]
fn second_request_sees_page_changes() {
    let mut doc = PageDocument::new();
    let root = doc.root();
    doc.element(root, "button").text("Submit").done();
    // Excluded on the first request, revealed before the second.
    let archive = doc
        .element(root, "button")
        .text("Archive")
        .attr("data-voice-deny", "true")
        .done();

    let mut engine = engine(quiet_config(), doc);
    engine.start_listening();

    engine.simulate_transcript("archive");
    let failure = engine
        .event_history()
        .into_iter()
        .find_map(|e| match e.kind {
            EventKind::TargetResolutionFailed { reason, .. } => Some(reason),
            _ => None,
        })
        .expect("denied element must not resolve");
    assert_eq!(failure, ResolutionFailure::NoMatch);

    // The page changes between requests; the fresh snapshot must see it.
    engine.host_mut().set_attr(archive, "data-voice-deny", "false");
    engine.simulate_transcript("archive");

    let actions = page_doc(&engine).actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].node, archive);
}
