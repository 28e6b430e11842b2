//! Integration tests for playback sessions and the registry

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use ui_playback::playback::{
    FailureKind, PlaybackError, PlaybackEvent, PlaybackSession, SessionConfig, SessionRegistry,
    SessionState, UsageError,
};
use ui_playback::script::{Document, Expect, Operator, Position, Step, TestCase};
use ui_playback::surface::{SharedSurface, VirtualSurface, shared};

fn form_surface() -> SharedSurface {
    shared(
        VirtualSurface::new()
            .title("Sign up")
            .element("#email", "")
            .element("#submit", "Submit")
            .reveal_on_click("#submit", "#welcome", "Welcome!"),
    )
}

fn config() -> SessionConfig {
    SessionConfig::default().timeout_ms(500).poll_interval_ms(1)
}

fn new_session(steps: Vec<Step>, surface: SharedSurface) -> PlaybackSession {
    PlaybackSession::new(
        "session_it",
        Arc::new(Document::from_steps(steps)),
        surface,
        config(),
    )
}

fn collect_events(session: &PlaybackSession) -> Arc<Mutex<Vec<PlaybackEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

fn playback_complete(events: &[PlaybackEvent]) -> Option<bool> {
    events.iter().find_map(|e| match e {
        PlaybackEvent::PlaybackComplete { success, .. } => Some(*success),
        _ => None,
    })
}

fn scenario_steps(type_target: &str) -> Vec<Step> {
    vec![
        Step::click("#submit"),
        Step::type_text(type_target, "ada@example.com"),
        Step::wait_for("#welcome"),
    ]
}

#[test]
fn test_scenario_all_steps_succeed() {
    let mut session = new_session(scenario_steps("#email"), form_surface());
    let events = collect_events(&session);
    session.start().unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.results.len(), 3);
    assert!(snapshot.results.values().all(|r| r.success));
    assert_eq!(playback_complete(&events.lock()), Some(true));

    // playback-complete is the last event of the run
    assert_eq!(events.lock().last().map(|e| e.kind()), Some("playback-complete"));
}

#[test]
fn test_scenario_failure_stops_the_run() {
    let mut session = new_session(scenario_steps("#nickname"), form_surface());
    let events = collect_events(&session);
    session.start().unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.results.len(), 2);
    assert!(snapshot.results[&Position::flat(0)].success);

    let failed = &snapshot.results[&Position::flat(1)];
    assert!(!failed.success);
    assert_eq!(failed.failure, Some(FailureKind::Execution));
    assert!(failed.error.as_deref().unwrap().contains("selector not found"));
    assert!(!snapshot.results.contains_key(&Position::flat(2)));
    assert_eq!(playback_complete(&events.lock()), Some(false));
}

#[test]
fn test_pause_from_listener_waits_for_step_in_flight() {
    let surface = shared(VirtualSurface::new().element("#a", "A"));
    let steps = (0..5).map(|_| Step::click("#a")).collect();
    let mut session = new_session(steps, surface);

    let control = session.control();
    session.subscribe(move |event| {
        if let PlaybackEvent::StepStart { position, .. } = event {
            if *position == Position::flat(2) {
                assert!(control.pause());
            }
        }
    });
    session.start().unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.position, Some(Position::flat(2)));
    assert_eq!(snapshot.results.len(), 3);

    session.resume().unwrap();
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.snapshot().results.len(), 5);
}

#[test]
fn test_pause_from_another_thread_never_truncates_a_step() {
    let surface = shared(
        VirtualSurface::new()
            .element("#a", "A")
            .latency(Duration::from_millis(20)),
    );
    let registry = Arc::new(SessionRegistry::new());
    let steps = (0..5).map(|_| Step::click("#a")).collect();
    let id = registry.create(Document::from_steps(steps), surface, config());

    let (started_tx, started_rx) = mpsc::channel();
    registry
        .subscribe(&id, move |event| {
            if let PlaybackEvent::StepStart { position, .. } = event {
                let _ = started_tx.send(*position);
            }
        })
        .unwrap();

    let runner = {
        let registry = registry.clone();
        let id = id.clone();
        thread::spawn(move || registry.start(&id))
    };

    let in_flight = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    registry.pause(&id).unwrap();
    runner.join().unwrap().unwrap();

    let snapshot = registry.snapshot(&id).unwrap();
    let position = snapshot.position.unwrap();
    assert!(position >= in_flight);
    match snapshot.state {
        SessionState::Paused => assert_eq!(snapshot.results.len(), position.step + 1),
        SessionState::Completed => assert_eq!(snapshot.results.len(), 5),
        other => panic!("unexpected state {}", other),
    }
    assert!(snapshot.results.values().all(|r| r.success));
}

#[test]
fn test_single_step_transitions() {
    let steps: Vec<Step> = (0..3).map(|_| Step::evaluate("1")).collect();
    let mut session = new_session(steps, form_surface());

    let mut states = Vec::new();
    for _ in 0..3 {
        session.step().unwrap();
        states.push(session.state());
    }
    assert_eq!(
        states,
        vec![SessionState::Paused, SessionState::Paused, SessionState::Completed]
    );
    assert_eq!(session.step(), Err(PlaybackError::Usage(UsageError::Completed)));
}

#[test]
fn test_positions_advance_monotonically_across_test_cases() {
    let document = Document::from_test_cases(vec![
        TestCase::new("login", vec![Step::click("#submit"), Step::evaluate("title")]),
        TestCase::new("empty", vec![]),
        TestCase::new("verify", vec![Step::wait_for("#welcome")]).depends_on(["login"]),
    ]);
    let mut session = PlaybackSession::new("session_nested", Arc::new(document), form_surface(), config());
    let events = collect_events(&session);
    session.start().unwrap();

    let completed: Vec<Position> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::StepComplete { position, .. } => Some(*position),
            _ => None,
        })
        .collect();
    assert_eq!(
        completed,
        vec![Position::nested(0, 0), Position::nested(0, 1), Position::nested(2, 0)]
    );
    assert_eq!(session.snapshot().results.len(), 3);
}

#[test]
fn test_each_step_emits_start_then_complete() {
    let mut session = new_session(vec![Step::click("#submit"), Step::wait_for("#welcome")], form_surface());
    let events = collect_events(&session);
    session.start().unwrap();

    let kinds: Vec<&str> = events.lock().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "session-state",
            "step-start",
            "step-complete",
            "step-start",
            "step-complete",
            "session-state",
            "playback-complete",
        ]
    );
}

#[test]
fn test_stop_is_idempotent_and_drops_listeners() {
    let mut session = new_session(scenario_steps("#email"), form_surface());
    let events = collect_events(&session);

    session.step().unwrap();
    session.stop().unwrap();
    let after_first = events.lock().len();
    assert!(matches!(
        events.lock().last(),
        Some(PlaybackEvent::SessionState {
            state: SessionState::Idle,
            ..
        })
    ));

    session.stop().unwrap();
    session.dispose().unwrap();
    session.stop().unwrap();
    session.dispose().unwrap();
    assert_eq!(events.lock().len(), after_first);
    assert_eq!(session.state(), SessionState::Disposed);
}

#[test]
fn test_assertions_and_captures() {
    let steps = vec![
        Step::evaluate("title").returns("page_title"),
        Step::click("#submit").expect(Expect::exists("#welcome")),
        Step::assert(Some("#welcome"), Expect::value(Operator::Contains, "Welcome")),
        Step::evaluate("count").expect(Expect::value(Operator::Gt, 5)),
    ];
    let mut session = new_session(steps, form_surface());
    session.start().unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.captures.get("page_title"), Some(&json!("Sign up")));
    assert_eq!(snapshot.results[&Position::flat(1)].value, Some(json!(true)));
    assert_eq!(
        snapshot.results[&Position::flat(2)].value,
        Some(json!({ "actual": "Welcome!", "expected": "Welcome" }))
    );

    let last = &snapshot.results[&Position::flat(3)];
    assert_eq!(last.failure, Some(FailureKind::Assertion));
    assert_eq!(last.value, Some(json!({ "actual": 3, "expected": 5 })));
}

#[test]
fn test_step_timeout_fails_the_run() {
    let steps = vec![Step::wait_for("#never").with_timeout(15), Step::click("#submit")];
    let mut session = new_session(steps, form_surface());
    session.start().unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.results.len(), 1);
    assert_eq!(snapshot.results[&Position::flat(0)].failure, Some(FailureKind::Timeout));
}

#[test]
fn test_registry_rejects_commands_while_running() {
    let registry = Arc::new(SessionRegistry::new());
    let steps = (0..3).map(|_| Step::click("#submit")).collect();
    let id = registry.create(Document::from_steps(steps), form_surface(), config());

    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    registry
        .subscribe(&id, move |event| {
            if let PlaybackEvent::StepStart { position, .. } = event {
                if position.step == 0 {
                    let _ = entered_tx.send(());
                    let _ = release_rx.lock().recv();
                }
            }
        })
        .unwrap();

    let runner = {
        let registry = registry.clone();
        let id = id.clone();
        thread::spawn(move || registry.start(&id))
    };

    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(registry.start(&id), Err(UsageError::Busy.into()));
    assert_eq!(registry.step(&id), Err(UsageError::Busy.into()));
    assert_eq!(registry.stop(&id), Ok(()));
    release_tx.send(()).unwrap();
    runner.join().unwrap().unwrap();

    // The stop request lands at the boundary after the step in flight
    let snapshot = registry.snapshot(&id).unwrap();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.results.len(), 1);
}

#[test]
fn test_registry_lifecycle() {
    let registry = SessionRegistry::new();
    let a = registry.create(Document::from_steps(vec![Step::click("#submit")]), form_surface(), config());
    let b = registry.create(Document::from_steps(vec![]), form_surface(), config().suite("smoke"));
    assert_ne!(a, b);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.snapshot(&b).unwrap().suite_id.as_deref(), Some("smoke"));

    registry.start(&a).unwrap();
    assert_eq!(registry.snapshot(&a).unwrap().state, SessionState::Completed);
    assert_eq!(registry.start(&a), Err(UsageError::Completed.into()));

    registry.stop(&a).unwrap();
    registry.start(&a).unwrap();
    assert_eq!(registry.snapshot(&a).unwrap().results.len(), 1);

    registry.remove(&a).unwrap();
    assert_eq!(registry.start(&a), Err(PlaybackError::NotFound(a.clone())));

    registry.dispose_all();
    assert!(registry.is_empty());
}
