//! The playback session state machine.
//!
//! A session drives one document against one surface:
//!
//! ```text
//! Idle ──start/step──▶ Running ──pause / single step──▶ Paused
//!                         │                                │
//!                         └──last step / failure──▶ Completed
//! any ──stop──▶ Idle        any ──dispose──▶ Disposed
//! ```
//!
//! The run loop executes on the caller's thread. Pause and stop requests
//! made through [`SessionControl`] are consulted at step boundaries, so the
//! step in flight always finishes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use super::events::{EventEmitter, PlaybackEvent, Subscription};
use super::sequence::{StepSequence, StepYield};
use super::types::{
    PlaybackResult, SessionConfig, SessionSnapshot, SessionState, StepResult, UsageError,
};
use crate::executor::millis;
use crate::script::{Document, Position};
use crate::surface::SharedSurface;

#[derive(Debug)]
struct Progress {
    state: SessionState,
    position: Option<Position>,
    results: BTreeMap<Position, StepResult>,
    captures: BTreeMap<String, Value>,
}

/// State readable and signalable without holding the session itself
#[derive(Debug)]
struct SessionShared {
    id: String,
    total_steps: usize,
    group_id: Option<String>,
    suite_id: Option<String>,
    emitter: Arc<EventEmitter>,
    progress: RwLock<Progress>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    dispose_requested: AtomicBool,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        self.progress.read().state
    }

    /// Record the new state, then tell listeners. The lock is released first.
    fn transition(&self, state: SessionState) {
        let position = {
            let mut progress = self.progress.write();
            progress.state = state;
            progress.position
        };
        tracing::debug!(session = %self.id, %state, "session state changed");
        self.emitter.emit(&PlaybackEvent::SessionState {
            session_id: self.id.clone(),
            state,
            position,
            timestamp: Utc::now(),
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        let progress = self.progress.read();
        SessionSnapshot {
            id: self.id.clone(),
            state: progress.state,
            position: progress.position,
            results: progress.results.clone(),
            captures: progress.captures.clone(),
            total_steps: self.total_steps,
            group_id: self.group_id.clone(),
            suite_id: self.suite_id.clone(),
        }
    }

    fn clear_requests(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.dispose_requested.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle for signalling a session from listeners or other threads.
///
/// Nothing here blocks on the session, so it is safe to use while a run
/// loop is in flight.
#[derive(Debug, Clone)]
pub struct SessionControl {
    shared: Arc<SessionShared>,
}

impl SessionControl {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Ask a running session to pause at the next step boundary.
    ///
    /// Returns false (and records nothing) unless the session is running.
    pub fn pause(&self) -> bool {
        if self.shared.state() != SessionState::Running {
            return false;
        }
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Ask the run loop to stop at the next step boundary
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Ask the run loop to dispose the session at the next step boundary
    pub fn request_dispose(&self) {
        self.shared.dispose_requested.store(true, Ordering::SeqCst);
    }

    /// True while a stop or dispose request is waiting to be honored
    pub fn has_pending_requests(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst) || self.shared.dispose_requested.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self, listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.emitter.subscribe(listener)
    }
}

/// One document played against one surface
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
    document: Arc<Document>,
    surface: SharedSurface,
    config: SessionConfig,
    sequence: Option<StepSequence>,
    started_at: Option<Instant>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl PlaybackSession {
    pub fn new(
        id: impl Into<String>,
        document: Arc<Document>,
        surface: SharedSurface,
        config: SessionConfig,
    ) -> Self {
        let shared = Arc::new(SessionShared {
            id: id.into(),
            total_steps: document.step_count(),
            group_id: config.group_id.clone(),
            suite_id: config.suite_id.clone(),
            emitter: EventEmitter::new(),
            progress: RwLock::new(Progress {
                state: SessionState::Idle,
                position: None,
                results: BTreeMap::new(),
                captures: BTreeMap::new(),
            }),
            pause_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            dispose_requested: AtomicBool::new(false),
        });
        Self {
            shared,
            document,
            surface,
            config,
            sequence: None,
            started_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn control(&self) -> SessionControl {
        SessionControl {
            shared: self.shared.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self, listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static) -> Subscription {
        self.shared.emitter.subscribe(listener)
    }

    /// Run until paused, stopped, or complete.
    ///
    /// From Idle this begins a fresh run; from Paused it resumes.
    pub fn start(&mut self) -> PlaybackResult<()> {
        self.refuse_if_requested()?;
        match self.state() {
            SessionState::Idle => {
                self.begin();
                self.run(false)
            }
            SessionState::Paused => self.run(false),
            SessionState::Running => Err(UsageError::AlreadyRunning.into()),
            SessionState::Completed => Err(UsageError::Completed.into()),
            SessionState::Disposed => Err(UsageError::Disposed.into()),
        }
    }

    /// Continue a paused run
    pub fn resume(&mut self) -> PlaybackResult<()> {
        self.refuse_if_requested()?;
        match self.state() {
            SessionState::Paused => self.run(false),
            SessionState::Disposed => Err(UsageError::Disposed.into()),
            _ => Err(UsageError::NotPaused.into()),
        }
    }

    /// Execute exactly one step, then pause (or complete)
    pub fn step(&mut self) -> PlaybackResult<()> {
        self.refuse_if_requested()?;
        match self.state() {
            SessionState::Idle => {
                self.begin();
                self.run(true)
            }
            SessionState::Paused => self.run(true),
            SessionState::Running => Err(UsageError::AlreadyRunning.into()),
            SessionState::Completed => Err(UsageError::Completed.into()),
            SessionState::Disposed => Err(UsageError::Disposed.into()),
        }
    }

    /// Pause at the next step boundary; a no-op unless running
    pub fn pause(&self) -> bool {
        self.control().pause()
    }

    /// Release the sequence, return to Idle and drop every listener.
    ///
    /// Calling it again, or on a session that never ran, changes nothing.
    pub fn stop(&mut self) -> PlaybackResult<()> {
        let state = self.state();
        if state == SessionState::Disposed {
            return Ok(());
        }
        self.shared.clear_requests();
        if state == SessionState::Idle && self.sequence.is_none() {
            return Ok(());
        }
        self.release();
        self.shared.transition(SessionState::Idle);
        self.shared.emitter.clear();
        tracing::info!(session = %self.id(), from = %state, "session stopped");
        Ok(())
    }

    /// Stop and permanently invalidate the session
    pub fn dispose(&mut self) -> PlaybackResult<()> {
        if self.state() == SessionState::Disposed {
            return Ok(());
        }
        self.shared.clear_requests();
        self.release();
        if self.state() != SessionState::Idle {
            self.shared.transition(SessionState::Idle);
        }
        self.shared.transition(SessionState::Disposed);
        self.shared.emitter.clear();
        tracing::info!(session = %self.id(), "session disposed");
        Ok(())
    }

    /// Reset progress and build a fresh sequence
    fn begin(&mut self) {
        self.shared.clear_requests();
        {
            let mut progress = self.shared.progress.write();
            progress.position = None;
            progress.results.clear();
            progress.captures.clear();
        }

        let shared = self.shared.clone();
        let sequence = StepSequence::new(self.document.clone(), self.surface.clone(), self.config.clone())
            .on_step_start(move |position, step| {
                shared.progress.write().position = Some(*position);
                tracing::debug!(session = %shared.id, %position, step = %step.summary(), "step started");
                shared.emitter.emit(&PlaybackEvent::StepStart {
                    session_id: shared.id.clone(),
                    position: *position,
                    step: step.clone(),
                    timestamp: Utc::now(),
                });
            });

        self.sequence = Some(sequence);
        self.started_at = Some(Instant::now());
        tracing::info!(
            session = %self.id(),
            steps = self.shared.total_steps,
            document = self.document.name().unwrap_or("<unnamed>"),
            "playback started"
        );
    }

    fn release(&mut self) {
        if let Some(mut sequence) = self.sequence.take() {
            sequence.cancel();
        }
    }

    /// Carry out a stop or dispose requested through [`SessionControl`]
    /// while another holder had the session. Returns true if one was honored.
    pub fn apply_requests(&mut self) -> PlaybackResult<bool> {
        self.honor_requests()
    }

    /// A command arriving after an unhonored stop or dispose carries it out
    /// and is rejected instead of running.
    fn refuse_if_requested(&mut self) -> PlaybackResult<()> {
        if !self.honor_requests()? {
            return Ok(());
        }
        match self.state() {
            SessionState::Disposed => Err(UsageError::Disposed.into()),
            _ => Err(UsageError::Stopped.into()),
        }
    }

    fn honor_requests(&mut self) -> PlaybackResult<bool> {
        if self.shared.dispose_requested.swap(false, Ordering::SeqCst) {
            self.dispose()?;
            return Ok(true);
        }
        if self.shared.stop_requested.swap(false, Ordering::SeqCst) {
            self.stop()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn run(&mut self, single_step: bool) -> PlaybackResult<()> {
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.transition(SessionState::Running);

        loop {
            if self.honor_requests()? {
                return Ok(());
            }
            if !single_step && self.shared.pause_requested.swap(false, Ordering::SeqCst) {
                break;
            }

            let Some(sequence) = self.sequence.as_mut() else {
                self.finish(true);
                return Ok(());
            };
            let Some(StepYield {
                position,
                step,
                result,
            }) = sequence.next()
            else {
                self.finish(true);
                return Ok(());
            };
            let exhausted = sequence.is_exhausted();
            let success = result.success;

            if success {
                tracing::debug!(session = %self.id(), %position, duration_ms = result.duration_ms, "step passed");
            } else {
                tracing::warn!(
                    session = %self.id(),
                    %position,
                    step = %step.summary(),
                    error = result.error.as_deref().unwrap_or(""),
                    "step failed"
                );
            }
            self.record(position, step.returns.as_deref(), result.clone());
            self.shared.emitter.emit(&PlaybackEvent::StepComplete {
                session_id: self.shared.id.clone(),
                position,
                result,
                timestamp: Utc::now(),
            });

            if !success {
                self.finish(false);
                return Ok(());
            }
            if exhausted {
                self.finish(true);
                return Ok(());
            }
            if single_step {
                break;
            }
        }

        if self.honor_requests()? {
            return Ok(());
        }
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        self.shared.transition(SessionState::Paused);
        Ok(())
    }

    fn record(&self, position: Position, returns: Option<&str>, result: StepResult) {
        let mut progress = self.shared.progress.write();
        if let (Some(label), true) = (returns, result.success) {
            progress
                .captures
                .insert(label.to_string(), result.value.clone().unwrap_or(Value::Null));
        }
        progress.results.insert(position, result);
    }

    fn finish(&mut self, success: bool) {
        self.release();
        let duration_ms = self
            .started_at
            .take()
            .map_or(0, |started| millis(started.elapsed()));

        self.shared.transition(SessionState::Completed);
        tracing::info!(session = %self.id(), success, duration_ms, "playback complete");
        self.shared.emitter.emit(&PlaybackEvent::PlaybackComplete {
            session_id: self.shared.id.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Step;
    use crate::surface::{VirtualSurface, shared};
    use parking_lot::Mutex;

    fn session(steps: Vec<Step>) -> PlaybackSession {
        let surface = shared(VirtualSurface::new().element("#a", "A").element("#b", "B"));
        PlaybackSession::new(
            "session_test",
            Arc::new(Document::from_steps(steps)),
            surface,
            SessionConfig::default().timeout_ms(200).poll_interval_ms(1),
        )
    }

    fn record_kinds(session: &PlaybackSession) -> Arc<Mutex<Vec<String>>> {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        session.subscribe(move |event| {
            let label = match event {
                PlaybackEvent::SessionState { state, .. } => format!("state:{}", state),
                other => other.kind().to_string(),
            };
            sink.lock().push(label);
        });
        kinds
    }

    #[test]
    fn test_full_run_completes() {
        let mut session = session(vec![Step::click("#a"), Step::click("#b")]);
        let kinds = record_kinds(&session);
        session.start().unwrap();

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.snapshot().results.len(), 2);
        assert_eq!(
            *kinds.lock(),
            vec![
                "state:running",
                "step-start",
                "step-complete",
                "step-start",
                "step-complete",
                "state:completed",
                "playback-complete",
            ]
        );
    }

    #[test]
    fn test_empty_document_completes_immediately() {
        let mut session = session(vec![]);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert!(session.snapshot().results.is_empty());
    }

    #[test]
    fn test_step_pauses_after_one() {
        let mut session = session(vec![Step::click("#a"), Step::click("#b")]);
        session.step().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.snapshot().position, Some(Position::flat(0)));

        session.step().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.step(), Err(UsageError::Completed.into()));
    }

    #[test]
    fn test_resume_requires_pause() {
        let mut session = session(vec![Step::click("#a")]);
        assert_eq!(session.resume(), Err(UsageError::NotPaused.into()));
        assert!(!session.pause());
    }

    #[test]
    fn test_stop_then_restart_is_fresh() {
        let mut session = session(vec![Step::click("#a"), Step::click("#b")]);
        session.step().unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().results.len(), 1);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.snapshot().results.len(), 2);
    }

    #[test]
    fn test_pending_stop_is_honored_before_resume() {
        let mut session = session(vec![Step::click("#a"), Step::click("#a")]);
        session.step().unwrap();
        let control = session.control();
        control.request_stop();
        assert!(control.has_pending_requests());

        assert_eq!(session.resume(), Err(UsageError::Stopped.into()));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().results.len(), 1);
        assert!(!control.has_pending_requests());

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn test_pending_dispose_is_honored_before_step() {
        let mut session = session(vec![Step::click("#a"), Step::click("#a")]);
        session.step().unwrap();
        session.control().request_dispose();

        assert_eq!(session.step(), Err(UsageError::Disposed.into()));
        assert_eq!(session.state(), SessionState::Disposed);
    }

    #[test]
    fn test_dispose_is_terminal() {
        let mut session = session(vec![Step::click("#a")]);
        session.dispose().unwrap();
        session.dispose().unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(session.start(), Err(UsageError::Disposed.into()));
        assert_eq!(session.resume(), Err(UsageError::Disposed.into()));
    }

    #[test]
    fn test_captures_use_returns_label() {
        let mut session = session(vec![Step::evaluate("42").returns("answer"), Step::click("#a")]);
        session.start().unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.captures.get("answer"), Some(&Value::from(42)));
    }
}
