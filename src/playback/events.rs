//! Progress events and the synchronous emitter that delivers them.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::types::{SessionState, StepResult};
use crate::script::{Position, Step};

/// Everything a session reports to its observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlaybackEvent {
    #[serde(rename_all = "camelCase")]
    SessionState {
        session_id: String,
        state: SessionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepStart {
        session_id: String,
        position: Position,
        step: Step,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepComplete {
        session_id: String,
        position: Position,
        result: StepResult,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    PlaybackComplete {
        session_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    /// Wire name of the event
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackEvent::SessionState { .. } => "session-state",
            PlaybackEvent::StepStart { .. } => "step-start",
            PlaybackEvent::StepComplete { .. } => "step-complete",
            PlaybackEvent::PlaybackComplete { .. } => "playback-complete",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            PlaybackEvent::SessionState { session_id, .. }
            | PlaybackEvent::StepStart { session_id, .. }
            | PlaybackEvent::StepComplete { session_id, .. }
            | PlaybackEvent::PlaybackComplete { session_id, .. } => session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PlaybackEvent::SessionState { timestamp, .. }
            | PlaybackEvent::StepStart { timestamp, .. }
            | PlaybackEvent::StepComplete { timestamp, .. }
            | PlaybackEvent::PlaybackComplete { timestamp, .. } => *timestamp,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            PlaybackEvent::SessionState { position, .. } => *position,
            PlaybackEvent::StepStart { position, .. } | PlaybackEvent::StepComplete { position, .. } => {
                Some(*position)
            }
            PlaybackEvent::PlaybackComplete { .. } => None,
        }
    }
}

/// A registered observer
pub type Listener = Arc<dyn Fn(&PlaybackEvent) + Send + Sync>;

/// Synchronous, ordered broadcast to any number of listeners.
///
/// Delivery iterates over a copy of the listener list, so a listener may
/// subscribe or unsubscribe from inside its callback. A panicking listener
/// is not caught.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: Mutex<u64>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventEmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener; it receives events until unsubscribed or cleared
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            emitter: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call
    pub fn emit(&self, event: &PlaybackEvent) {
        let snapshot: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

/// Handle returned by [`EventEmitter::subscribe`]
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    emitter: Weak<EventEmitter>,
}

impl Subscription {
    /// Stop receiving events. Returns false if the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        self.emitter.upgrade().is_some_and(|emitter| emitter.remove(self.id))
    }
}
