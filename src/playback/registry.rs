//! Owner of every live session, addressed by id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::events::{PlaybackEvent, Subscription};
use super::session::{PlaybackSession, SessionControl};
use super::types::{PlaybackError, PlaybackResult, SessionConfig, SessionSnapshot, UsageError};
use crate::script::Document;
use crate::surface::SharedSurface;

/// A session plus the lock-free control used while it runs
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<PlaybackSession>>,
    control: SessionControl,
}

impl SessionHandle {
    fn new(session: PlaybackSession) -> Self {
        let control = session.control();
        Self {
            session: Arc::new(Mutex::new(session)),
            control,
        }
    }

    pub fn id(&self) -> &str {
        self.control.id()
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Run `f` with exclusive access, or return `None` while another
    /// command holds the session.
    ///
    /// Stop and dispose requests made while `f` runs are carried out once
    /// it returns.
    pub fn try_with<T>(&self, f: impl FnOnce(&mut PlaybackSession) -> T) -> Option<T> {
        let output = {
            let mut session = self.session.try_lock()?;
            f(&mut *session)
        };
        self.settle();
        Some(output)
    }

    /// Honor pending stop or dispose requests if nobody holds the session.
    ///
    /// A requester calls this after raising its flag and every holder calls
    /// it after unlocking, so whichever side sees the lock free last does
    /// the work.
    fn settle(&self) {
        while self.control.has_pending_requests() {
            let Some(mut session) = self.session.try_lock() else {
                break;
            };
            if let Err(err) = session.apply_requests() {
                tracing::warn!(session = %self.id(), error = %err, "pending request failed");
                break;
            }
        }
    }
}

/// Generate a unique, time-ordered session id
pub fn generate_session_id() -> String {
    format!("session_{}", Uuid::now_v7().simple())
}

/// Registry of playback sessions.
///
/// Commands on one session are serialized: a command that would run steps
/// while that session's run loop is in flight fails with
/// [`UsageError::Busy`] instead of waiting.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle session and return its id
    pub fn create(&self, document: Document, surface: SharedSurface, config: SessionConfig) -> String {
        let id = generate_session_id();
        let steps = document.step_count();
        let session = PlaybackSession::new(id.clone(), Arc::new(document), surface, config);
        self.sessions.lock().insert(id.clone(), SessionHandle::new(session));
        tracing::info!(session = %id, steps, "session created");
        id
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(id).cloned()
    }

    fn handle(&self, id: &str) -> PlaybackResult<SessionHandle> {
        self.get(id).ok_or_else(|| PlaybackError::NotFound(id.to_string()))
    }

    fn with_session<T>(
        &self,
        id: &str,
        command: impl FnOnce(&mut PlaybackSession) -> PlaybackResult<T>,
    ) -> PlaybackResult<T> {
        let handle = self.handle(id)?;
        handle.try_with(command).ok_or(UsageError::Busy)?
    }

    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        self.get(id).map(|h| h.control.snapshot())
    }

    pub fn subscribe(
        &self,
        id: &str,
        listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static,
    ) -> PlaybackResult<Subscription> {
        Ok(self.handle(id)?.control.subscribe(listener))
    }

    pub fn start(&self, id: &str) -> PlaybackResult<()> {
        self.with_session(id, PlaybackSession::start)
    }

    pub fn step(&self, id: &str) -> PlaybackResult<()> {
        self.with_session(id, PlaybackSession::step)
    }

    pub fn resume(&self, id: &str) -> PlaybackResult<()> {
        self.with_session(id, PlaybackSession::resume)
    }

    /// Request a pause at the next step boundary; a no-op unless running
    pub fn pause(&self, id: &str) -> PlaybackResult<()> {
        self.handle(id)?.control.pause();
        Ok(())
    }

    /// Stop now, or at the next step boundary if the session is mid-run
    pub fn stop(&self, id: &str) -> PlaybackResult<()> {
        let handle = self.handle(id)?;
        match handle.try_with(PlaybackSession::stop) {
            Some(result) => result,
            None => {
                tracing::debug!(session = %id, "stop requested while busy");
                handle.control.request_stop();
                handle.settle();
                Ok(())
            }
        }
    }

    /// Remove the session and dispose it
    pub fn remove(&self, id: &str) -> PlaybackResult<()> {
        let handle = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| PlaybackError::NotFound(id.to_string()))?;
        match handle.try_with(PlaybackSession::dispose) {
            Some(result) => result?,
            None => {
                handle.control.request_dispose();
                handle.settle();
            }
        }
        tracing::info!(session = %id, "session removed");
        Ok(())
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Remove and dispose every session
    pub fn dispose_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            match handle.try_with(PlaybackSession::dispose) {
                Some(Err(err)) => tracing::warn!(session = %handle.id(), error = %err, "dispose failed"),
                Some(Ok(())) => {}
                None => {
                    handle.control.request_dispose();
                    handle.settle();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::SessionState;
    use crate::script::Step;
    use crate::surface::{VirtualSurface, shared};

    fn registry_with_session() -> (SessionRegistry, String) {
        let registry = SessionRegistry::new();
        let id = registry.create(
            Document::from_steps(vec![Step::click("#a"), Step::click("#a")]),
            shared(VirtualSurface::new().element("#a", "A")),
            SessionConfig::default().timeout_ms(200),
        );
        (registry, id)
    }

    #[test]
    fn test_session_ids_are_unique_and_prefixed() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("session_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.start("nope"), Err(PlaybackError::NotFound("nope".to_string())));
        assert!(registry.snapshot("nope").is_none());
        assert!(registry.subscribe("nope", |_| {}).is_err());
    }

    #[test]
    fn test_commands_route_to_session() {
        let (registry, id) = registry_with_session();
        registry.step(&id).unwrap();
        assert_eq!(registry.snapshot(&id).unwrap().state, SessionState::Paused);
        registry.resume(&id).unwrap();
        assert_eq!(registry.snapshot(&id).unwrap().state, SessionState::Completed);
    }

    #[test]
    fn test_busy_while_locked() {
        let (registry, id) = registry_with_session();
        let handle = registry.get(&id).unwrap();
        handle
            .try_with(|_| {
                assert_eq!(registry.start(&id), Err(UsageError::Busy.into()));
                assert!(handle.try_with(|_| ()).is_none());

                // Stop is recorded instead of rejected
                assert_eq!(registry.stop(&id), Ok(()));
            })
            .unwrap();
    }

    #[test]
    fn test_stop_while_held_lands_on_release() {
        let (registry, id) = registry_with_session();
        registry.step(&id).unwrap();
        let handle = registry.get(&id).unwrap();

        handle
            .try_with(|_| {
                assert_eq!(registry.stop(&id), Ok(()));
                assert_eq!(handle.control().state(), SessionState::Paused);
            })
            .unwrap();

        let snapshot = registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.results.len(), 1);
        assert!(!handle.control().has_pending_requests());
        assert_eq!(registry.resume(&id), Err(UsageError::NotPaused.into()));
    }

    #[test]
    fn test_remove_while_held_disposes_on_release() {
        let (registry, id) = registry_with_session();
        registry.step(&id).unwrap();
        let handle = registry.get(&id).unwrap();

        handle
            .try_with(|_| {
                registry.remove(&id).unwrap();
                assert!(registry.is_empty());
                assert_eq!(handle.control().state(), SessionState::Paused);
            })
            .unwrap();

        assert_eq!(handle.control().state(), SessionState::Disposed);
    }

    #[test]
    fn test_remove_disposes() {
        let (registry, id) = registry_with_session();
        let handle = registry.get(&id).unwrap();
        registry.remove(&id).unwrap();
        assert!(registry.is_empty());
        assert_eq!(handle.control().state(), SessionState::Disposed);
        assert_eq!(registry.remove(&id), Err(PlaybackError::NotFound(id)));
    }
}
