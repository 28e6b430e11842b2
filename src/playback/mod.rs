//! The playback engine: sessions, their step sequences, events and registry.
//!
//! # Example
//!
//! ```rust
//! use ui_playback::playback::{PlaybackEvent, SessionConfig, SessionRegistry, SessionState};
//! use ui_playback::script::{Document, Step};
//! use ui_playback::surface::{VirtualSurface, shared};
//!
//! let registry = SessionRegistry::new();
//! let surface = shared(VirtualSurface::new().element("#save", "Save"));
//! let id = registry.create(
//!     Document::from_steps(vec![Step::click("#save")]),
//!     surface,
//!     SessionConfig::default(),
//! );
//!
//! registry
//!     .subscribe(&id, |event: &PlaybackEvent| println!("{}", event.kind()))
//!     .unwrap();
//! registry.start(&id).unwrap();
//! assert_eq!(registry.snapshot(&id).unwrap().state, SessionState::Completed);
//! ```

pub mod events;
pub mod registry;
pub mod sequence;
pub mod session;
pub mod types;

pub use events::{EventEmitter, Listener, PlaybackEvent, Subscription};
pub use registry::{SessionHandle, SessionRegistry, generate_session_id};
pub use sequence::{StepSequence, StepStartCallback, StepYield};
pub use session::{PlaybackSession, SessionControl};
pub use types::{
    FailureKind, PlaybackError, PlaybackResult, SessionConfig, SessionSnapshot, SessionState,
    StepResult, UsageError,
};
