//! UI Playback - step-by-step playback of scripted UI actions and assertions.
//!
//! This crate provides:
//! - A step model for declarative scripts (flat macros or suites of test cases)
//! - A stateless step executor that runs one action plus its optional assertion
//! - Playback sessions with start/step/pause/resume/stop and progress events
//! - A session registry for hosts driving several sessions
//! - Execution surfaces: an in-memory virtual surface and PTY-backed terminal apps
//!
//! # Example
//!
//! ```rust
//! use ui_playback::playback::SessionConfig;
//! use ui_playback::runner::run_document;
//! use ui_playback::script::{Document, Expect, Step};
//! use ui_playback::surface::{VirtualSurface, shared};
//!
//! let surface = shared(
//!     VirtualSurface::new()
//!         .element("#save", "Save")
//!         .reveal_on_click("#save", "#toast", "Saved"),
//! );
//! let document = Document::from_steps(vec![
//!     Step::click("#save"),
//!     Step::wait_for("#toast").expect(Expect::exists("#toast")),
//! ]);
//!
//! let report = run_document(document, surface, SessionConfig::default()).unwrap();
//! assert!(report.success);
//! ```

pub mod config;
pub mod executor;
pub mod playback;
pub mod runner;
pub mod script;
pub mod surface;

// Re-export executor entry points
pub use executor::{StepFailure, execute_action, execute_expect, execute_step};

// Re-export playback types
pub use playback::{
    FailureKind, PlaybackError, PlaybackEvent, PlaybackResult, PlaybackSession, SessionConfig,
    SessionControl, SessionRegistry, SessionSnapshot, SessionState, StepResult, StepSequence,
    Subscription, UsageError,
};

// Re-export runner types
pub use runner::{LoadError, RunReport, StepReport, load_document, run_document};

// Re-export the step model
pub use script::{Action, Document, Expect, Operator, Position, Step, TestCase};

// Re-export surfaces
pub use surface::{
    CaptureResult, SharedSurface, Surface, SurfaceError, SurfaceResult, TerminalSurface,
    TerminalSurfaceConfig, VirtualSurface, shared,
};
