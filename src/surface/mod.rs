//! Execution surfaces: the live UI a session drives.
//!
//! The playback engine never resolves selectors itself. It sequences calls
//! to a [`Surface`], which is the injected execution capability:
//! - [`VirtualSurface`] for tests, demos and dry runs
//! - [`TerminalSurface`] for terminal applications running inside a PTY

pub mod framebuffer;
pub mod terminal;
pub mod virtual_surface;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

pub use framebuffer::Framebuffer;
pub use terminal::{TerminalScreen, TerminalSurface, TerminalSurfaceConfig, key_to_sequence};
pub use virtual_surface::{Interaction, VirtualElement, VirtualFixture, VirtualSurface};

/// Result type for surface operations
pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Errors a surface reports back to the step executor
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("selector not found: {0}")]
    NotFound(String),
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("unsupported on this surface: {0}")]
    Unsupported(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A surface shared between a session and whoever built it.
///
/// The mutex gives the step in flight exclusive use of the surface.
pub type SharedSurface = Arc<Mutex<dyn Surface>>;

/// Wrap a concrete surface for use by a session
pub fn shared<S: Surface + 'static>(surface: S) -> SharedSurface {
    Arc::new(Mutex::new(surface))
}

/// Result of a screenshot
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// PNG-encoded image data
    pub image_data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl CaptureResult {
    /// JSON form stored as a screenshot step's captured value
    pub fn to_value(&self, name: Option<&str>) -> Value {
        serde_json::json!({
            "name": name,
            "width": self.width,
            "height": self.height,
            "pngBase64": base64::engine::general_purpose::STANDARD.encode(&self.image_data),
        })
    }
}

/// The execution capability a session drives.
///
/// Action methods receive the step's effective timeout and should give up
/// with [`SurfaceError::Timeout`] once it elapses. `exists` must be cheap
/// because wait steps poll it.
pub trait Surface: Send {
    /// Source type identifier (e.g. "virtual", "terminal")
    fn source_type(&self) -> &str;

    fn click(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()>;

    fn hover(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Type into `selector`, or wherever input currently goes when `None`
    fn type_text(
        &mut self,
        selector: Option<&str>,
        text: &str,
        clear: bool,
        timeout: Duration,
    ) -> SurfaceResult<()>;

    fn press_key(&mut self, key: &str, timeout: Duration) -> SurfaceResult<()>;

    /// Evaluate surface-specific code and return its value
    fn evaluate(&mut self, code: &str, timeout: Duration) -> SurfaceResult<Value>;

    fn exists(&mut self, selector: &str) -> SurfaceResult<bool>;

    /// Current value (usually text) of the element matching `selector`
    fn read_value(&mut self, selector: &str) -> SurfaceResult<Value>;

    fn screenshot(&mut self) -> SurfaceResult<CaptureResult>;
}
