//! In-memory surface for tests, demos and dry runs.
//!
//! Elements are keyed by selector and carry text. The surface records
//! every interaction, can reveal elements on click, can delay an element
//! until it has been polled a number of times, and can simulate per-action
//! latency to exercise timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::framebuffer::{Framebuffer, GLYPH_SIZE};
use super::{CaptureResult, Surface, SurfaceError, SurfaceResult};

const SCREEN_WIDTH: u32 = 640;
const ROW_HEIGHT: u32 = 20;
const BACKGROUND: [u8; 3] = [30, 30, 36];
const TITLE_BAR: [u8; 3] = [60, 60, 90];
const FOCUS: [u8; 3] = [70, 110, 70];
const TEXT: [u8; 3] = [230, 230, 230];

/// Script handler for `evaluate` steps
pub type ScriptHandler = Arc<dyn Fn(&VirtualSurface) -> Result<Value, String> + Send + Sync>;

/// One element of the virtual UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualElement {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Number of `exists` polls before the element shows up
    #[serde(default)]
    pub appears_after: u32,
}

fn default_visible() -> bool {
    true
}

impl VirtualElement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            visible: true,
            appears_after: 0,
        }
    }
}

/// Record of what a step did to the surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Click(String),
    Hover(String),
    Type { selector: Option<String>, text: String },
    Key(String),
    Evaluate(String),
    Screenshot,
}

/// Serializable description of a virtual surface, used by the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualFixture {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub elements: Vec<(String, VirtualElement)>,
    /// `trigger selector -> [(revealed selector, text)]`
    #[serde(default)]
    pub reveals: HashMap<String, Vec<(String, String)>>,
    /// Fixed results for `evaluate` steps, keyed by code
    #[serde(default)]
    pub scripts: HashMap<String, Value>,
}

pub struct VirtualSurface {
    title: String,
    elements: Vec<(String, VirtualElement)>,
    focused: Option<String>,
    hovered: Option<String>,
    reveals: HashMap<String, Vec<(String, String)>>,
    scripts: HashMap<String, ScriptHandler>,
    polls: HashMap<String, u32>,
    latency: Duration,
    log: Vec<Interaction>,
}

impl std::fmt::Debug for VirtualSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSurface")
            .field("title", &self.title)
            .field("elements", &self.elements)
            .field("focused", &self.focused)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Default for VirtualSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSurface {
    pub fn new() -> Self {
        Self {
            title: String::new(),
            elements: Vec::new(),
            focused: None,
            hovered: None,
            reveals: HashMap::new(),
            scripts: HashMap::new(),
            polls: HashMap::new(),
            latency: Duration::ZERO,
            log: Vec::new(),
        }
    }

    /// Build a surface from a fixture
    pub fn from_fixture(fixture: VirtualFixture) -> Self {
        let mut surface = Self::new().title(fixture.title);
        for (selector, element) in fixture.elements {
            surface.insert(selector, element);
        }
        surface.reveals = fixture.reveals;
        for (code, value) in fixture.scripts {
            surface = surface.script(code, move |_| Ok(value.clone()));
        }
        surface
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add a visible element
    #[must_use]
    pub fn element(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(selector.into(), VirtualElement::new(text));
        self
    }

    /// Add an element that only appears after `polls` existence checks
    #[must_use]
    pub fn delayed_element(
        mut self,
        selector: impl Into<String>,
        text: impl Into<String>,
        polls: u32,
    ) -> Self {
        let mut element = VirtualElement::new(text);
        element.appears_after = polls;
        self.insert(selector.into(), element);
        self
    }

    /// Clicking `trigger` makes `selector` visible with `text`
    #[must_use]
    pub fn reveal_on_click(
        mut self,
        trigger: impl Into<String>,
        selector: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.reveals
            .entry(trigger.into())
            .or_default()
            .push((selector.into(), text.into()));
        self
    }

    /// Register a handler for `evaluate` steps with exactly this code
    #[must_use]
    pub fn script(
        mut self,
        code: impl Into<String>,
        handler: impl Fn(&VirtualSurface) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.scripts.insert(code.into(), Arc::new(handler));
        self
    }

    /// Simulated time every action takes
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&mut self, selector: impl Into<String>, element: VirtualElement) {
        let selector = selector.into();
        match self.elements.iter_mut().find(|(s, _)| *s == selector) {
            Some((_, existing)) => *existing = element,
            None => self.elements.push((selector, element)),
        }
    }

    pub fn remove(&mut self, selector: &str) {
        self.elements.retain(|(s, _)| s != selector);
    }

    /// Text of a visible element
    pub fn text(&self, selector: &str) -> Option<&str> {
        self.visible(selector).map(|e| e.text.as_str())
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn hovered(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.log
    }

    fn visible(&self, selector: &str) -> Option<&VirtualElement> {
        self.elements
            .iter()
            .find(|(s, e)| s == selector && e.visible)
            .map(|(_, e)| e)
    }

    fn visible_mut(&mut self, selector: &str) -> SurfaceResult<&mut VirtualElement> {
        self.elements
            .iter_mut()
            .find(|(s, e)| s == selector && e.visible)
            .map(|(_, e)| e)
            .ok_or_else(|| SurfaceError::NotFound(selector.to_string()))
    }

    /// Sleep for the simulated latency, bounded by the step's timeout
    fn simulate_latency(&self, timeout: Duration) -> SurfaceResult<()> {
        if self.latency.is_zero() {
            return Ok(());
        }
        if self.latency > timeout {
            thread::sleep(timeout);
            return Err(SurfaceError::Timeout(timeout));
        }
        thread::sleep(self.latency);
        Ok(())
    }
}

impl Surface for VirtualSurface {
    fn source_type(&self) -> &str {
        "virtual"
    }

    fn click(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        self.simulate_latency(timeout)?;
        self.visible_mut(selector)?;
        self.focused = Some(selector.to_string());
        self.log.push(Interaction::Click(selector.to_string()));

        if let Some(revealed) = self.reveals.get(selector).cloned() {
            for (target, text) in revealed {
                self.insert(target, VirtualElement::new(text));
            }
        }
        Ok(())
    }

    fn hover(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        self.simulate_latency(timeout)?;
        self.visible_mut(selector)?;
        self.hovered = Some(selector.to_string());
        self.log.push(Interaction::Hover(selector.to_string()));
        Ok(())
    }

    fn type_text(
        &mut self,
        selector: Option<&str>,
        text: &str,
        clear: bool,
        timeout: Duration,
    ) -> SurfaceResult<()> {
        self.simulate_latency(timeout)?;
        let target = match selector {
            Some(sel) => sel.to_string(),
            None => self
                .focused
                .clone()
                .ok_or_else(|| SurfaceError::Script("no focused element to type into".to_string()))?,
        };

        let element = self.visible_mut(&target)?;
        if clear {
            element.text.clear();
        }
        element.text.push_str(text);

        self.focused = Some(target);
        self.log.push(Interaction::Type {
            selector: selector.map(str::to_string),
            text: text.to_string(),
        });
        Ok(())
    }

    fn press_key(&mut self, key: &str, timeout: Duration) -> SurfaceResult<()> {
        self.simulate_latency(timeout)?;
        if key.eq_ignore_ascii_case("backspace") {
            if let Some(focused) = self.focused.clone() {
                self.visible_mut(&focused)?.text.pop();
            }
        }
        self.log.push(Interaction::Key(key.to_string()));
        Ok(())
    }

    fn evaluate(&mut self, code: &str, timeout: Duration) -> SurfaceResult<Value> {
        self.simulate_latency(timeout)?;
        self.log.push(Interaction::Evaluate(code.to_string()));

        if let Some(handler) = self.scripts.get(code).cloned() {
            return handler(self).map_err(SurfaceError::Script);
        }
        match code.trim() {
            "title" => Ok(Value::String(self.title.clone())),
            "count" => Ok(Value::from(self.elements.iter().filter(|(_, e)| e.visible).count())),
            literal => serde_json::from_str(literal)
                .map_err(|_| SurfaceError::Script(format!("no script registered for '{}'", literal))),
        }
    }

    fn exists(&mut self, selector: &str) -> SurfaceResult<bool> {
        let polls = self.polls.entry(selector.to_string()).or_insert(0);
        *polls += 1;
        let polls = *polls;
        Ok(self
            .visible(selector)
            .is_some_and(|e| polls > e.appears_after))
    }

    fn read_value(&mut self, selector: &str) -> SurfaceResult<Value> {
        self.text(selector)
            .map(|t| Value::String(t.to_string()))
            .ok_or_else(|| SurfaceError::NotFound(selector.to_string()))
    }

    fn screenshot(&mut self) -> SurfaceResult<CaptureResult> {
        self.log.push(Interaction::Screenshot);

        let rows: Vec<&(String, VirtualElement)> =
            self.elements.iter().filter(|(_, e)| e.visible).collect();
        let height = ROW_HEIGHT * (rows.len() as u32 + 1);
        let mut fb = Framebuffer::with_color(SCREEN_WIDTH, height, BACKGROUND);
        let pad = (ROW_HEIGHT - GLYPH_SIZE) / 2;

        fb.draw_rect(0, 0, SCREEN_WIDTH, ROW_HEIGHT, TITLE_BAR);
        fb.draw_text(pad, pad, &self.title, TEXT, TITLE_BAR);

        for (i, (selector, element)) in rows.iter().enumerate() {
            let y = ROW_HEIGHT * (i as u32 + 1);
            let bg = if self.focused.as_deref() == Some(selector.as_str()) {
                FOCUS
            } else {
                BACKGROUND
            };
            fb.draw_rect(0, y, SCREEN_WIDTH, ROW_HEIGHT, bg);
            fb.draw_text(pad, y + pad, &format!("{}: {}", selector, element.text), TEXT, bg);
        }

        fb.capture()
    }
}
