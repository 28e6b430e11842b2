//! Terminal applications as an execution surface.
//!
//! The application runs inside a pseudo-terminal. Its output is parsed with
//! `vte` into a character grid, and a selector is simply text that must
//! appear on that grid. Clicks and hovers are delivered as xterm SGR mouse
//! reports at the cell where the text starts.

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use vte::{Params, Parser as AnsiParser, Perform};

use super::framebuffer::{Framebuffer, GLYPH_SIZE};
use super::{CaptureResult, Surface, SurfaceError, SurfaceResult};
use crate::config;

const CELL_SCALE: u32 = 2;
const MAX_STARTUP_WAIT: Duration = Duration::from_secs(3);
const SCREEN_FG: [u8; 3] = [229, 229, 229];
const SCREEN_BG: [u8; 3] = [0, 0, 0];

/// Character grid maintained from the application's output
#[derive(Debug, Clone)]
pub struct TerminalScreen {
    width: usize,
    height: usize,
    rows: Vec<Vec<char>>,
    cursor: (usize, usize),
    saved_cursor: Option<(usize, usize)>,
}

impl TerminalScreen {
    pub fn new(width: u16, height: u16) -> Self {
        let (width, height) = (usize::from(width.max(1)), usize::from(height.max(1)));
        Self {
            width,
            height,
            rows: vec![vec![' '; width]; height],
            cursor: (0, 0),
            saved_cursor: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    /// Row `index` with trailing blanks trimmed
    pub fn line(&self, index: usize) -> Option<String> {
        self.rows
            .get(index)
            .map(|row| row.iter().collect::<String>().trim_end().to_string())
    }

    /// Whole screen, one line per row, trailing blank lines dropped
    pub fn text(&self) -> String {
        let lines: Vec<String> = (0..self.height).filter_map(|i| self.line(i)).collect();
        let used = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
        lines[..used].join("\n")
    }

    /// Cell (column, row) where `needle` first appears
    pub fn find(&self, needle: &str) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        (0..self.height).find_map(|row| {
            let line: String = self.rows[row].iter().collect();
            line.find(needle)
                .map(|byte_idx| (line[..byte_idx].chars().count(), row))
        })
    }

    fn print(&mut self, ch: char) {
        if self.cursor.0 >= self.width {
            self.cursor.0 = 0;
            self.line_feed();
        }
        let (col, row) = self.cursor;
        self.rows[row][col] = ch;
        self.cursor.0 += 1;
    }

    fn line_feed(&mut self) {
        if self.cursor.1 + 1 >= self.height {
            self.rows.remove(0);
            self.rows.push(vec![' '; self.width]);
        } else {
            self.cursor.1 += 1;
        }
    }

    fn move_to(&mut self, col: usize, row: usize) {
        self.cursor = (col.min(self.width - 1), row.min(self.height - 1));
    }

    fn move_by(&mut self, dx: isize, dy: isize) {
        let col = self.cursor.0.saturating_add_signed(dx);
        let row = self.cursor.1.saturating_add_signed(dy);
        self.move_to(col, row);
    }

    fn blank(&mut self, row: usize, from: usize, to: usize) {
        if let Some(cells) = self.rows.get_mut(row) {
            let to = to.min(cells.len());
            for cell in cells.iter_mut().take(to).skip(from) {
                *cell = ' ';
            }
        }
    }

    fn erase_display(&mut self, mode: u16) {
        let (col, row) = self.cursor;
        match mode {
            0 => {
                self.blank(row, col, self.width);
                for r in row + 1..self.height {
                    self.blank(r, 0, self.width);
                }
            }
            1 => {
                for r in 0..row {
                    self.blank(r, 0, self.width);
                }
                self.blank(row, 0, col + 1);
            }
            _ => {
                for r in 0..self.height {
                    self.blank(r, 0, self.width);
                }
            }
        }
    }

    fn erase_line(&mut self, mode: u16) {
        let (col, row) = self.cursor;
        match mode {
            0 => self.blank(row, col, self.width),
            1 => self.blank(row, 0, col + 1),
            _ => self.blank(row, 0, self.width),
        }
    }

    fn reset(&mut self) {
        self.erase_display(2);
        self.cursor = (0, 0);
        self.saved_cursor = None;
    }

    /// Render the grid for a screenshot
    pub fn render(&self) -> Framebuffer {
        let cell = GLYPH_SIZE * CELL_SCALE;
        let mut fb = Framebuffer::with_color(self.width as u32 * cell, self.height as u32 * cell, SCREEN_BG);
        for row in 0..self.height {
            let line: String = self.rows[row].iter().collect();
            fb.draw_text_scaled(0, row as u32 * cell, &line, SCREEN_FG, SCREEN_BG, CELL_SCALE);
        }
        fb
    }
}

struct ScreenPerformer<'a> {
    screen: &'a mut TerminalScreen,
}

fn param(params: &Params, index: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first())
        .copied()
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

impl Perform for ScreenPerformer<'_> {
    fn print(&mut self, c: char) {
        self.screen.print(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | 0x0b | 0x0c => self.screen.line_feed(),
            b'\r' => self.screen.cursor.0 = 0,
            b'\t' => {
                let next = (self.screen.cursor.0 / 8 + 1) * 8;
                self.screen.cursor.0 = next.min(self.screen.width - 1);
            }
            0x08 => self.screen.cursor.0 = self.screen.cursor.0.saturating_sub(1),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        let private = intermediates.contains(&b'?');
        let n = isize::from(param(params, 0, 1) as i16);
        match action {
            'H' | 'f' => {
                let row = usize::from(param(params, 0, 1)) - 1;
                let col = usize::from(param(params, 1, 1)) - 1;
                self.screen.move_to(col, row);
            }
            'A' => self.screen.move_by(0, -n),
            'B' => self.screen.move_by(0, n),
            'C' => self.screen.move_by(n, 0),
            'D' => self.screen.move_by(-n, 0),
            'G' => {
                let col = usize::from(param(params, 0, 1)) - 1;
                self.screen.move_to(col, self.screen.cursor.1);
            }
            'd' => {
                let row = usize::from(param(params, 0, 1)) - 1;
                self.screen.move_to(self.screen.cursor.0, row);
            }
            'J' => self.screen.erase_display(param(params, 0, 0)),
            'K' => self.screen.erase_line(param(params, 0, 0)),
            's' => self.screen.saved_cursor = Some(self.screen.cursor),
            'u' => {
                if let Some((col, row)) = self.screen.saved_cursor {
                    self.screen.move_to(col, row);
                }
            }
            // Alternate screen: the grid only models what is visible now
            'h' | 'l' if private && matches!(param(params, 0, 0), 47 | 1047 | 1049) => {
                self.screen.reset();
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'7' => self.screen.saved_cursor = Some(self.screen.cursor),
            b'8' => {
                if let Some((col, row)) = self.screen.saved_cursor {
                    self.screen.move_to(col, row);
                }
            }
            b'c' => self.screen.reset(),
            _ => {}
        }
    }
}

/// Feeds raw PTY output into a [`TerminalScreen`]
pub struct ScreenParser {
    screen: TerminalScreen,
    parser: AnsiParser,
}

impl ScreenParser {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            screen: TerminalScreen::new(width, height),
            parser: AnsiParser::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        let mut performer = ScreenPerformer {
            screen: &mut self.screen,
        };
        for &byte in bytes {
            self.parser.advance(&mut performer, byte);
        }
    }

    pub fn screen(&self) -> &TerminalScreen {
        &self.screen
    }
}

/// Configuration for a PTY-backed terminal surface
#[derive(Debug, Clone)]
pub struct TerminalSurfaceConfig {
    /// Program to launch
    pub binary_path: PathBuf,
    /// Arguments to pass to the program
    pub args: Vec<String>,
    /// Terminal width in columns
    pub width: u16,
    /// Terminal height in rows
    pub height: u16,
    /// Output must stay quiet this long before an action counts as settled
    pub settle: Duration,
}

impl TerminalSurfaceConfig {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        let settings = &config::get().terminal;
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            width: settings.width,
            height: settings.height,
            settle: Duration::from_millis(settings.settle_window),
        }
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn size(mut self, width: u16, height: u16) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// A live terminal application driven through a PTY
pub struct TerminalSurface {
    config: TerminalSurfaceConfig,
    parser: ScreenParser,
    rx: Receiver<Vec<u8>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    // Dropping the master closes the PTY, so it lives as long as the surface
    _master: Box<dyn MasterPty + Send>,
}

impl TerminalSurface {
    /// Launch the program and wait for its first screen to settle
    pub fn spawn(config: TerminalSurfaceConfig) -> SurfaceResult<Self> {
        let size = PtySize {
            rows: config.height,
            cols: config.width,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| SurfaceError::Capture(format!("Failed to open PTY: {}", e)))?;

        let program = config.binary_path.to_string_lossy().to_string();
        let mut cmd = CommandBuilder::new(&program);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLUMNS", config.width.to_string());
        cmd.env("LINES", config.height.to_string());
        for arg in &config.args {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SurfaceError::Capture(format!("Failed to spawn '{}': {}", program, e)))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SurfaceError::Capture(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SurfaceError::Capture(format!("Failed to take PTY writer: {}", e)))?;

        tracing::debug!(program = %program, cols = config.width, rows = config.height, "terminal surface spawned");

        let mut surface = Self {
            parser: ScreenParser::new(config.width, config.height),
            rx: spawn_reader(reader),
            writer,
            child,
            _master: pair.master,
            config,
        };
        surface.settle(MAX_STARTUP_WAIT);
        Ok(surface)
    }

    pub fn screen(&self) -> &TerminalScreen {
        self.parser.screen()
    }

    fn send(&mut self, bytes: &[u8], timeout: Duration) -> SurfaceResult<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        self.settle(timeout);
        Ok(())
    }

    /// Consume output until it has been quiet for the settle window, or `max_wait` passes
    fn settle(&mut self, max_wait: Duration) {
        let start = Instant::now();
        let mut last_activity = Instant::now();
        while start.elapsed() < max_wait {
            match self.rx.recv_timeout(Duration::from_millis(20)) {
                Ok(chunk) => {
                    self.parser.feed(&chunk);
                    last_activity = Instant::now();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() >= self.config.settle {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.drain();
    }

    /// Consume whatever output is already buffered
    fn drain(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.parser.feed(&chunk);
        }
    }

    fn locate(&mut self, selector: &str) -> SurfaceResult<(usize, usize)> {
        self.drain();
        self.screen()
            .find(selector)
            .ok_or_else(|| SurfaceError::NotFound(selector.to_string()))
    }

    fn mouse(&mut self, selector: &str, buttons: &[u8], timeout: Duration) -> SurfaceResult<()> {
        let (col, row) = self.locate(selector)?;
        let mut report = Vec::new();
        for &button in buttons {
            let release = if button == 0 && !report.is_empty() { 'm' } else { 'M' };
            report.extend(format!("\x1b[<{};{};{}{}", button, col + 1, row + 1, release).into_bytes());
        }
        self.send(&report, timeout)
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        if self.child.try_wait().ok().flatten().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl Surface for TerminalSurface {
    fn source_type(&self) -> &str {
        "terminal"
    }

    fn click(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        // Press then release of the left button
        self.mouse(selector, &[0, 0], timeout)
    }

    fn hover(&mut self, selector: &str, timeout: Duration) -> SurfaceResult<()> {
        // 35 = motion with no button held
        self.mouse(selector, &[35], timeout)
    }

    fn type_text(
        &mut self,
        selector: Option<&str>,
        text: &str,
        clear: bool,
        timeout: Duration,
    ) -> SurfaceResult<()> {
        if let Some(selector) = selector {
            self.locate(selector)?;
        }
        let mut bytes = Vec::with_capacity(text.len() + 1);
        if clear {
            // ctrl+u: kill the line typed so far
            bytes.push(0x15);
        }
        bytes.extend_from_slice(text.as_bytes());
        self.send(&bytes, timeout)
    }

    fn press_key(&mut self, key: &str, timeout: Duration) -> SurfaceResult<()> {
        let sequence = key_to_sequence(key);
        self.send(&sequence, timeout)
    }

    fn evaluate(&mut self, code: &str, _timeout: Duration) -> SurfaceResult<Value> {
        self.drain();
        let code = code.trim();
        match code {
            "screen" => Ok(Value::String(self.screen().text())),
            "cursor" => {
                let (col, row) = self.screen().cursor();
                Ok(serde_json::json!({ "col": col, "row": row }))
            }
            _ => {
                if let Some(index) = code.strip_prefix("line:") {
                    let index: usize = index
                        .trim()
                        .parse()
                        .map_err(|_| SurfaceError::Script(format!("bad line index in '{}'", code)))?;
                    return self
                        .screen()
                        .line(index)
                        .map(Value::String)
                        .ok_or_else(|| SurfaceError::Script(format!("no line {}", index)));
                }
                Err(SurfaceError::Unsupported(format!(
                    "evaluate '{}' (terminal surfaces understand screen, cursor and line:N)",
                    code
                )))
            }
        }
    }

    fn exists(&mut self, selector: &str) -> SurfaceResult<bool> {
        self.drain();
        Ok(self.screen().find(selector).is_some())
    }

    fn read_value(&mut self, selector: &str) -> SurfaceResult<Value> {
        let (_, row) = self.locate(selector)?;
        let line = self.screen().line(row).unwrap_or_default();
        Ok(Value::String(line.trim().to_string()))
    }

    fn screenshot(&mut self) -> SurfaceResult<CaptureResult> {
        self.drain();
        self.screen().render().capture()
    }
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(size) => {
                    if tx.send(buffer[..size].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => match err.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(10)),
                    _ => break,
                },
            }
        }
    });
    rx
}

/// Translate a key name or chord into the bytes a terminal would send.
///
/// Understands arrows, navigation and function keys, `ctrl+<letter>`,
/// `alt+<key>`, and falls back to the literal text.
pub fn key_to_sequence(key: &str) -> Vec<u8> {
    let lower = key.trim().to_lowercase();

    if let Some(rest) = lower.strip_prefix("ctrl+").or_else(|| lower.strip_prefix("ctrl-")) {
        let mut chars = rest.chars();
        return match (chars.next(), chars.next()) {
            (Some(ch), None) if ch.is_ascii_lowercase() => vec![ch as u8 - b'a' + 1],
            _ if rest == "space" => vec![0x00],
            _ => key.as_bytes().to_vec(),
        };
    }
    if let Some(rest) = lower.strip_prefix("alt+").or_else(|| lower.strip_prefix("alt-")) {
        let mut out = vec![0x1b];
        out.extend(key_to_sequence(rest));
        return out;
    }

    match lower.as_str() {
        "up" => b"\x1b[A".to_vec(),
        "down" => b"\x1b[B".to_vec(),
        "right" => b"\x1b[C".to_vec(),
        "left" => b"\x1b[D".to_vec(),
        "home" => b"\x1b[H".to_vec(),
        "end" => b"\x1b[F".to_vec(),
        "pageup" | "pgup" => b"\x1b[5~".to_vec(),
        "pagedown" | "pgdn" => b"\x1b[6~".to_vec(),
        "insert" => b"\x1b[2~".to_vec(),
        "delete" | "del" => b"\x1b[3~".to_vec(),
        "enter" | "return" => vec![b'\r'],
        "space" => vec![b' '],
        "tab" => vec![b'\t'],
        "backspace" => vec![0x7f],
        "escape" | "esc" => vec![0x1b],
        "f1" => b"\x1bOP".to_vec(),
        "f2" => b"\x1bOQ".to_vec(),
        "f3" => b"\x1bOR".to_vec(),
        "f4" => b"\x1bOS".to_vec(),
        f if f.len() <= 3 && f.starts_with('f') => match &f[1..] {
            "5" => b"\x1b[15~".to_vec(),
            "6" => b"\x1b[17~".to_vec(),
            "7" => b"\x1b[18~".to_vec(),
            "8" => b"\x1b[19~".to_vec(),
            "9" => b"\x1b[20~".to_vec(),
            "10" => b"\x1b[21~".to_vec(),
            "11" => b"\x1b[23~".to_vec(),
            "12" => b"\x1b[24~".to_vec(),
            _ => key.as_bytes().to_vec(),
        },
        _ => key.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(width: u16, height: u16, bytes: &[u8]) -> TerminalScreen {
        let mut parser = ScreenParser::new(width, height);
        parser.feed(bytes);
        parser.screen().clone()
    }

    #[test]
    fn test_plain_text_and_newlines() {
        let screen = parse(20, 4, b"hello\r\nworld");
        assert_eq!(screen.line(0).as_deref(), Some("hello"));
        assert_eq!(screen.line(1).as_deref(), Some("world"));
        assert_eq!(screen.text(), "hello\nworld");
    }

    #[test]
    fn test_cursor_addressing_and_find() {
        let screen = parse(20, 5, b"\x1b[3;5HOK\x1b[1;1H[ Save ]");
        assert_eq!(screen.find("OK"), Some((4, 2)));
        assert_eq!(screen.find("Save"), Some((2, 0)));
        assert_eq!(screen.find("missing"), None);
    }

    #[test]
    fn test_erase_and_colors_are_ignored() {
        let screen = parse(20, 3, b"\x1b[31mred\x1b[0m text\r\x1b[K\x1b[2Jdone");
        assert_eq!(screen.text().trim(), "done");
    }

    #[test]
    fn test_scrolls_at_bottom() {
        let screen = parse(10, 2, b"a\r\nb\r\nc");
        assert_eq!(screen.line(0).as_deref(), Some("b"));
        assert_eq!(screen.line(1).as_deref(), Some("c"));
    }

    #[test]
    fn test_render_size() {
        let screen = TerminalScreen::new(4, 2);
        let fb = screen.render();
        assert_eq!(fb.width(), 4 * GLYPH_SIZE * CELL_SCALE);
        assert_eq!(fb.height(), 2 * GLYPH_SIZE * CELL_SCALE);
    }

    #[test]
    fn test_key_sequences() {
        assert_eq!(key_to_sequence("Enter"), vec![b'\r']);
        assert_eq!(key_to_sequence("up"), b"\x1b[A".to_vec());
        assert_eq!(key_to_sequence("ctrl+c"), vec![0x03]);
        assert_eq!(key_to_sequence("alt+x"), vec![0x1b, b'x']);
        assert_eq!(key_to_sequence("f5"), b"\x1b[15~".to_vec());
        assert_eq!(key_to_sequence("q"), vec![b'q']);
    }
}
