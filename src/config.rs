//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for UI Playback, supporting:
//! - Environment variables for every tunable the engine reads
//! - Defaults used when a variable is missing or unparsable
//! - Builder-style overrides through [`crate::playback::SessionConfig`]
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `UI_PLAYBACK_DEFAULT_TIMEOUT` | Per-step timeout (ms) | `5000` |
//! | `UI_PLAYBACK_POLL_INTERVAL` | Poll interval for wait steps (ms) | `50` |
//! | `UI_PLAYBACK_TERMINAL_SIZE` | Terminal surface size | `standard` |
//! | `UI_PLAYBACK_SETTLE` | Terminal quiet window after input (ms) | `180` |
//! | `UI_PLAYBACK_LOG` | Log filter directive | `warn` |
//!
//! # Example
//!
//! ```bash
//! # Give slow applications more time per step
//! export UI_PLAYBACK_DEFAULT_TIMEOUT=15000
//!
//! # Drive a terminal app at 80x24 and log every step boundary
//! export UI_PLAYBACK_TERMINAL_SIZE=compact
//! export UI_PLAYBACK_LOG=ui_playback=debug
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default per-step timeout (milliseconds)
pub const DEFAULT_STEP_TIMEOUT: u64 = 5_000;

/// Default interval between polls of a wait step (milliseconds)
pub const DEFAULT_POLL_INTERVAL: u64 = 50;

/// Default terminal size preset
pub const DEFAULT_TERMINAL_SIZE: &str = "standard";

/// Default terminal width (columns)
pub const DEFAULT_TERMINAL_WIDTH: u16 = 120;

/// Default terminal height (rows)
pub const DEFAULT_TERMINAL_HEIGHT: u16 = 40;

/// Default quiet window after terminal input (milliseconds)
pub const DEFAULT_SETTLE_WINDOW: u64 = 180;

/// Default log filter
pub const DEFAULT_LOG_FILTER: &str = "warn";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the per-step timeout
pub const ENV_DEFAULT_TIMEOUT: &str = "UI_PLAYBACK_DEFAULT_TIMEOUT";

/// Environment variable for the wait poll interval
pub const ENV_POLL_INTERVAL: &str = "UI_PLAYBACK_POLL_INTERVAL";

/// Environment variable for the terminal surface size
pub const ENV_TERMINAL_SIZE: &str = "UI_PLAYBACK_TERMINAL_SIZE";

/// Environment variable for the terminal settle window
pub const ENV_SETTLE_WINDOW: &str = "UI_PLAYBACK_SETTLE";

/// Environment variable for the log filter
pub const ENV_LOG_FILTER: &str = "UI_PLAYBACK_LOG";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for UI Playback
#[derive(Debug, Clone)]
pub struct Config {
    /// Playback engine settings
    pub playback: PlaybackSettings,
    /// Terminal surface settings
    pub terminal: TerminalSettings,
    /// Log filter directive
    pub log_filter: String,
}

/// Settings consumed by playback sessions
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Per-step timeout (milliseconds)
    pub step_timeout: u64,
    /// Interval between polls of a wait step (milliseconds)
    pub poll_interval: u64,
}

/// Settings consumed by the PTY-backed terminal surface
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Size preset or `WxH`
    pub size: String,
    /// Terminal width
    pub width: u16,
    /// Terminal height
    pub height: u16,
    /// Quiet window after input (milliseconds)
    pub settle_window: u64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            playback: PlaybackSettings::from_env(),
            terminal: TerminalSettings::from_env(),
            log_filter: env::var(ENV_LOG_FILTER).unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            playback: PlaybackSettings::defaults(),
            terminal: TerminalSettings::defaults(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PlaybackSettings {
    /// Create playback settings from environment variables
    pub fn from_env() -> Self {
        Self {
            step_timeout: env_u64(ENV_DEFAULT_TIMEOUT).unwrap_or(DEFAULT_STEP_TIMEOUT),
            poll_interval: env_u64(ENV_POLL_INTERVAL)
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
        }
    }

    /// Create playback settings with defaults
    pub fn defaults() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TerminalSettings {
    /// Create terminal settings from environment variables
    pub fn from_env() -> Self {
        let size = env::var(ENV_TERMINAL_SIZE).unwrap_or_else(|_| DEFAULT_TERMINAL_SIZE.to_string());

        // Fall back to the standard size when the variable is garbage
        let (width, height) =
            parse_terminal_size(&size).unwrap_or((DEFAULT_TERMINAL_WIDTH, DEFAULT_TERMINAL_HEIGHT));

        Self {
            size,
            width,
            height,
            settle_window: env_u64(ENV_SETTLE_WINDOW).unwrap_or(DEFAULT_SETTLE_WINDOW),
        }
    }

    /// Create terminal settings with defaults
    pub fn defaults() -> Self {
        Self {
            size: DEFAULT_TERMINAL_SIZE.to_string(),
            width: DEFAULT_TERMINAL_WIDTH,
            height: DEFAULT_TERMINAL_HEIGHT,
            settle_window: DEFAULT_SETTLE_WINDOW,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a terminal size string into (width, height)
/// Supports: "compact" (80x24), "standard" (120x40), "large" (160x50), "xl" (200x60), or "WxH"
pub fn parse_terminal_size(size: &str) -> Option<(u16, u16)> {
    match size.trim().to_lowercase().as_str() {
        "compact" => Some((80, 24)),
        "standard" => Some((120, 40)),
        "large" => Some((160, 50)),
        "xl" => Some((200, 60)),
        custom => {
            let (w, h) = custom.split_once('x')?;
            let w: u16 = w.parse().ok()?;
            let h: u16 = h.parse().ok()?;
            if w == 0 || h == 0 {
                return None;
            }
            Some((w, h))
        }
    }
}

/// Get the default step timeout (convenience function)
pub fn default_step_timeout() -> u64 {
    get().playback.step_timeout
}

/// Get the default poll interval (convenience function)
pub fn default_poll_interval() -> u64 {
    get().playback.poll_interval
}

/// Get the log filter directive (convenience function)
pub fn log_filter() -> String {
    get().log_filter.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terminal_size_presets() {
        assert_eq!(parse_terminal_size("compact"), Some((80, 24)));
        assert_eq!(parse_terminal_size("standard"), Some((120, 40)));
        assert_eq!(parse_terminal_size("large"), Some((160, 50)));
        assert_eq!(parse_terminal_size("XL"), Some((200, 60)));
    }

    #[test]
    fn test_parse_terminal_size_custom() {
        assert_eq!(parse_terminal_size("100x30"), Some((100, 30)));
        assert_eq!(parse_terminal_size(" 200x80 "), Some((200, 80)));
    }

    #[test]
    fn test_parse_terminal_size_invalid() {
        assert_eq!(parse_terminal_size("invalid"), None);
        assert_eq!(parse_terminal_size("100"), None);
        assert_eq!(parse_terminal_size("0x10"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.playback.step_timeout, DEFAULT_STEP_TIMEOUT);
        assert_eq!(config.playback.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.terminal.width, DEFAULT_TERMINAL_WIDTH);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }
}
