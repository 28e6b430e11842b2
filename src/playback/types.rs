use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config;
use crate::script::{DocumentError, Position};

/// Lifecycle state of a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Completed,
    Disposed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The action could not be performed
    Execution,
    /// The action or a wait ran past its timeout
    Timeout,
    /// The action ran but the expect block did not hold
    Assertion,
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn passed(value: Option<Value>, duration_ms: u64) -> Self {
        Self {
            success: true,
            value,
            error: None,
            failure: None,
            duration_ms,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>, value: Option<Value>, duration_ms: u64) -> Self {
        Self {
            success: false,
            value,
            error: Some(error.into()),
            failure: Some(kind),
            duration_ms,
        }
    }
}

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Timeout for steps without their own override (milliseconds)
    pub default_timeout_ms: u64,
    /// Interval between polls of a wait step (milliseconds)
    pub poll_interval_ms: u64,
    /// Reporting only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Reporting only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = &config::get().playback;
        Self {
            default_timeout_ms: settings.step_timeout,
            poll_interval_ms: settings.poll_interval,
            group_id: None,
            suite_id: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    #[must_use]
    pub fn group(mut self, id: impl Into<String>) -> Self {
        self.group_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn suite(mut self, id: impl Into<String>) -> Self {
        self.suite_id = Some(id.into());
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A command that is not valid in the session's current state
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session is not paused")]
    NotPaused,
    #[error("session has completed; stop it before starting again")]
    Completed,
    #[error("session has been disposed")]
    Disposed,
    #[error("session is busy running another command")]
    Busy,
    #[error("session was stopped by a pending request")]
    Stopped,
}

/// Errors returned by session and registry commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no session with id '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("invalid document: {0}")]
    Document(#[from] DocumentError),
}

/// Result type for playback commands
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    /// Position of the step most recently started, if any
    pub position: Option<Position>,
    /// Results keyed by position, in document order
    #[serde(with = "position_keyed")]
    pub results: BTreeMap<Position, StepResult>,
    /// Values captured by steps with a `returns` label
    pub captures: BTreeMap<String, Value>,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_id: Option<String>,
}

impl SessionSnapshot {
    /// Number of results that failed
    pub fn failures(&self) -> usize {
        self.results.values().filter(|r| !r.success).count()
    }

    /// Results in document order
    pub fn ordered_results(&self) -> impl Iterator<Item = (&Position, &StepResult)> {
        self.results.iter()
    }
}

/// Serializes position-keyed maps with [`Position::key`] strings, since
/// JSON object keys cannot be structs.
mod position_keyed {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Position, StepResult>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(pos, result)| (pos.key(), result)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Position, StepResult>, D::Error> {
        let raw = BTreeMap::<String, StepResult>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, result) in raw {
            let position: Position = key.parse().map_err(D::Error::custom)?;
            map.insert(position, result);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionState::Paused).unwrap(), "\"paused\"");
        assert_eq!(SessionState::Completed.to_string(), "completed");
    }

    #[test]
    fn test_step_result_wire_form() {
        let result = StepResult::failed(FailureKind::Timeout, "timed out after 10ms", None, 12);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["failure"], "timeout");
        assert_eq!(json["durationMs"], 12);
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_session_config_builders() {
        let config = SessionConfig::default()
            .timeout_ms(250)
            .poll_interval_ms(0)
            .group("nightly")
            .suite("login");
        assert_eq!(config.default_timeout(), Duration::from_millis(250));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.group_id.as_deref(), Some("nightly"));
        assert_eq!(config.suite_id.as_deref(), Some("login"));
    }

    #[test]
    fn test_snapshot_results_keyed_by_position() {
        let mut results = BTreeMap::new();
        results.insert(Position::nested(1, 0), StepResult::passed(None, 3));
        let snapshot = SessionSnapshot {
            id: "session_x".to_string(),
            state: SessionState::Paused,
            position: Some(Position::nested(1, 0)),
            results,
            captures: BTreeMap::new(),
            total_steps: 4,
            group_id: None,
            suite_id: None,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["results"]["1:0"]["success"], true);
        assert_eq!(json["totalSteps"], 4);

        let back: SessionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_usage_error_converts() {
        let err: PlaybackError = UsageError::Busy.into();
        assert_eq!(err, PlaybackError::Usage(UsageError::Busy));
        assert_eq!(err.to_string(), "session is busy running another command");
    }
}
