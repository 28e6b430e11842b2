//! Unattended runs and the reports they produce.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::playback::{
    FailureKind, PlaybackEvent, PlaybackResult, PlaybackSession, SessionConfig, SessionSnapshot,
    SessionState, generate_session_id,
};
use crate::script::{Document, Position};
use crate::surface::{SharedSurface, VirtualFixture};

/// Errors loading scripts and fixtures from disk
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a macro or test suite from a JSON file
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    load_json(path)
}

/// Load a virtual surface fixture from a JSON file
pub fn load_fixture(path: &Path) -> Result<VirtualFixture, LoadError> {
    load_json(path)
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub position: Position,
    /// Position as printed, e.g. `"3"` or `"1:0"`
    pub key: String,
    pub action: String,
    pub summary: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub duration_ms: u64,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub session_id: String,
    /// Completed with every executed step passing
    pub success: bool,
    pub total_steps: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    /// Executed steps in document order (N executed → N entries)
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub captures: std::collections::BTreeMap<String, Value>,
}

impl RunReport {
    /// Summarize a session snapshot, looking steps up in `document`
    pub fn from_snapshot(document: &Document, snapshot: &SessionSnapshot, duration_ms: u64) -> Self {
        let steps: Vec<StepReport> = snapshot
            .results
            .iter()
            .map(|(position, result)| {
                let step = document.step(position);
                StepReport {
                    position: *position,
                    key: position.key(),
                    action: step.map_or("unknown", |s| s.action.kind()).to_string(),
                    summary: step.map(|s| s.summary()).unwrap_or_default(),
                    success: result.success,
                    failure: result.failure,
                    error: result.error.clone(),
                    value: result.value.clone(),
                    duration_ms: result.duration_ms,
                }
            })
            .collect();

        let passed = steps.iter().filter(|s| s.success).count();
        let failed = steps.len() - passed;
        RunReport {
            session_id: snapshot.id.clone(),
            success: snapshot.state == SessionState::Completed && failed == 0,
            total_steps: snapshot.total_steps,
            executed: steps.len(),
            passed,
            failed,
            duration_ms,
            steps,
            captures: snapshot.captures.clone(),
        }
    }

    /// The step that ended the run, if one failed
    pub fn first_failure(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.success)
    }

    /// Write every screenshot the run captured into `dir` as PNG files
    pub fn save_screenshots(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for step in &self.steps {
            let Some(encoded) = step.value.as_ref().and_then(|v| v.get("pngBase64")).and_then(Value::as_str)
            else {
                continue;
            };
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            let name = step
                .value
                .as_ref()
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
                .map(|n| format!("_{}", n.replace(['/', '\\', ' '], "_")))
                .unwrap_or_default();
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("step_{}{}.png", step.key.replace(':', "_"), name));
            fs::write(&path, bytes)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Play `document` start to finish against `surface`
pub fn run_document(document: Document, surface: SharedSurface, config: SessionConfig) -> PlaybackResult<RunReport> {
    run_document_observed(document, surface, config, |_| {})
}

/// Like [`run_document`], with `observer` receiving every event
pub fn run_document_observed(
    document: Document,
    surface: SharedSurface,
    config: SessionConfig,
    observer: impl Fn(&PlaybackEvent) + Send + Sync + 'static,
) -> PlaybackResult<RunReport> {
    document.dependency_order()?;

    let document = Arc::new(document);
    let mut session = PlaybackSession::new(generate_session_id(), document.clone(), surface, config);

    let duration = Arc::new(AtomicU64::new(0));
    let sink = duration.clone();
    session.subscribe(observer);
    session.subscribe(move |event| {
        if let PlaybackEvent::PlaybackComplete { duration_ms, .. } = event {
            sink.store(*duration_ms, Ordering::SeqCst);
        }
    });

    session.start()?;
    let report = RunReport::from_snapshot(&document, &session.snapshot(), duration.load(Ordering::SeqCst));
    session.dispose()?;
    Ok(report)
}
