//! Step execution: one action, then the step's optional assertion.
//!
//! These functions hold no state. Everything a step needs comes from the
//! step itself, the surface it runs against, and the session's defaults.
//! Failures are data: nothing here returns an error to the caller or
//! panics on a bad step.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::playback::{FailureKind, SessionConfig, StepResult};
use crate::script::{Action, Expect, Step};
use crate::surface::{Surface, SurfaceError};

/// Why an action or assertion did not succeed
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Display value to keep with the failure, e.g. `{actual, expected}`
    pub value: Option<Value>,
}

impl StepFailure {
    fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
            value: None,
        }
    }

    fn timeout(timeout: Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("timed out after {}ms", timeout.as_millis()),
            value: None,
        }
    }

    fn assertion(message: impl Into<String>, value: Value) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
            value: Some(value),
        }
    }
}

impl From<SurfaceError> for StepFailure {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::Timeout(after) => StepFailure::timeout(after),
            other => StepFailure::execution(other.to_string()),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The step's own timeout, else the session default
pub fn effective_timeout(step: &Step, config: &SessionConfig) -> Duration {
    step.timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.default_timeout())
}

fn required<'a>(field: &str, value: &'a str, kind: &str) -> Result<&'a str, StepFailure> {
    if value.trim().is_empty() {
        return Err(StepFailure::execution(format!("{} step has an empty {}", kind, field)));
    }
    Ok(value)
}

/// Perform the step's action and return the value it captured.
///
/// `wait` with a selector polls [`Surface::exists`] every poll interval.
/// Every other action is handed the effective timeout; a surface that
/// returns after the deadline still yields a timeout failure.
pub fn execute_action(
    step: &Step,
    surface: &mut dyn Surface,
    config: &SessionConfig,
) -> Result<Value, StepFailure> {
    let timeout = effective_timeout(step, config);
    let started = Instant::now();
    let kind = step.action.kind();

    let value = match &step.action {
        Action::Click { selector } => {
            surface.click(required("selector", selector, kind)?, timeout)?;
            Value::Null
        }
        Action::Hover { selector } => {
            surface.hover(required("selector", selector, kind)?, timeout)?;
            Value::Null
        }
        Action::Type {
            selector,
            text,
            clear,
        } => {
            let selector = match selector.as_deref() {
                Some(sel) => Some(required("selector", sel, kind)?),
                None => None,
            };
            surface.type_text(selector, text, *clear, timeout)?;
            Value::String(text.clone())
        }
        Action::Keyboard { key } => {
            surface.press_key(required("key", key, kind)?, timeout)?;
            Value::String(key.clone())
        }
        Action::Evaluate { code } => surface.evaluate(required("code", code, kind)?, timeout)?,
        Action::Wait { selector, ms } => match (selector.as_deref(), ms) {
            (Some(sel), _) => {
                poll_until_exists(surface, required("selector", sel, kind)?, timeout, config.poll_interval())?;
                Value::Bool(true)
            }
            (None, Some(ms)) => {
                let wanted = Duration::from_millis(*ms);
                if wanted > timeout {
                    thread::sleep(timeout);
                    return Err(StepFailure::timeout(timeout));
                }
                thread::sleep(wanted);
                Value::Null
            }
            (None, None) => {
                return Err(StepFailure::execution("wait step needs a selector or ms"));
            }
        },
        Action::Assert { selector } => {
            let Some(expect) = &step.expect else {
                return Err(StepFailure::execution("assert step has no expect block"));
            };
            match (selector.as_deref(), expect) {
                (Some(sel), Expect::Value { .. }) => surface.read_value(required("selector", sel, kind)?)?,
                (Some(sel), Expect::Selector { .. }) => {
                    required("selector", sel, kind)?;
                    Value::Null
                }
                (None, _) => Value::Null,
            }
        }
        Action::Screenshot { name } => surface.screenshot()?.to_value(name.as_deref()),
    };

    if started.elapsed() > timeout {
        return Err(StepFailure::timeout(timeout));
    }
    Ok(value)
}

fn poll_until_exists(
    surface: &mut dyn Surface,
    selector: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), StepFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        if surface.exists(selector)? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(StepFailure {
                kind: FailureKind::Timeout,
                message: format!("{} did not appear within {}ms", selector, timeout.as_millis()),
                value: None,
            });
        }
        thread::sleep(poll_interval.min(deadline - now));
    }
}

/// Check the step's expect block against the surface and the action's value.
///
/// Without an expect block the action value passes through untouched.
/// Selector checks report a boolean; value checks report
/// `{actual, expected}`. Every failure here is an assertion failure.
pub fn execute_expect(
    step: &Step,
    surface: &mut dyn Surface,
    action_value: Value,
) -> Result<Value, StepFailure> {
    let Some(expect) = &step.expect else {
        return Ok(action_value);
    };

    match expect {
        Expect::Selector { selector, exists } => {
            if selector.trim().is_empty() {
                return Err(StepFailure::assertion("expect block has an empty selector", Value::Null));
            }
            let found = surface
                .exists(selector)
                .map_err(|e| StepFailure::assertion(e.to_string(), Value::Null))?;
            if found == *exists {
                Ok(Value::Bool(found))
            } else if *exists {
                Err(StepFailure::assertion(format!("expected {} to exist", selector), Value::Bool(found)))
            } else {
                Err(StepFailure::assertion(
                    format!("expected {} to be absent", selector),
                    Value::Bool(found),
                ))
            }
        }
        Expect::Value { op, value } => {
            let report = json!({ "actual": action_value, "expected": value });
            if op.apply(&action_value, value) {
                Ok(report)
            } else {
                Err(StepFailure::assertion(
                    format!("expected {} {} {}", action_value, op.symbol(), value),
                    report,
                ))
            }
        }
    }
}

/// Run the action, then the expect block, and fold both into one result.
///
/// A failed action skips the expect block. `duration_ms` covers both.
pub fn execute_step(step: &Step, surface: &mut dyn Surface, config: &SessionConfig) -> StepResult {
    let started = Instant::now();
    let outcome = execute_action(step, surface, config)
        .and_then(|value| execute_expect(step, surface, value));
    let duration_ms = millis(started.elapsed());

    match outcome {
        Ok(Value::Null) => StepResult::passed(None, duration_ms),
        Ok(value) => StepResult::passed(Some(value), duration_ms),
        Err(failure) => StepResult::failed(failure.kind, failure.message, failure.value, duration_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Operator;
    use crate::surface::VirtualSurface;

    fn config() -> SessionConfig {
        SessionConfig::default().timeout_ms(500).poll_interval_ms(1)
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_micros(2_500)), 2);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    fn surface() -> VirtualSurface {
        VirtualSurface::new()
            .title("Login")
            .element("#user", "")
            .element("#status", "ready")
            .element("#count", "3")
    }

    #[test]
    fn test_click_missing_selector_is_execution_failure() {
        let mut surface = surface();
        let result = execute_step(&Step::click("#nope"), &mut surface, &config());
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Execution));
        assert_eq!(result.error.as_deref(), Some("selector not found: #nope"));
    }

    #[test]
    fn test_type_returns_text() {
        let mut surface = surface();
        let result = execute_step(&Step::type_text("#user", "ada"), &mut surface, &config());
        assert!(result.success);
        assert_eq!(result.value, Some(Value::String("ada".to_string())));
        assert_eq!(surface.text("#user"), Some("ada"));
    }

    #[test]
    fn test_click_without_value_has_no_value() {
        let mut surface = surface();
        let result = execute_step(&Step::click("#status"), &mut surface, &config());
        assert!(result.success);
        assert_eq!(result.value, None);
    }

    #[test]
    fn test_malformed_steps_fail_alone() {
        let mut surface = surface();
        let cases = [
            Step::click(""),
            Step::evaluate("  "),
            Step::new(Action::Assert { selector: None }),
            Step::new(Action::Wait { selector: None, ms: None }),
        ];
        for step in cases {
            let result = execute_step(&step, &mut surface, &config());
            assert!(!result.success, "{} should fail", step.summary());
            assert_eq!(result.failure, Some(FailureKind::Execution));
        }
    }

    #[test]
    fn test_wait_polls_until_element_appears() {
        let mut surface = surface().delayed_element("#toast", "saved", 3);
        let result = execute_step(&Step::wait_for("#toast"), &mut surface, &config());
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.value, Some(Value::Bool(true)));
    }

    #[test]
    fn test_wait_times_out() {
        let mut surface = surface();
        let step = Step::wait_for("#never").with_timeout(20);
        let result = execute_step(&step, &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Timeout));
        assert!(result.duration_ms >= 20);
    }

    #[test]
    fn test_sleep_longer_than_timeout_fails() {
        let mut surface = surface();
        let result = execute_step(&Step::sleep(50).with_timeout(5), &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Timeout));

        let result = execute_step(&Step::sleep(1), &mut surface, &config());
        assert!(result.success);
    }

    #[test]
    fn test_slow_surface_reports_timeout() {
        let mut surface = surface().latency(Duration::from_millis(40));
        let result = execute_step(&Step::click("#status").with_timeout(10), &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Timeout));
    }

    #[test]
    fn test_selector_expect_reports_boolean() {
        let mut surface = surface();
        let step = Step::click("#status").expect(Expect::exists("#status"));
        let result = execute_step(&step, &mut surface, &config());
        assert!(result.success);
        assert_eq!(result.value, Some(Value::Bool(true)));

        let step = Step::click("#status").expect(Expect::exists("#missing"));
        let result = execute_step(&step, &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Assertion));
        assert_eq!(result.value, Some(Value::Bool(false)));
    }

    #[test]
    fn test_value_expect_reports_actual_and_expected() {
        let mut surface = surface();
        let step = Step::assert(Some("#count"), Expect::value(Operator::Gte, 2));
        let result = execute_step(&step, &mut surface, &config());
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.value, Some(json!({ "actual": "3", "expected": 2 })));

        let step = Step::assert(Some("#status"), Expect::value(Operator::Eq, "busy"));
        let result = execute_step(&step, &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Assertion));
        assert_eq!(result.value, Some(json!({ "actual": "ready", "expected": "busy" })));
    }

    #[test]
    fn test_failed_action_skips_expect() {
        let mut surface = surface();
        let step = Step::click("#nope").expect(Expect::exists("#nope"));
        let result = execute_step(&step, &mut surface, &config());
        assert_eq!(result.failure, Some(FailureKind::Execution));
        assert_eq!(surface.interactions().len(), 0);
    }

    #[test]
    fn test_effective_timeout_prefers_step_override() {
        let config = config();
        assert_eq!(effective_timeout(&Step::click("#a"), &config), Duration::from_millis(500));
        assert_eq!(effective_timeout(&Step::click("#a").with_timeout(7), &config), Duration::from_millis(7));
    }
}
