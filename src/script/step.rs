//! Step model: one declared action plus an optional assertion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single scripted step.
///
/// The action payload is flattened next to the common fields, so a step
/// reads as `{"action": "click", "selector": "#save", "timeout": 2000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// The effect this step performs
    #[serde(flatten)]
    pub action: Action,

    /// Per-step timeout override (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Label under which the captured value is stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,

    /// Human rationale, never interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,

    /// Assertion evaluated after the action succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<Expect>,
}

/// Action kinds a step can perform against a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Click the element matching `selector`
    Click { selector: String },

    /// Type text, optionally into a specific element
    Type {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        text: String,
        #[serde(default)]
        clear: bool,
    },

    /// Evaluate code on the surface and capture its result
    Evaluate { code: String },

    /// Poll until `selector` exists, or sleep for `ms`
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ms: Option<u64>,
    },

    /// Read `selector` (or nothing) and check the step's `expect` block
    Assert {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },

    /// Capture the surface as a PNG
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Move the pointer over the element matching `selector`
    Hover { selector: String },

    /// Press a key or chord such as `enter` or `ctrl+c`
    Keyboard { key: String },
}

impl Action {
    /// Short name used in logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Evaluate { .. } => "evaluate",
            Action::Wait { .. } => "wait",
            Action::Assert { .. } => "assert",
            Action::Screenshot { .. } => "screenshot",
            Action::Hover { .. } => "hover",
            Action::Keyboard { .. } => "keyboard",
        }
    }

    /// The selector this action targets, if any
    pub fn selector(&self) -> Option<&str> {
        match self {
            Action::Click { selector } | Action::Hover { selector } => Some(selector.as_str()),
            Action::Type { selector, .. }
            | Action::Wait { selector, .. }
            | Action::Assert { selector } => selector.as_deref(),
            Action::Evaluate { .. } | Action::Screenshot { .. } | Action::Keyboard { .. } => None,
        }
    }
}

impl Step {
    /// Wrap an action with no overrides
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            timeout: None,
            returns: None,
            why: None,
            expect: None,
        }
    }

    #[must_use]
    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(Action::Click {
            selector: selector.into(),
        })
    }

    #[must_use]
    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Action::Type {
            selector: Some(selector.into()),
            text: text.into(),
            clear: false,
        })
    }

    #[must_use]
    pub fn evaluate(code: impl Into<String>) -> Self {
        Self::new(Action::Evaluate { code: code.into() })
    }

    /// Poll until the selector shows up
    #[must_use]
    pub fn wait_for(selector: impl Into<String>) -> Self {
        Self::new(Action::Wait {
            selector: Some(selector.into()),
            ms: None,
        })
    }

    /// Sleep for a fixed duration
    #[must_use]
    pub fn sleep(ms: u64) -> Self {
        Self::new(Action::Wait {
            selector: None,
            ms: Some(ms),
        })
    }

    #[must_use]
    pub fn assert(selector: Option<&str>, expect: Expect) -> Self {
        Self::new(Action::Assert {
            selector: selector.map(str::to_string),
        })
        .expect(expect)
    }

    #[must_use]
    pub fn screenshot(name: impl Into<String>) -> Self {
        Self::new(Action::Screenshot {
            name: Some(name.into()),
        })
    }

    #[must_use]
    pub fn hover(selector: impl Into<String>) -> Self {
        Self::new(Action::Hover {
            selector: selector.into(),
        })
    }

    #[must_use]
    pub fn keyboard(key: impl Into<String>) -> Self {
        Self::new(Action::Keyboard { key: key.into() })
    }

    #[must_use]
    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    #[must_use]
    pub fn returns(mut self, label: impl Into<String>) -> Self {
        self.returns = Some(label.into());
        self
    }

    #[must_use]
    pub fn why(mut self, rationale: impl Into<String>) -> Self {
        self.why = Some(rationale.into());
        self
    }

    #[must_use]
    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = Some(expect);
        self
    }

    /// One-line description for logs and the debugger prompt
    pub fn summary(&self) -> String {
        match &self.action {
            Action::Click { selector } => format!("click {}", selector),
            Action::Type { selector, text, .. } => match selector {
                Some(sel) => format!("type {:?} into {}", text, sel),
                None => format!("type {:?}", text),
            },
            Action::Evaluate { code } => format!("evaluate {}", code),
            Action::Wait { selector, ms } => match (selector, ms) {
                (Some(sel), _) => format!("wait for {}", sel),
                (None, Some(ms)) => format!("wait {}ms", ms),
                (None, None) => "wait".to_string(),
            },
            Action::Assert { selector } => match selector {
                Some(sel) => format!("assert {}", sel),
                None => "assert".to_string(),
            },
            Action::Screenshot { name } => match name {
                Some(name) => format!("screenshot {}", name),
                None => "screenshot".to_string(),
            },
            Action::Hover { selector } => format!("hover {}", selector),
            Action::Keyboard { key } => format!("press {}", key),
        }
    }
}

/// An assertion attached to a step.
///
/// Value comparisons are listed first so that `{"selector": ..}` alone
/// falls through to the existence check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expect {
    /// Compare the action's captured value against `value`
    Value { op: Operator, value: Value },

    /// Check whether `selector` exists on the surface
    Selector {
        selector: String,
        #[serde(default = "default_exists")]
        exists: bool,
    },
}

fn default_exists() -> bool {
    true
}

impl Expect {
    #[must_use]
    pub fn exists(selector: impl Into<String>) -> Self {
        Expect::Selector {
            selector: selector.into(),
            exists: true,
        }
    }

    #[must_use]
    pub fn absent(selector: impl Into<String>) -> Self {
        Expect::Selector {
            selector: selector.into(),
            exists: false,
        }
    }

    #[must_use]
    pub fn value(op: Operator, value: impl Into<Value>) -> Self {
        Expect::Value {
            op,
            value: value.into(),
        }
    }
}

/// Comparison operators for value assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "eq", alias = "==", alias = "equals")]
    Eq,
    #[serde(rename = "ne", alias = "!=", alias = "not_equals")]
    Ne,
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    #[serde(rename = "contains")]
    Contains,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Contains => "contains",
        }
    }

    /// Apply the operator to `actual` and `expected`.
    ///
    /// Surfaces report text, so a string is compared loosely against a
    /// number or boolean by its textual form. Ordering operators require
    /// both sides to read as numbers.
    pub fn apply(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            Operator::Eq => loose_eq(actual, expected),
            Operator::Ne => !loose_eq(actual, expected),
            Operator::Gt => compare_numbers(actual, expected, |a, b| a > b),
            Operator::Gte => compare_numbers(actual, expected, |a, b| a >= b),
            Operator::Lt => compare_numbers(actual, expected, |a, b| a < b),
            Operator::Lte => compare_numbers(actual, expected, |a, b| a <= b),
            Operator::Contains => contains(actual, expected),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(_), Value::Number(_)) => as_number(actual) == as_number(expected),
        (Value::String(a), Value::Number(_) | Value::Bool(_)) => a.trim() == as_text(expected),
        (Value::Number(_) | Value::Bool(_), Value::String(e)) => as_text(actual) == e.trim(),
        _ => actual == expected,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => cmp(a, e),
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&as_text(expected)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
        Value::Object(map) => map.contains_key(&as_text(expected)),
        _ => false,
    }
}
