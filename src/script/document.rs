//! Documents (flat macros or suites of test cases) and positions within them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::step::Step;

/// Problems found while inspecting a document's test-case graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Duplicate test case id: {0}")]
    DuplicateId(String),
    #[error("Test case '{case}' depends on unknown test case '{missing}'")]
    UnknownDependency { case: String, missing: String },
    #[error("Dependency cycle between test cases: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// An already-parsed script.
///
/// Suites are tried first when deserializing, so a JSON object with
/// `testCases` is a suite and one with `steps` is a macro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Suite(TestSuite),
    Macro(Macro),
}

/// A flat, ordered list of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

/// Named test cases, each owning its own steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub test_cases: Vec<TestCase>,
}

/// One test case within a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ids of test cases this one depends on. Ordering metadata only;
    /// playback always runs test cases in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub steps: Vec<Step>,
}

impl TestCase {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: None,
            depends_on: Vec::new(),
            steps,
        }
    }

    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Pointer to a step: a bare index for macros, a (test case, step) pair for suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<usize>,
    pub step: usize,
}

impl Position {
    pub fn flat(step: usize) -> Self {
        Self {
            test_case: None,
            step,
        }
    }

    pub fn nested(test_case: usize, step: usize) -> Self {
        Self {
            test_case: Some(test_case),
            step,
        }
    }

    /// Results-map key: `"<step>"` or `"<testCase>:<step>"`
    pub fn key(&self) -> String {
        match self.test_case {
            Some(case) => format!("{}:{}", case, self.step),
            None => self.step.to_string(),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.key())
    }
}

impl FromStr for Position {
    type Err = String;

    /// Parse the form produced by [`Position::key`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid position '{}'", s))
        };
        match s.split_once(':') {
            Some((case, step)) => Ok(Position::nested(parse(case)?, parse(step)?)),
            None => Ok(Position::flat(parse(s)?)),
        }
    }
}

impl Document {
    /// Build a flat macro
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Document::Macro(Macro { name: None, steps })
    }

    /// Build a suite of test cases
    pub fn from_test_cases(test_cases: Vec<TestCase>) -> Self {
        Document::Suite(TestSuite {
            name: None,
            test_cases,
        })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Document::Macro(m) => m.name.as_deref(),
            Document::Suite(s) => s.name.as_deref(),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Document::Suite(_))
    }

    /// Total number of steps across all test cases
    pub fn step_count(&self) -> usize {
        match self {
            Document::Macro(m) => m.steps.len(),
            Document::Suite(s) => s.test_cases.iter().map(|c| c.steps.len()).sum(),
        }
    }

    /// Every position in execution order
    pub fn positions(&self) -> Vec<Position> {
        match self {
            Document::Macro(m) => (0..m.steps.len()).map(Position::flat).collect(),
            Document::Suite(s) => s
                .test_cases
                .iter()
                .enumerate()
                .flat_map(|(ci, case)| (0..case.steps.len()).map(move |si| Position::nested(ci, si)))
                .collect(),
        }
    }

    /// Look up the step at a position
    pub fn step(&self, position: &Position) -> Option<&Step> {
        match (self, position.test_case) {
            (Document::Macro(m), None) => m.steps.get(position.step),
            (Document::Suite(s), Some(case)) => s
                .test_cases
                .get(case)
                .and_then(|c| c.steps.get(position.step)),
            _ => None,
        }
    }

    /// First position at or after `position` that holds a step.
    ///
    /// Skips empty test cases; `None` once the document is exhausted.
    pub fn next_position(&self, position: Position) -> Option<Position> {
        match self {
            Document::Macro(m) => (position.step < m.steps.len()).then_some(position),
            Document::Suite(s) => {
                let mut case = position.test_case.unwrap_or(0);
                let mut step = position.step;
                while let Some(tc) = s.test_cases.get(case) {
                    if step < tc.steps.len() {
                        return Some(Position::nested(case, step));
                    }
                    case += 1;
                    step = 0;
                }
                None
            }
        }
    }

    /// Position of the first step, if any
    pub fn first_position(&self) -> Option<Position> {
        let start = if self.is_nested() {
            Position::nested(0, 0)
        } else {
            Position::flat(0)
        };
        self.next_position(start)
    }

    /// Test-case ids in dependency order.
    ///
    /// Kahn's algorithm, preferring document order among ready cases, so a
    /// suite without edges keeps its listed order. Macros yield an empty list.
    pub fn dependency_order(&self) -> Result<Vec<&str>, DocumentError> {
        let Document::Suite(suite) = self else {
            return Ok(Vec::new());
        };

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, case) in suite.test_cases.iter().enumerate() {
            if index.insert(case.id.as_str(), i).is_some() {
                return Err(DocumentError::DuplicateId(case.id.clone()));
            }
        }

        let mut pending: Vec<usize> = vec![0; suite.test_cases.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); suite.test_cases.len()];
        for (i, case) in suite.test_cases.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &case.depends_on {
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(DocumentError::UnknownDependency {
                        case: case.id.clone(),
                        missing: dep.clone(),
                    });
                };
                if seen.insert(d) {
                    pending[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut order = Vec::with_capacity(suite.test_cases.len());
        let mut done = vec![false; suite.test_cases.len()];
        loop {
            let Some(next) = (0..suite.test_cases.len()).find(|&i| !done[i] && pending[i] == 0) else {
                break;
            };
            done[next] = true;
            order.push(suite.test_cases[next].id.as_str());
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
            }
        }

        if order.len() < suite.test_cases.len() {
            let stuck = suite
                .test_cases
                .iter()
                .enumerate()
                .filter(|(i, _)| !done[*i])
                .map(|(_, c)| c.id.clone())
                .collect();
            return Err(DocumentError::Cycle(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn suite() -> Document {
        Document::from_test_cases(vec![
            TestCase::new("login", vec![Step::click("#a"), Step::click("#b")]),
            TestCase::new("empty", vec![]),
            TestCase::new("logout", vec![Step::click("#c")]).depends_on(["login"]),
        ])
    }

    #[test]
    fn test_position_keys() {
        assert_eq!(Position::flat(3).key(), "3");
        assert_eq!(Position::nested(1, 0).key(), "1:0");
        assert!(Position::nested(0, 5) < Position::nested(1, 0));
        assert_eq!("1:0".parse::<Position>(), Ok(Position::nested(1, 0)));
        assert_eq!("7".parse::<Position>(), Ok(Position::flat(7)));
        assert!("x:1".parse::<Position>().is_err());
    }

    #[test]
    fn test_positions_skip_empty_cases() {
        let doc = suite();
        assert_eq!(doc.step_count(), 3);
        assert_eq!(
            doc.positions(),
            vec![Position::nested(0, 0), Position::nested(0, 1), Position::nested(2, 0)]
        );
        assert_eq!(doc.next_position(Position::nested(0, 2)), Some(Position::nested(2, 0)));
        assert_eq!(doc.next_position(Position::nested(2, 1)), None);
    }

    #[test]
    fn test_step_lookup_rejects_mismatched_position() {
        let doc = Document::from_steps(vec![Step::click("#a")]);
        assert!(doc.step(&Position::flat(0)).is_some());
        assert!(doc.step(&Position::nested(0, 0)).is_none());
        assert!(doc.step(&Position::flat(1)).is_none());
    }

    #[test]
    fn test_document_deserializes_both_shapes() {
        let flat: Document = serde_json::from_value(json!({
            "steps": [{ "action": "click", "selector": "#go" }]
        }))
        .unwrap();
        assert!(!flat.is_nested());

        let nested: Document = serde_json::from_value(json!({
            "name": "checkout",
            "testCases": [
                { "id": "cart", "steps": [] },
                { "id": "pay", "dependsOn": ["cart"], "steps": [{ "action": "keyboard", "key": "enter" }] }
            ]
        }))
        .unwrap();
        assert!(nested.is_nested());
        assert_eq!(nested.name(), Some("checkout"));
        assert_eq!(nested.first_position(), Some(Position::nested(1, 0)));
    }

    #[test]
    fn test_dependency_order() {
        let doc = Document::from_test_cases(vec![
            TestCase::new("c", vec![]).depends_on(["b"]),
            TestCase::new("a", vec![]),
            TestCase::new("b", vec![]).depends_on(["a"]),
        ]);
        assert_eq!(doc.dependency_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependency_errors() {
        let unknown = Document::from_test_cases(vec![TestCase::new("a", vec![]).depends_on(["zzz"])]);
        assert_eq!(
            unknown.dependency_order(),
            Err(DocumentError::UnknownDependency {
                case: "a".to_string(),
                missing: "zzz".to_string()
            })
        );

        let cycle = Document::from_test_cases(vec![
            TestCase::new("a", vec![]).depends_on(["b"]),
            TestCase::new("b", vec![]).depends_on(["a"]),
        ]);
        assert_eq!(
            cycle.dependency_order(),
            Err(DocumentError::Cycle(vec!["a".to_string(), "b".to_string()]))
        );
    }
}
