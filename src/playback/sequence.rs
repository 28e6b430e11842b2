//! Lazy step-by-step execution of a document.

use std::iter::FusedIterator;
use std::sync::Arc;

use super::types::{SessionConfig, StepResult};
use crate::executor;
use crate::script::{Document, Position, Step};
use crate::surface::SharedSurface;

/// Called with the position and step just before a step executes
pub type StepStartCallback = Box<dyn FnMut(&Position, &Step) + Send>;

/// What one advance of a [`StepSequence`] produced
#[derive(Debug, Clone)]
pub struct StepYield {
    pub position: Position,
    pub step: Step,
    pub result: StepResult,
}

/// Cursor over a document that executes one step per `next()`.
///
/// Steps run in document order, with a suite's test cases flattened in
/// listed order. Nothing executes until the sequence is advanced, and once
/// exhausted or cancelled it stays that way.
pub struct StepSequence {
    document: Arc<Document>,
    surface: Option<SharedSurface>,
    config: SessionConfig,
    cursor: Option<Position>,
    on_step_start: Option<StepStartCallback>,
    executed: usize,
}

impl std::fmt::Debug for StepSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSequence")
            .field("cursor", &self.cursor)
            .field("executed", &self.executed)
            .field("released", &self.surface.is_none())
            .finish()
    }
}

impl StepSequence {
    pub fn new(document: Arc<Document>, surface: SharedSurface, config: SessionConfig) -> Self {
        let cursor = document.first_position();
        Self {
            document,
            surface: Some(surface),
            config,
            cursor,
            on_step_start: None,
            executed: 0,
        }
    }

    /// Register the step-start callback
    #[must_use]
    pub fn on_step_start(mut self, callback: impl FnMut(&Position, &Step) + Send + 'static) -> Self {
        self.on_step_start = Some(Box::new(callback));
        self
    }

    /// True once no further step will execute
    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none() || self.surface.is_none()
    }

    /// Position of the step the next advance would run
    pub fn peek_position(&self) -> Option<Position> {
        if self.surface.is_none() {
            return None;
        }
        self.cursor
    }

    /// Steps not yet executed
    pub fn remaining(&self) -> usize {
        if self.is_exhausted() {
            return 0;
        }
        self.document.step_count().saturating_sub(self.executed)
    }

    /// Steps executed so far
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Release the surface and end the sequence early
    pub fn cancel(&mut self) {
        self.surface = None;
        self.cursor = None;
        self.on_step_start = None;
    }
}

impl Iterator for StepSequence {
    type Item = StepYield;

    fn next(&mut self) -> Option<StepYield> {
        let position = self.cursor?;
        let surface = self.surface.clone()?;
        let Some(step) = self.document.step(&position).cloned() else {
            self.cancel();
            return None;
        };

        if let Some(callback) = self.on_step_start.as_mut() {
            callback(&position, &step);
        }

        let result = {
            let mut surface = surface.lock();
            executor::execute_step(&step, &mut *surface, &self.config)
        };

        self.executed += 1;
        let following = Position {
            step: position.step + 1,
            ..position
        };
        self.cursor = self.document.next_position(following);
        if self.cursor.is_none() {
            self.surface = None;
        }

        Some(StepYield {
            position,
            step,
            result,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl FusedIterator for StepSequence {}
