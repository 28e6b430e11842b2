pub mod document;
pub mod step;

pub use document::{Document, DocumentError, Macro, Position, TestCase, TestSuite};
pub use step::{Action, Expect, Operator, Step};
