//! Read-only statement classification.

pub mod classifier;

pub use classifier::{StatementClassifier, StatementVerdict, preview};
