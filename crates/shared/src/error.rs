//! Error types for LearnHub shared types

use thiserror::Error;

/// Returned when a stored or user-supplied string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
