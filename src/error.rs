//! Typed errors for the engine core.

use crate::contract::Operation;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-field validation messages, accumulated so a caller sees every problem at once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut e = Self::new();
        e.push(field, message);
        e
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Err(Validation) if any message was collected, Ok otherwise.
    pub fn into_result(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", field, messages.join(", "))?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(ValidationErrors),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("concurrency conflict: '{resource}' record '{id}' was modified by another writer")]
    ConcurrencyConflict { resource: String, id: String },
    #[error("operation '{operation}' is disabled for '{resource}'")]
    OperationDisabled { resource: String, operation: Operation },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("database: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    /// The validation map, when this is a validation failure.
    pub fn validation(&self) -> Option<&ValidationErrors> {
        match self {
            EngineError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
