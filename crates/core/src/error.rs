//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// How strongly a validation finding blocks the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    /// Surfaced to the caller, blocks only unless explicitly acknowledged.
    Warning,
}

/// A single caller-correctable finding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    /// Stable machine-readable code (e.g. `bank.bik_format`).
    pub code: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationError {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(field, code, message)
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Collected findings of an error-collecting validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.code.as_str()).collect()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.0.iter().any(|e| e.code == code)
    }

    /// True when at least one finding has error severity.
    pub fn has_blocking(&self) -> bool {
        self.0.iter().any(|e| !e.is_warning())
    }

    /// Only warning-severity findings.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter().filter(|e| e.is_warning())
    }

    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(value: ValidationError) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<ValidationError>> for ValidationErrors {
    fn from(value: Vec<ValidationError>) -> Self {
        Self(value)
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (idx, e) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            core::fmt::Display::fmt(e, f)?;
        }
        Ok(())
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Storage
/// failures are carried through `Store` so they roll back like any other error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Caller-correctable input problems, reported as a complete list.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// A business rule rejected the operation (wrong status, cap exceeded, ...).
    #[error("{0}")]
    Rule(String),

    /// The actor has no rights to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested status change is not an edge of the document graph.
    #[error("invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: &'static str, to: &'static str },

    /// A conflict occurred (unique constraint race, lock wait timeout).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A requested resource was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Infrastructure failure surfaced through the storage boundary.
    #[error("storage failure: {0}")]
    Store(String),
}

impl DomainError {
    pub fn validation(error: ValidationError) -> Self {
        Self::Validation(error.into())
    }

    pub fn rule(msg: impl Into<String>) -> Self {
        Self::Rule(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::validation(ValidationError::new("id", "id.invalid", msg))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<ValidationErrors> for DomainError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<ValidationError> for DomainError {
    fn from(value: ValidationError) -> Self {
        Self::validation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_every_finding() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::new("amount", "amount.positive", "must be positive"));
        errors.push(ValidationError::warning(
            "payee",
            "duplicate.suspected",
            "looks like a duplicate",
        ));

        assert_eq!(errors.len(), 2);
        assert!(errors.has_blocking());
        assert_eq!(errors.warnings().count(), 1);
        assert_eq!(
            errors.to_string(),
            "amount: must be positive; payee: looks like a duplicate"
        );
    }

    #[test]
    fn warnings_alone_are_not_blocking() {
        let errors: ValidationErrors =
            ValidationError::warning("payee", "duplicate.suspected", "dup").into();
        assert!(!errors.has_blocking());
        assert!(errors.into_result().is_err());
    }
}
