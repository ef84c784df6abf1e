//! Error type shared by the domain model.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value is out of range (zero capacity, empty reference).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Two parts of a declaration disagree.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: &'static str, id: String },
}

impl DomainError {
    /// Reject a value that breaks a model invariant.
    ///
    /// ```ignore
    /// if capacity == 0 {
    ///     return Err(DomainError::validation("capacity must be positive"));
    /// }
    /// ```
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Markup or text that does not follow the expected syntax.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
