//! Error types for port operations.

/// Document store errors with context for debugging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Document or resource not found - includes entity type and id.
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Resource is already present.
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },

    /// The host refused the write (permissions, validation).
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The host did not answer in time.
    #[error("Timed out during {operation}")]
    Timeout { operation: &'static str },

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a NotFound error with entity type and id context.
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity_type: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn rejected(message: impl ToString) -> Self {
        Self::Rejected(message.to_string())
    }

    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }

    /// Check if this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
