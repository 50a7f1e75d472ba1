//! Error types for the observation archive.

use thiserror::Error;

/// Result type alias using ArchiveError.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Primary error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    // === Lookup errors ===
    #[error("not found: {0}")]
    NotFound(String),

    // === Invariant violations ===
    #[error("consistency violation: {0}")]
    Consistency(String),

    // === Capability gaps ===
    #[error("not supported by this backend: {0}")]
    Unimplemented(String),

    // === Driver-level failures ===
    #[error("database error while executing `{statement}`: {message}")]
    Backend { statement: String, message: String },

    /// A unique-constraint violation. Kept distinct from `Backend` so the
    /// resolvers can treat it as "a concurrent writer just created the row".
    #[error("duplicate key while executing `{statement}`: {message}")]
    DuplicateKey { statement: String, message: String },

    // === Input errors ===
    #[error("invalid value: {0}")]
    Invalid(String),
}

impl ArchiveError {
    /// Build a `NotFound` error from a displayable subject.
    pub fn not_found(what: impl Into<String>) -> Self {
        ArchiveError::NotFound(what.into())
    }

    /// Build a `Consistency` error from a displayable message.
    pub fn consistency(msg: impl Into<String>) -> Self {
        ArchiveError::Consistency(msg.into())
    }

    /// True when the error is a unique-constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, ArchiveError::DuplicateKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_predicate() {
        let err = ArchiveError::DuplicateKey {
            statement: "INSERT INTO station ...".to_string(),
            message: "UNIQUE constraint failed".to_string(),
        };
        assert!(err.is_duplicate_key());
        assert!(!ArchiveError::not_found("station 42").is_duplicate_key());
    }

    #[test]
    fn test_backend_error_carries_statement() {
        let err = ArchiveError::Backend {
            statement: "SELECT id FROM levtr".to_string(),
            message: "connection reset".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("SELECT id FROM levtr"));
        assert!(text.contains("connection reset"));
    }
}
