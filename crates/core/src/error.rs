//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every layer (pure domain, stores, services) reports failures with this
/// taxonomy. Storage backends map their native errors onto it so callers can
/// tell retryable contention apart from deterministic rejections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A required piece of context (usually the tenant) is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A value failed validation (e.g. non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A stock decrease asked for more than is on hand.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A state machine was asked for a transition it does not allow.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A storage uniqueness constraint rejected the write.
    #[error("storage conflict: {0}")]
    StorageConflict(String),

    /// Lock contention or a failed compare-and-swap; the caller may retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A row belongs to a different tenant than the unit of work.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// A requested resource was not found (within the active tenant).
    #[error("not found")]
    NotFound,

    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StorageConflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn tenant_isolation(msg: impl Into<String>) -> Self {
        Self::TenantIsolation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Whether a caller can reasonably retry the same unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(DomainError::transient("lock").is_retryable());
        assert!(!DomainError::conflict("dup").is_retryable());
        assert!(!DomainError::insufficient_stock(6, 4).is_retryable());
    }

    #[test]
    fn insufficient_stock_message_names_both_sides() {
        let msg = DomainError::insufficient_stock(6, 4).to_string();
        assert_eq!(msg, "insufficient stock: requested 6, available 4");
    }
}
