use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entity not found under key {0}")]
    EntityNotFound(String),

    #[error("corrupt entity in bucket {bucket}: {reason}")]
    Corrupt {
        bucket: &'static str,
        reason: String,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Not-found error for a raw storage key.
    pub fn not_found(key: &[u8]) -> Self {
        Self::EntityNotFound(hex::encode(key))
    }
}
