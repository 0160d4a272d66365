use realm_store::StoreError;
use realm_types::{RealityId, TransferOutputReference};

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by transfer booking.
///
/// All errors are returned to the caller; nothing is retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("missing input {0} in transfer")]
    MissingInput(TransferOutputReference),

    #[error("input {input} lives in reality {owner:?}, unreachable from {booking:?}")]
    InputNotInReality {
        input: TransferOutputReference,
        owner: RealityId,
        booking: RealityId,
    },

    #[error("the per-color balance changes of the transfer do not sum to zero")]
    UnbalancedTransfer,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("elevation failed: {0}")]
    Elevation(String),
}
