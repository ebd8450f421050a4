use harbor_store::StoreError;
use harbor_types::Amount;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient available balance: need {need}, have {available}")]
    InsufficientFunds { need: Amount, available: Amount },

    #[error("insufficient hold balance: need {need}, have {hold}")]
    InsufficientHold { need: Amount, hold: Amount },

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("balance overflow")]
    Overflow,

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
