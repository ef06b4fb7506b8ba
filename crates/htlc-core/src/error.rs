//! Error taxonomy for HTLC payments.

use thiserror::Error;

use crate::crypto::PaymentHash;
use crate::models::{HtlcStatus, Rail};
use crate::rail::RailError;

/// Errors surfaced by the payment service, store and claim orchestrator
#[derive(Debug, Error)]
pub enum HtlcError {
    #[error("Invalid preimage length: expected {expected} bytes, got {actual}")]
    InvalidPreimageLength { expected: usize, actual: usize },

    #[error("Invalid preimage: does not match payment hash {0}")]
    InvalidPreimage(PaymentHash),

    #[error("Duplicate commitment on {rail}: payment hash {payment_hash} is already in flight")]
    DuplicateCommitment {
        rail: Rail,
        payment_hash: PaymentHash,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTLC {payment_hash} is already terminal ({status:?})")]
    AlreadyTerminal {
        payment_hash: PaymentHash,
        status: HtlcStatus,
    },

    #[error("A claim for {0} is already in progress")]
    ClaimInProgress(PaymentHash),

    #[error("Settlement on {rail} failed for {payment_hash}: {source}")]
    RailSettlementError {
        rail: Rail,
        payment_hash: PaymentHash,
        #[source]
        source: RailError,
    },

    #[error("{rail} rail error: {source}")]
    Rail {
        rail: Rail,
        #[source]
        source: RailError,
    },

    #[error("{0} rail is not ready: no client attached")]
    NotReady(Rail),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl HtlcError {
    /// Whether a caller may retry the same operation and expect a different outcome
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RailSettlementError { source, .. } | Self::Rail { source, .. } => {
                !source.is_permanent()
            }
            Self::NotReady(_) | Self::InvalidPreimage(_) | Self::ClaimInProgress(_) => true,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for HtlcError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for HtlcError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
