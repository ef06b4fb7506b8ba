//! Collaborator traits for the ledger and the Lightning node.

use crate::crypto::{PaymentHash, Preimage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a rail collaborator
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RailError {
    #[error("Not found on rail: {0}")]
    NotFound(String),

    #[error("Rail rejected the preimage")]
    InvalidPreimage,

    #[error("Already settled")]
    AlreadySettled,

    #[error("Lock expired")]
    Expired,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl RailError {
    /// A hard failure the rail will never recover from for this lock.
    ///
    /// Anything else leaves the HTLC claimable and the call may be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RailError::InvalidPreimage | RailError::Rejected(_))
    }

    /// The call may have taken effect on the rail before this error surfaced
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, RailError::Timeout(_) | RailError::Network(_))
    }
}

/// Invoice fields the adapter needs before paying
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInvoice {
    pub payment_hash: PaymentHash,
    pub amount_sats: Option<u64>,
    /// Unix seconds
    pub expiry_time: u64,
}

/// Invoice state changes pushed by the Lightning node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvoiceEvent {
    /// The payer locked funds against a hold invoice
    Accepted {
        payment_hash: PaymentHash,
        amount_sats: u64,
    },
    /// An outgoing payment completed and revealed its preimage
    Settled {
        payment_hash: PaymentHash,
        preimage: Preimage,
    },
    /// The invoice or outgoing HTLC expired without settlement
    Expired { payment_hash: PaymentHash },
}

/// Locked-transfer notifications pushed by the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Someone sent us funds under a hash lock
    LockedTransferReceived {
        transfer_id: String,
        sender: String,
        payment_hash: PaymentHash,
        amount_sats: u64,
        expiry_time: u64,
    },
    /// A locked transfer went back to its sender
    LockedTransferReturned {
        transfer_id: String,
        payment_hash: PaymentHash,
    },
}

/// Native ledger operations used by the Spark rail
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address other parties send to
    async fn receive_address(&self) -> Result<String, RailError>;

    /// Unconditional transfer, returns the transfer id
    async fn transfer(&self, receiver: &str, amount_sats: u64) -> Result<String, RailError>;

    /// Lock funds under `payment_hash` until `expiry_time`, returns the transfer id
    async fn submit_locked_transfer(
        &self,
        receiver: &str,
        payment_hash: &PaymentHash,
        amount_sats: u64,
        expiry_time: u64,
    ) -> Result<String, RailError>;

    /// Release a locked transfer by revealing its preimage
    async fn release_locked_transfer(
        &self,
        transfer_id: &str,
        preimage: &Preimage,
    ) -> Result<(), RailError>;

    /// Id of our own still-locked transfer under `payment_hash`, if the ledger holds one
    async fn find_outgoing_lock(&self, payment_hash: &PaymentHash)
        -> Result<Option<String>, RailError>;
}

/// Lightning node operations used by the Lightning rail
#[async_trait]
pub trait LightningNodeClient: Send + Sync {
    /// Create a hold invoice for a caller-supplied payment hash
    async fn create_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        description: &str,
    ) -> Result<String, RailError>;

    /// Create a regular invoice whose preimage the node manages
    async fn create_invoice(
        &self,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        description: &str,
    ) -> Result<String, RailError>;

    /// Reveal the preimage and release the held HTLC
    async fn settle_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        preimage: &Preimage,
    ) -> Result<(), RailError>;

    async fn decode_invoice(&self, invoice: &str) -> Result<DecodedInvoice, RailError>;

    /// Routing fee estimate in sats
    async fn estimate_fee(&self, invoice: &str, amount_sats: u64) -> Result<u64, RailError>;

    /// Pay an invoice, returns the node's payment id
    async fn pay_invoice(&self, invoice: &str, amount_sats: u64) -> Result<String, RailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failures() {
        assert!(RailError::InvalidPreimage.is_permanent());
        assert!(RailError::Rejected("bad lock".into()).is_permanent());
        assert!(!RailError::Expired.is_permanent());
        assert!(!RailError::Timeout(Duration::from_secs(1)).is_permanent());
        assert!(!RailError::Network("reset".into()).is_permanent());
    }

    #[test]
    fn test_indeterminate_failures() {
        assert!(RailError::Timeout(Duration::from_secs(1)).is_indeterminate());
        assert!(RailError::Network("reset".into()).is_indeterminate());
        assert!(!RailError::InsufficientFunds.is_indeterminate());
        assert!(!RailError::Rejected("no".into()).is_indeterminate());
    }

    #[test]
    fn test_invoice_event_serialization() {
        let hash = Preimage::from_bytes([0x22; 32]).payment_hash();
        let event = InvoiceEvent::Expired { payment_hash: hash };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "expired");
        assert_eq!(json["payment_hash"], hash.to_hex());
    }
}
