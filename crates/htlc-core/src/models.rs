//! Payment data model and request/response shapes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::crypto::{PaymentHash, Preimage};

/// Settlement rail a payment moves over
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    /// Native Spark ledger transfer
    Spark,
    /// Lightning invoice
    Lightning,
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rail::Spark => write!(f, "spark"),
            Rail::Lightning => write!(f, "lightning"),
        }
    }
}

/// Payment identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    /// Create a new random payment ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Send,
    Receive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// HTLC state, shared by both rails
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcStatus {
    /// Funds committed, preimage not yet revealed
    WaitingForPreimage,
    /// Preimage revealed and validated, funds released to the claimer
    Claimed,
    /// Expired without a valid claim, funds returned to the sender
    Refunded,
    /// The rail reported a hard failure
    Failed,
}

impl HtlcStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, HtlcStatus::WaitingForPreimage)
    }

    /// Payment-level status implied by this HTLC status
    pub fn payment_status(self) -> PaymentStatus {
        match self {
            HtlcStatus::WaitingForPreimage => PaymentStatus::Pending,
            HtlcStatus::Claimed => PaymentStatus::Completed,
            HtlcStatus::Refunded | HtlcStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// Hash lock attached to a payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcDetails {
    pub payment_hash: PaymentHash,
    /// Set only once a valid preimage has been revealed
    pub preimage: Option<Preimage>,
    /// Unix seconds after which the lock can be refunded
    pub expiry_time: u64,
    pub status: HtlcStatus,
}

impl HtlcDetails {
    pub fn waiting(payment_hash: PaymentHash, expiry_time: u64) -> Self {
        Self {
            payment_hash,
            preimage: None,
            expiry_time,
            status: HtlcStatus::WaitingForPreimage,
        }
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expiry_time
    }
}

/// When a hash lock expires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcExpiry {
    /// Seconds from the moment the send is committed
    DurationSecs(u64),
    /// Absolute unix time in seconds
    At(u64),
}

/// Conditional-send options: commit funds under `payment_hash` instead of unconditionally
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcOptions {
    pub payment_hash: PaymentHash,
    pub expiry: HtlcExpiry,
}

impl HtlcOptions {
    pub fn with_duration(payment_hash: PaymentHash, expiry_duration_secs: u64) -> Self {
        Self {
            payment_hash,
            expiry: HtlcExpiry::DurationSecs(expiry_duration_secs),
        }
    }
}

/// State of a token conversion attached to a Spark payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Completed,
    RefundNeeded,
    Refunded,
}

/// Rail-specific payment details
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum PaymentDetails {
    Spark {
        /// Ledger transfer id, once the ledger accepted the transfer
        transfer_id: Option<String>,
        /// Counterparty Spark address
        address: Option<String>,
        htlc_details: Option<HtlcDetails>,
        /// Token conversion outcome. Set by the host's conversion flow when it
        /// records the payment; this crate keeps it and filters on it.
        conversion_status: Option<ConversionStatus>,
    },
    Lightning {
        invoice: String,
        description: Option<String>,
        htlc_details: Option<HtlcDetails>,
        /// Preimage received through an LNURL flow. Set by the host's LNURL
        /// handling when it records the payment; this crate keeps it and filters on it.
        lnurl_preimage: Option<String>,
        /// The payer has locked funds against the hold invoice
        accepted: bool,
    },
}

impl PaymentDetails {
    pub fn rail(&self) -> Rail {
        match self {
            PaymentDetails::Spark { .. } => Rail::Spark,
            PaymentDetails::Lightning { .. } => Rail::Lightning,
        }
    }

    pub fn htlc_details(&self) -> Option<&HtlcDetails> {
        match self {
            PaymentDetails::Spark { htlc_details, .. }
            | PaymentDetails::Lightning { htlc_details, .. } => htlc_details.as_ref(),
        }
    }

    pub fn htlc_details_mut(&mut self) -> Option<&mut HtlcDetails> {
        match self {
            PaymentDetails::Spark { htlc_details, .. }
            | PaymentDetails::Lightning { htlc_details, .. } => htlc_details.as_mut(),
        }
    }
}

/// A send or receive on one rail
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub amount: u64,
    pub fees: u64,
    /// Creation time, unix seconds
    pub timestamp: u64,
    pub details: PaymentDetails,
}

impl Payment {
    pub fn rail(&self) -> Rail {
        self.details.rail()
    }

    pub fn htlc_details(&self) -> Option<&HtlcDetails> {
        self.details.htlc_details()
    }

    pub fn payment_hash(&self) -> Option<PaymentHash> {
        self.htlc_details().map(|h| h.payment_hash)
    }

    pub fn htlc_status(&self) -> Option<HtlcStatus> {
        self.htlc_details().map(|h| h.status)
    }

    /// Whether a local claim can release this payment's lock.
    ///
    /// Lightning sends learn their preimage from the network instead.
    pub fn is_claimable_locally(&self) -> bool {
        match self.details {
            PaymentDetails::Spark { .. } => self.htlc_details().is_some(),
            PaymentDetails::Lightning { .. } => {
                self.payment_type == PaymentType::Receive && self.htlc_details().is_some()
            }
        }
    }
}

/// Who carries the fee on a send
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePolicy {
    /// Fee is paid on top of the amount
    #[default]
    FeesExcluded,
    /// Fee is taken out of the amount
    FeesIncluded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareSendPaymentRequest {
    /// Spark address or BOLT11 invoice
    pub payment_request: String,
    /// Required for Spark addresses and amountless invoices
    pub amount: Option<u64>,
    pub fee_policy: Option<FeePolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendPaymentMethod {
    SparkAddress {
        address: String,
        fee: u64,
    },
    Bolt11Invoice {
        invoice: String,
        payment_hash: PaymentHash,
        expiry_time: u64,
        fee: u64,
    },
}

impl SendPaymentMethod {
    pub fn rail(&self) -> Rail {
        match self {
            SendPaymentMethod::SparkAddress { .. } => Rail::Spark,
            SendPaymentMethod::Bolt11Invoice { .. } => Rail::Lightning,
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            SendPaymentMethod::SparkAddress { fee, .. }
            | SendPaymentMethod::Bolt11Invoice { fee, .. } => *fee,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareSendPaymentResponse {
    pub payment_method: SendPaymentMethod,
    /// Amount the receiver gets
    pub amount: u64,
    pub fee_policy: FeePolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPaymentOptions {
    pub htlc_options: Option<HtlcOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPaymentRequest {
    pub prepare_response: PrepareSendPaymentResponse,
    pub options: Option<SendPaymentOptions>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPaymentResponse {
    pub payment: Payment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceivePaymentMethod {
    SparkAddress,
    Bolt11Invoice {
        description: String,
        amount_sats: Option<u64>,
        expiry_secs: Option<u32>,
        /// Caller-chosen hash; turns the invoice into a hold invoice
        payment_hash: Option<PaymentHash>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePaymentRequest {
    pub payment_method: ReceivePaymentMethod,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePaymentResponse {
    pub payment_request: String,
    pub fee: u64,
    /// Set when the receive created a tracked HTLC record
    pub payment_id: Option<PaymentId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimHtlcPaymentRequest {
    /// Hex-encoded 32-byte preimage
    pub preimage: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimHtlcPaymentResponse {
    pub payment: Payment,
}

/// Per-rail predicate over payment details
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum PaymentDetailsFilter {
    Spark {
        htlc_status: Option<Vec<HtlcStatus>>,
        conversion_refund_needed: Option<bool>,
    },
    Lightning {
        htlc_status: Option<Vec<HtlcStatus>>,
        has_lnurl_preimage: Option<bool>,
    },
}

impl PaymentDetailsFilter {
    pub fn rail(&self) -> Rail {
        match self {
            PaymentDetailsFilter::Spark { .. } => Rail::Spark,
            PaymentDetailsFilter::Lightning { .. } => Rail::Lightning,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPaymentsRequest {
    pub type_filter: Option<Vec<PaymentType>>,
    pub status_filter: Option<Vec<PaymentStatus>>,
    /// Union of per-rail filters
    pub payment_details_filter: Option<Vec<PaymentDetailsFilter>>,
    /// Inclusive lower bound on creation time
    pub from_timestamp: Option<u64>,
    /// Exclusive upper bound on creation time
    pub to_timestamp: Option<u64>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
    /// Insertion order when true or unset
    pub sort_ascending: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPaymentsResponse {
    pub payments: Vec<Payment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPaymentRequest {
    pub payment_id: PaymentId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPaymentResponse {
    pub payment: Payment,
}
