//! Payment rails: collaborator traits, the two rail adapters, and mock / RPC collaborators.

mod lightning;
mod mock;
mod rpc;
mod spark;
mod traits;

pub use lightning::LightningRail;
pub use mock::{MockLedger, MockLightningNode};
pub use rpc::RpcLightningClient;
pub use spark::SparkRail;
pub use traits::{
    DecodedInvoice, InvoiceEvent, LedgerClient, LedgerEvent, LightningNodeClient, RailError,
};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::crypto::Preimage;
use crate::error::HtlcError;
use crate::models::{
    HtlcExpiry, HtlcOptions, Payment, PrepareSendPaymentRequest, PrepareSendPaymentResponse, Rail,
    ReceivePaymentMethod, ReceivePaymentResponse,
};

/// Capabilities shared by the Spark and Lightning adapters
#[async_trait]
pub trait RailAdapter: Send + Sync {
    fn rail(&self) -> Rail;

    /// Resolve the destination, amount and fee of a send
    async fn prepare_send(
        &self,
        request: &PrepareSendPaymentRequest,
    ) -> Result<PrepareSendPaymentResponse, HtlcError>;

    /// Commit funds on the rail and record the payment
    async fn commit_send(
        &self,
        prepared: &PrepareSendPaymentResponse,
        htlc_options: Option<&HtlcOptions>,
    ) -> Result<Payment, HtlcError>;

    /// Produce a payment request; hash-locked receives are recorded
    async fn prepare_receive(
        &self,
        method: &ReceivePaymentMethod,
    ) -> Result<ReceivePaymentResponse, HtlcError>;

    /// Release the payment's lock by revealing `preimage`
    async fn settle(&self, payment: &Payment, preimage: &Preimage) -> Result<(), RailError>;
}

/// Which rail a payment request string belongs to
pub fn detect_rail(payment_request: &str) -> Result<Rail, HtlcError> {
    let lower = payment_request.trim().to_ascii_lowercase();
    if lower.starts_with("spark") {
        Ok(Rail::Spark)
    } else if lower.starts_with("ln") {
        Ok(Rail::Lightning)
    } else {
        Err(HtlcError::InvalidInput(format!(
            "unrecognised payment request: {payment_request}"
        )))
    }
}

/// Absolute expiry of a new hash lock; zero durations and past instants are rejected
pub(crate) fn resolve_expiry(expiry: HtlcExpiry, now_secs: u64) -> Result<u64, HtlcError> {
    let expiry_time = match expiry {
        HtlcExpiry::DurationSecs(0) => {
            return Err(HtlcError::InvalidInput(
                "HTLC expiry duration must be greater than 0".to_string(),
            ))
        }
        HtlcExpiry::DurationSecs(secs) => now_secs.saturating_add(secs),
        HtlcExpiry::At(at) => at,
    };
    if expiry_time <= now_secs {
        return Err(HtlcError::InvalidInput(format!(
            "HTLC expiry {expiry_time} is not in the future"
        )));
    }
    Ok(expiry_time)
}

/// Bound a rail call; an elapsed timer is reported as a retryable rail error
pub(crate) async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, RailError>>,
) -> Result<T, RailError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RailError::Timeout(timeout)),
    }
}
