//! Spark rail: ledger transfers, optionally locked under a payment hash.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{LedgerClient, LedgerEvent, RailError};
use super::{bounded, resolve_expiry, RailAdapter};
use crate::clock::Clock;
use crate::crypto::Preimage;
use crate::error::HtlcError;
use crate::models::{
    FeePolicy, HtlcDetails, HtlcOptions, Payment, PaymentDetails, PaymentId, PaymentStatus,
    PaymentType, PrepareSendPaymentRequest, PrepareSendPaymentResponse, Rail,
    ReceivePaymentMethod, ReceivePaymentResponse, SendPaymentMethod,
};
use crate::store::PaymentStore;

pub struct SparkRail {
    client: Arc<dyn LedgerClient>,
    store: Arc<PaymentStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SparkRail {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        store: Arc<PaymentStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            timeout,
        }
    }

    fn rail_error(source: RailError) -> HtlcError {
        HtlcError::Rail {
            rail: Rail::Spark,
            source,
        }
    }

    /// Ledger transfer behind `payment`, asking the ledger when the commit went unconfirmed
    async fn transfer_id(&self, payment: &Payment) -> Result<String, RailError> {
        let PaymentDetails::Spark { transfer_id, .. } = &payment.details else {
            return Err(RailError::NotFound(format!(
                "payment {} is not a Spark transfer",
                payment.id
            )));
        };
        if let Some(transfer_id) = transfer_id {
            return Ok(transfer_id.clone());
        }

        let payment_hash = payment.payment_hash().ok_or_else(|| {
            RailError::NotFound(format!("payment {} carries no hash lock", payment.id))
        })?;
        let found = bounded(self.timeout, self.client.find_outgoing_lock(&payment_hash))
            .await?
            .ok_or_else(|| RailError::NotFound(format!("no ledger lock under {payment_hash}")))?;
        if let Err(e) = self.store.confirm_transfer(&payment.id, &found) {
            warn!("Transfer {found} not attached to payment {}: {e}", payment.id);
        }
        Ok(found)
    }

    /// Record a locked transfer a counterparty sent us as a claimable receive
    pub fn record_incoming(&self, event: &LedgerEvent) -> Result<Option<Payment>, HtlcError> {
        let LedgerEvent::LockedTransferReceived {
            transfer_id,
            sender,
            payment_hash,
            amount_sats,
            expiry_time,
        } = event
        else {
            return Ok(None);
        };
        if let Some(known) = self.store.find_by_transfer_id(transfer_id) {
            debug!("Locked transfer {transfer_id} already recorded as {}", known.id);
            return Ok(None);
        }

        let payment = self.store.insert(Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Receive,
            status: PaymentStatus::Pending,
            amount: *amount_sats,
            fees: 0,
            timestamp: self.clock.now_secs(),
            details: PaymentDetails::Spark {
                transfer_id: Some(transfer_id.clone()),
                address: Some(sender.clone()),
                htlc_details: Some(HtlcDetails::waiting(*payment_hash, *expiry_time)),
                conversion_status: None,
            },
        })?;
        info!(
            "Locked transfer {transfer_id} received under {payment_hash} (payment {})",
            payment.id
        );
        Ok(Some(payment))
    }
}

#[async_trait]
impl RailAdapter for SparkRail {
    fn rail(&self) -> Rail {
        Rail::Spark
    }

    async fn prepare_send(
        &self,
        request: &PrepareSendPaymentRequest,
    ) -> Result<PrepareSendPaymentResponse, HtlcError> {
        let amount = request.amount.ok_or_else(|| {
            HtlcError::InvalidInput("amount is required for Spark address payments".to_string())
        })?;
        if amount == 0 {
            return Err(HtlcError::InvalidInput("amount must be greater than 0".to_string()));
        }

        // Ledger transfers carry no fee, so both policies send the full amount
        Ok(PrepareSendPaymentResponse {
            payment_method: SendPaymentMethod::SparkAddress {
                address: request.payment_request.trim().to_string(),
                fee: 0,
            },
            amount,
            fee_policy: request.fee_policy.unwrap_or(FeePolicy::FeesExcluded),
        })
    }

    async fn commit_send(
        &self,
        prepared: &PrepareSendPaymentResponse,
        htlc_options: Option<&HtlcOptions>,
    ) -> Result<Payment, HtlcError> {
        let SendPaymentMethod::SparkAddress { address, fee } = &prepared.payment_method else {
            return Err(HtlcError::InvalidInput(
                "Spark rail can only send to a Spark address".to_string(),
            ));
        };
        let now = self.clock.now_secs();

        let Some(options) = htlc_options else {
            let transfer_id = bounded(self.timeout, self.client.transfer(address, prepared.amount))
                .await
                .map_err(Self::rail_error)?;
            debug!("Spark transfer {transfer_id} to {address}");
            return self.store.insert(Payment {
                id: PaymentId::new(),
                payment_type: PaymentType::Send,
                status: PaymentStatus::Completed,
                amount: prepared.amount,
                fees: *fee,
                timestamp: now,
                details: PaymentDetails::Spark {
                    transfer_id: Some(transfer_id),
                    address: Some(address.clone()),
                    htlc_details: None,
                    conversion_status: None,
                },
            });
        };

        let expiry_time = resolve_expiry(options.expiry, now)?;
        let reservation =
            self.store
                .reserve_commitment(Rail::Spark, PaymentType::Send, options.payment_hash)?;

        let submitted = bounded(
            self.timeout,
            self.client.submit_locked_transfer(
                address,
                &options.payment_hash,
                prepared.amount,
                expiry_time,
            ),
        )
        .await;
        // An indeterminate failure may still have locked the funds, so the
        // send is recorded without a transfer id and keeps its slot
        let (transfer_id, unconfirmed) = match submitted {
            Ok(transfer_id) => (Some(transfer_id), None),
            Err(e) if e.is_indeterminate() => (None, Some(e)),
            Err(e) => return Err(Self::rail_error(e)),
        };

        let payment = reservation.commit(Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Send,
            status: PaymentStatus::Pending,
            amount: prepared.amount,
            fees: *fee,
            timestamp: now,
            details: PaymentDetails::Spark {
                transfer_id,
                address: Some(address.clone()),
                htlc_details: Some(HtlcDetails::waiting(options.payment_hash, expiry_time)),
                conversion_status: None,
            },
        })?;
        if let Some(source) = unconfirmed {
            warn!(
                "Locked transfer under {} unconfirmed ({source}), payment {} awaits reconciliation",
                options.payment_hash, payment.id
            );
            return Err(Self::rail_error(source));
        }
        info!(
            "Locked {} sats to {address} under {} until {expiry_time} (payment {})",
            payment.amount, options.payment_hash, payment.id
        );
        Ok(payment)
    }

    async fn prepare_receive(
        &self,
        method: &ReceivePaymentMethod,
    ) -> Result<ReceivePaymentResponse, HtlcError> {
        match method {
            ReceivePaymentMethod::SparkAddress => {
                let address = bounded(self.timeout, self.client.receive_address())
                    .await
                    .map_err(Self::rail_error)?;
                Ok(ReceivePaymentResponse {
                    payment_request: address,
                    fee: 0,
                    payment_id: None,
                })
            }
            ReceivePaymentMethod::Bolt11Invoice { .. } => Err(HtlcError::InvalidInput(
                "Spark rail cannot issue invoices".to_string(),
            )),
        }
    }

    async fn settle(&self, payment: &Payment, preimage: &Preimage) -> Result<(), RailError> {
        let transfer_id = self.transfer_id(payment).await?;
        self.client
            .release_locked_transfer(&transfer_id, preimage)
            .await
    }
}
