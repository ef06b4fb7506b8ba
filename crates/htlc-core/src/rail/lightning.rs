//! Lightning rail: hold invoices under caller-chosen hashes and invoice payments.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{LightningNodeClient, RailError};
use super::{bounded, RailAdapter};
use crate::clock::Clock;
use crate::crypto::Preimage;
use crate::error::HtlcError;
use crate::models::{
    FeePolicy, HtlcDetails, HtlcOptions, Payment, PaymentDetails, PaymentId, PaymentStatus,
    PaymentType, PrepareSendPaymentRequest, PrepareSendPaymentResponse, Rail,
    ReceivePaymentMethod, ReceivePaymentResponse, SendPaymentMethod,
};
use crate::store::PaymentStore;

pub struct LightningRail {
    client: Arc<dyn LightningNodeClient>,
    store: Arc<PaymentStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    default_invoice_expiry_secs: u64,
}

impl LightningRail {
    pub fn new(
        client: Arc<dyn LightningNodeClient>,
        store: Arc<PaymentStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        default_invoice_expiry_secs: u64,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            timeout,
            default_invoice_expiry_secs,
        }
    }

    fn rail_error(source: RailError) -> HtlcError {
        HtlcError::Rail {
            rail: Rail::Lightning,
            source,
        }
    }
}

#[async_trait]
impl RailAdapter for LightningRail {
    fn rail(&self) -> Rail {
        Rail::Lightning
    }

    async fn prepare_send(
        &self,
        request: &PrepareSendPaymentRequest,
    ) -> Result<PrepareSendPaymentResponse, HtlcError> {
        let invoice = request.payment_request.trim();
        let decoded = bounded(self.timeout, self.client.decode_invoice(invoice))
            .await
            .map_err(Self::rail_error)?;

        if decoded.expiry_time <= self.clock.now_secs() {
            return Err(HtlcError::InvalidInput("invoice has expired".to_string()));
        }

        let fee_policy = request.fee_policy.unwrap_or_default();
        let requested = match (decoded.amount_sats, request.amount) {
            (Some(_), Some(_)) => {
                return Err(HtlcError::InvalidInput(
                    "invoice already carries an amount".to_string(),
                ))
            }
            (Some(_), None) if fee_policy == FeePolicy::FeesIncluded => {
                return Err(HtlcError::InvalidInput(
                    "fees cannot be included in a fixed-amount invoice".to_string(),
                ))
            }
            (Some(amount), None) | (None, Some(amount)) => amount,
            (None, None) => {
                return Err(HtlcError::InvalidInput(
                    "amount is required for amountless invoices".to_string(),
                ))
            }
        };
        if requested == 0 {
            return Err(HtlcError::InvalidInput("amount must be greater than 0".to_string()));
        }

        let fee = bounded(self.timeout, self.client.estimate_fee(invoice, requested))
            .await
            .map_err(Self::rail_error)?;
        let amount = match fee_policy {
            FeePolicy::FeesExcluded => requested,
            FeePolicy::FeesIncluded if fee < requested => requested - fee,
            FeePolicy::FeesIncluded => {
                return Err(HtlcError::InvalidInput(format!(
                    "fee {fee} exceeds amount {requested}"
                )))
            }
        };

        Ok(PrepareSendPaymentResponse {
            payment_method: SendPaymentMethod::Bolt11Invoice {
                invoice: invoice.to_string(),
                payment_hash: decoded.payment_hash,
                expiry_time: decoded.expiry_time,
                fee,
            },
            amount,
            fee_policy,
        })
    }

    async fn commit_send(
        &self,
        prepared: &PrepareSendPaymentResponse,
        htlc_options: Option<&HtlcOptions>,
    ) -> Result<Payment, HtlcError> {
        let SendPaymentMethod::Bolt11Invoice {
            invoice,
            payment_hash,
            expiry_time,
            fee,
        } = &prepared.payment_method
        else {
            return Err(HtlcError::InvalidInput(
                "Lightning rail can only pay an invoice".to_string(),
            ));
        };
        if htlc_options.is_some() {
            return Err(HtlcError::InvalidInput(
                "an invoice already fixes its payment hash and expiry".to_string(),
            ));
        }
        let now = self.clock.now_secs();
        if *expiry_time <= now {
            return Err(HtlcError::InvalidInput("invoice has expired".to_string()));
        }

        let reservation =
            self.store
                .reserve_commitment(Rail::Lightning, PaymentType::Send, *payment_hash)?;
        let unconfirmed =
            match bounded(self.timeout, self.client.pay_invoice(invoice, prepared.amount)).await {
                Ok(node_payment_id) => {
                    debug!("Node accepted payment {node_payment_id} for {payment_hash}");
                    None
                }
                // The HTLC may be in flight; its settle or expiry event resolves the record
                Err(e) if e.is_indeterminate() => Some(e),
                Err(e) => return Err(Self::rail_error(e)),
            };

        let payment = reservation.commit(Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Send,
            status: PaymentStatus::Pending,
            amount: prepared.amount,
            fees: *fee,
            timestamp: now,
            details: PaymentDetails::Lightning {
                invoice: invoice.clone(),
                description: None,
                htlc_details: Some(HtlcDetails::waiting(*payment_hash, *expiry_time)),
                lnurl_preimage: None,
                accepted: false,
            },
        })?;
        if let Some(source) = unconfirmed {
            warn!(
                "Payment under {payment_hash} unconfirmed ({source}), payment {} awaits the node",
                payment.id
            );
            return Err(Self::rail_error(source));
        }
        info!("Paying invoice under {payment_hash} (payment {})", payment.id);
        Ok(payment)
    }

    async fn prepare_receive(
        &self,
        method: &ReceivePaymentMethod,
    ) -> Result<ReceivePaymentResponse, HtlcError> {
        let ReceivePaymentMethod::Bolt11Invoice {
            description,
            amount_sats,
            expiry_secs,
            payment_hash,
        } = method
        else {
            return Err(HtlcError::InvalidInput(
                "Lightning rail only issues invoices".to_string(),
            ));
        };

        let expiry_secs = match expiry_secs {
            Some(0) => {
                return Err(HtlcError::InvalidInput(
                    "invoice expiry must be greater than 0".to_string(),
                ))
            }
            Some(secs) => u64::from(*secs),
            None => self.default_invoice_expiry_secs,
        };

        let Some(payment_hash) = payment_hash else {
            let invoice = bounded(
                self.timeout,
                self.client.create_invoice(*amount_sats, expiry_secs, description),
            )
            .await
            .map_err(Self::rail_error)?;
            return Ok(ReceivePaymentResponse {
                payment_request: invoice,
                fee: 0,
                payment_id: None,
            });
        };

        let now = self.clock.now_secs();
        let reservation =
            self.store
                .reserve_commitment(Rail::Lightning, PaymentType::Receive, *payment_hash)?;
        let invoice = bounded(
            self.timeout,
            self.client
                .create_hold_invoice(payment_hash, *amount_sats, expiry_secs, description),
        )
        .await
        .map_err(Self::rail_error)?;

        let payment = reservation.commit(Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Receive,
            status: PaymentStatus::Pending,
            amount: amount_sats.unwrap_or_default(),
            fees: 0,
            timestamp: now,
            details: PaymentDetails::Lightning {
                invoice: invoice.clone(),
                description: Some(description.clone()),
                htlc_details: Some(HtlcDetails::waiting(*payment_hash, now + expiry_secs)),
                lnurl_preimage: None,
                accepted: false,
            },
        })?;
        info!("Hold invoice issued under {payment_hash} (payment {})", payment.id);

        Ok(ReceivePaymentResponse {
            payment_request: invoice,
            fee: 0,
            payment_id: Some(payment.id),
        })
    }

    async fn settle(&self, payment: &Payment, preimage: &Preimage) -> Result<(), RailError> {
        let payment_hash = payment
            .payment_hash()
            .ok_or_else(|| RailError::NotFound(format!("payment {} has no hold invoice", payment.id)))?;
        self.client.settle_hold_invoice(&payment_hash, preimage).await
    }
}
