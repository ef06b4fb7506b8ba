//! `PaymentService`: the public operations over both rails.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::claim::{ClaimOrchestrator, RailResolver};
use crate::clock::Clock;
use crate::config::HtlcConfig;
use crate::crypto::{PaymentHash, Preimage};
use crate::error::HtlcError;
use crate::models::{
    ClaimHtlcPaymentRequest, ClaimHtlcPaymentResponse, GetPaymentRequest, GetPaymentResponse,
    ListPaymentsRequest, ListPaymentsResponse, Payment, PrepareSendPaymentRequest,
    PrepareSendPaymentResponse, Rail, ReceivePaymentMethod, ReceivePaymentRequest,
    ReceivePaymentResponse, SendPaymentRequest, SendPaymentResponse,
};
use crate::rail::{
    detect_rail, InvoiceEvent, LedgerClient, LedgerEvent, LightningNodeClient, LightningRail,
    RailAdapter, SparkRail,
};
use crate::store::PaymentStore;
use crate::sweep::ExpirySweep;

/// Rail adapters attached so far
#[derive(Default)]
struct Rails {
    spark: RwLock<Option<Arc<SparkRail>>>,
    lightning: RwLock<Option<Arc<LightningRail>>>,
}

impl Rails {
    fn spark(&self) -> Result<Arc<SparkRail>, HtlcError> {
        read_slot(&self.spark).ok_or(HtlcError::NotReady(Rail::Spark))
    }

    fn lightning(&self) -> Result<Arc<LightningRail>, HtlcError> {
        read_slot(&self.lightning).ok_or(HtlcError::NotReady(Rail::Lightning))
    }
}

fn read_slot<T>(slot: &RwLock<Option<Arc<T>>>) -> Option<Arc<T>> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_slot<T>(slot: &RwLock<Option<Arc<T>>>, value: Arc<T>) {
    let mut guard = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(value);
}

impl RailResolver for Rails {
    fn adapter(&self, rail: Rail) -> Result<Arc<dyn RailAdapter>, HtlcError> {
        match rail {
            Rail::Spark => Ok(self.spark()?),
            Rail::Lightning => Ok(self.lightning()?),
        }
    }
}

/// Send, receive, claim and query HTLC payments over the Spark and Lightning rails.
///
/// Rail collaborators may be attached after construction; until one is, every
/// operation that needs it fails fast with `NotReady`.
pub struct PaymentService {
    config: HtlcConfig,
    clock: Arc<dyn Clock>,
    store: Arc<PaymentStore>,
    rails: Rails,
    claims: ClaimOrchestrator,
}

impl PaymentService {
    pub fn new(config: HtlcConfig, clock: Arc<dyn Clock>, store: Arc<PaymentStore>) -> Self {
        let claims = ClaimOrchestrator::new(store.clone(), config.rail_timeout());
        Self {
            config,
            clock,
            store,
            rails: Rails::default(),
            claims,
        }
    }

    /// A service whose payments survive restarts in a SQLite log at `path`
    pub fn open(
        config: HtlcConfig,
        clock: Arc<dyn Clock>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, HtlcError> {
        let store = Arc::new(PaymentStore::open(path)?);
        Ok(Self::new(config, clock, store))
    }

    pub fn attach_ledger(&self, client: Arc<dyn LedgerClient>) {
        let rail = SparkRail::new(
            client,
            self.store.clone(),
            self.clock.clone(),
            self.config.rail_timeout(),
        );
        write_slot(&self.rails.spark, Arc::new(rail));
        info!("Spark rail attached");
    }

    pub fn attach_lightning(&self, client: Arc<dyn LightningNodeClient>) {
        let rail = LightningRail::new(
            client,
            self.store.clone(),
            self.clock.clone(),
            self.config.rail_timeout(),
            self.config.default_invoice_expiry_secs,
        );
        write_slot(&self.rails.lightning, Arc::new(rail));
        info!("Lightning rail attached");
    }

    pub fn config(&self) -> &HtlcConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<PaymentStore> {
        &self.store
    }

    pub async fn prepare_send_payment(
        &self,
        request: PrepareSendPaymentRequest,
    ) -> Result<PrepareSendPaymentResponse, HtlcError> {
        let rail = detect_rail(&request.payment_request)?;
        self.rails.adapter(rail)?.prepare_send(&request).await
    }

    pub async fn send_payment(
        &self,
        request: SendPaymentRequest,
    ) -> Result<SendPaymentResponse, HtlcError> {
        let rail = request.prepare_response.payment_method.rail();
        let htlc_options = request.options.and_then(|o| o.htlc_options);
        let payment = self
            .rails
            .adapter(rail)?
            .commit_send(&request.prepare_response, htlc_options.as_ref())
            .await?;
        Ok(SendPaymentResponse { payment })
    }

    pub async fn receive_payment(
        &self,
        request: ReceivePaymentRequest,
    ) -> Result<ReceivePaymentResponse, HtlcError> {
        let rail = match request.payment_method {
            ReceivePaymentMethod::SparkAddress => Rail::Spark,
            ReceivePaymentMethod::Bolt11Invoice { .. } => Rail::Lightning,
        };
        self.rails
            .adapter(rail)?
            .prepare_receive(&request.payment_method)
            .await
    }

    /// Claim whichever HTLC the preimage unlocks
    pub async fn claim_htlc_payment(
        &self,
        request: ClaimHtlcPaymentRequest,
    ) -> Result<ClaimHtlcPaymentResponse, HtlcError> {
        let preimage = Preimage::from_hex(&request.preimage)?;
        let payment = self.claim(preimage.payment_hash(), &preimage).await?;
        Ok(ClaimHtlcPaymentResponse { payment })
    }

    pub async fn claim(
        &self,
        payment_hash: PaymentHash,
        preimage: &Preimage,
    ) -> Result<Payment, HtlcError> {
        self.claims.claim(&self.rails, payment_hash, preimage).await
    }

    pub fn list_payments(&self, request: &ListPaymentsRequest) -> ListPaymentsResponse {
        ListPaymentsResponse {
            payments: self.store.list(request),
        }
    }

    pub fn get_payment(&self, request: &GetPaymentRequest) -> Result<GetPaymentResponse, HtlcError> {
        Ok(GetPaymentResponse {
            payment: self.store.get(&request.payment_id)?,
        })
    }

    /// Sweep at the service clock's current time
    pub fn sweep_now(&self) -> Result<Vec<Payment>, HtlcError> {
        self.sweep(self.clock.now_secs())
    }

    /// Apply a state change pushed by the Lightning node
    pub fn handle_invoice_event(&self, event: &InvoiceEvent) -> Result<Option<Payment>, HtlcError> {
        debug!("Invoice event: {event:?}");
        match event {
            InvoiceEvent::Accepted {
                payment_hash,
                amount_sats,
            } => self.store.mark_accepted(payment_hash, *amount_sats),
            InvoiceEvent::Settled {
                payment_hash,
                preimage,
            } => self
                .store
                .record_preimage(Rail::Lightning, payment_hash, preimage),
            InvoiceEvent::Expired { payment_hash } => {
                self.store.refund(Rail::Lightning, payment_hash)
            }
        }
    }

    /// Apply a notification pushed by the ledger
    pub fn handle_ledger_event(&self, event: &LedgerEvent) -> Result<Option<Payment>, HtlcError> {
        debug!("Ledger event: {event:?}");
        match event {
            LedgerEvent::LockedTransferReceived { .. } => self.rails.spark()?.record_incoming(event),
            LedgerEvent::LockedTransferReturned {
                transfer_id,
                payment_hash,
            } => self.store.refund_transfer(transfer_id, payment_hash),
        }
    }
}

impl ExpirySweep for PaymentService {
    fn sweep(&self, now_secs: u64) -> Result<Vec<Payment>, HtlcError> {
        self.store.expire_due(now_secs)
    }
}
