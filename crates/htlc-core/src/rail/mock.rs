//! In-memory ledger and Lightning node for tests and demos.

use super::traits::{
    DecodedInvoice, InvoiceEvent, LedgerClient, LedgerEvent, LightningNodeClient, RailError,
};
use crate::clock::Clock;
use crate::crypto::{PaymentHash, Preimage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockState {
    Locked,
    Released,
    Returned,
}

#[derive(Clone, Debug)]
struct LockedTransfer {
    payment_hash: PaymentHash,
    /// Locked by us rather than by a counterparty
    outgoing: bool,
    amount_sats: u64,
    expiry_time: u64,
    state: LockState,
}

#[derive(Default)]
struct LedgerState {
    balance: u64,
    locks: HashMap<String, LockedTransfer>,
    /// Errors returned by the next release calls, oldest first
    injected_release_errors: VecDeque<RailError>,
}

/// In-memory Spark ledger
#[derive(Clone)]
pub struct MockLedger {
    address: String,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<LedgerState>>,
    release_calls: Arc<AtomicUsize>,
    latency: Duration,
    events: broadcast::Sender<LedgerEvent>,
}

impl MockLedger {
    /// Create a new mock ledger with initial balance
    pub fn new(initial_balance: u64, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address: format!("sparkrt1mock{}", Uuid::new_v4().simple()),
            clock,
            state: Arc::new(Mutex::new(LedgerState {
                balance: initial_balance,
                ..Default::default()
            })),
            release_calls: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
            events,
        }
    }

    /// Delay every release call, to widen race windows in tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self) -> u64 {
        self.state().balance
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of release calls that reached the ledger
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Make the next release call fail with `error`
    pub fn fail_next_release(&self, error: RailError) {
        self.state().injected_release_errors.push_back(error);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Simulate a counterparty locking funds to us under `payment_hash`
    pub fn receive_locked_transfer(
        &self,
        sender: &str,
        payment_hash: PaymentHash,
        amount_sats: u64,
        expiry_time: u64,
    ) -> LedgerEvent {
        let transfer_id = Uuid::new_v4().to_string();
        self.state().locks.insert(
            transfer_id.clone(),
            LockedTransfer {
                payment_hash,
                outgoing: false,
                amount_sats,
                expiry_time,
                state: LockState::Locked,
            },
        );
        let event = LedgerEvent::LockedTransferReceived {
            transfer_id,
            sender: sender.to_string(),
            payment_hash,
            amount_sats,
            expiry_time,
        };
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        event
    }

    /// Return expired locks to their sender and announce them
    pub fn return_expired(&self) -> Vec<LedgerEvent> {
        let now = self.clock.now_secs();
        let mut returned = Vec::new();
        {
            let mut state = self.state();
            let mut refund = 0;
            for (transfer_id, lock) in state.locks.iter_mut() {
                if lock.state == LockState::Locked && now >= lock.expiry_time {
                    lock.state = LockState::Returned;
                    if lock.outgoing {
                        refund += lock.amount_sats;
                    }
                    returned.push(LedgerEvent::LockedTransferReturned {
                        transfer_id: transfer_id.clone(),
                        payment_hash: lock.payment_hash,
                    });
                }
            }
            state.balance = state.balance.saturating_add(refund);
        }
        for event in &returned {
            let _ = self.events.send(event.clone());
        }
        returned
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn receive_address(&self) -> Result<String, RailError> {
        Ok(self.address.clone())
    }

    async fn transfer(&self, receiver: &str, amount_sats: u64) -> Result<String, RailError> {
        if !receiver.starts_with("spark") {
            return Err(RailError::InvalidRequest(format!("bad address {receiver}")));
        }
        let mut state = self.state();
        if state.balance < amount_sats {
            return Err(RailError::InsufficientFunds);
        }
        state.balance -= amount_sats;
        Ok(Uuid::new_v4().to_string())
    }

    async fn submit_locked_transfer(
        &self,
        receiver: &str,
        payment_hash: &PaymentHash,
        amount_sats: u64,
        expiry_time: u64,
    ) -> Result<String, RailError> {
        if !receiver.starts_with("spark") {
            return Err(RailError::InvalidRequest(format!("bad address {receiver}")));
        }
        if expiry_time <= self.clock.now_secs() {
            return Err(RailError::Expired);
        }

        let mut state = self.state();
        if state.balance < amount_sats {
            return Err(RailError::InsufficientFunds);
        }
        state.balance -= amount_sats;

        let transfer_id = Uuid::new_v4().to_string();
        state.locks.insert(
            transfer_id.clone(),
            LockedTransfer {
                payment_hash: *payment_hash,
                outgoing: true,
                amount_sats,
                expiry_time,
                state: LockState::Locked,
            },
        );
        Ok(transfer_id)
    }

    async fn release_locked_transfer(
        &self,
        transfer_id: &str,
        preimage: &Preimage,
    ) -> Result<(), RailError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state();
        if let Some(error) = state.injected_release_errors.pop_front() {
            return Err(error);
        }

        let now = self.clock.now_secs();
        let lock = state
            .locks
            .get_mut(transfer_id)
            .ok_or_else(|| RailError::NotFound(transfer_id.to_string()))?;

        match lock.state {
            LockState::Released => return Err(RailError::AlreadySettled),
            LockState::Returned => return Err(RailError::Expired),
            LockState::Locked => {}
        }
        if now >= lock.expiry_time {
            return Err(RailError::Expired);
        }
        if !lock.payment_hash.verify(preimage) {
            return Err(RailError::InvalidPreimage);
        }

        lock.state = LockState::Released;
        Ok(())
    }

    async fn find_outgoing_lock(
        &self,
        payment_hash: &PaymentHash,
    ) -> Result<Option<String>, RailError> {
        Ok(self
            .state()
            .locks
            .iter()
            .find(|(_, lock)| {
                lock.outgoing && lock.state == LockState::Locked && lock.payment_hash == *payment_hash
            })
            .map(|(transfer_id, _)| transfer_id.clone()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InvoiceState {
    /// Created, not yet paid
    Open,
    /// Funds locked, waiting for preimage
    Accepted,
    Settled,
    Cancelled,
}

#[derive(Clone, Debug)]
struct MockInvoice {
    payment_hash: PaymentHash,
    amount_sats: Option<u64>,
    expiry_time: u64,
    state: InvoiceState,
    /// Node-managed preimage for regular invoices
    preimage: Option<Preimage>,
}

#[derive(Default)]
struct NodeState {
    invoices: HashMap<String, MockInvoice>,
    by_hash: HashMap<PaymentHash, String>,
    outgoing: HashMap<PaymentHash, u64>,
}

/// In-memory Lightning node with hold invoice support
#[derive(Clone)]
pub struct MockLightningNode {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<NodeState>>,
    settle_calls: Arc<AtomicUsize>,
    fee_sats: u64,
    /// Delay between sending a payment and reporting it
    pay_ack_delay: Duration,
    events: broadcast::Sender<InvoiceEvent>,
}

impl MockLightningNode {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clock,
            state: Arc::new(Mutex::new(NodeState::default())),
            settle_calls: Arc::new(AtomicUsize::new(0)),
            fee_sats: 0,
            pay_ack_delay: Duration::ZERO,
            events,
        }
    }

    /// Flat routing fee reported by `estimate_fee`
    pub fn with_fee(mut self, fee_sats: u64) -> Self {
        self.fee_sats = fee_sats;
        self
    }

    /// Report outgoing payments only after `delay`, once they are already in flight
    pub fn with_pay_ack_delay(mut self, delay: Duration) -> Self {
        self.pay_ack_delay = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
        self.events.subscribe()
    }

    pub fn settle_calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }

    fn add_invoice(&self, invoice: MockInvoice) -> String {
        let bolt11 = format!(
            "lnbcrt{}mock1{}",
            invoice.amount_sats.unwrap_or_default(),
            invoice.payment_hash.to_hex()
        );
        let mut state = self.state();
        state.by_hash.insert(invoice.payment_hash, bolt11.clone());
        state.invoices.insert(bolt11.clone(), invoice);
        bolt11
    }

    /// An invoice issued by some other node, payable from this one
    pub fn register_remote_invoice(
        &self,
        payment_hash: PaymentHash,
        amount_sats: u64,
        expiry_time: u64,
    ) -> String {
        self.add_invoice(MockInvoice {
            payment_hash,
            amount_sats: Some(amount_sats),
            expiry_time,
            state: InvoiceState::Open,
            preimage: None,
        })
    }

    /// Simulate a payer locking funds against our invoice
    pub fn simulate_incoming_payment(&self, payment_hash: &PaymentHash) -> Result<(), RailError> {
        let amount_sats = {
            let mut state = self.state();
            let bolt11 = state
                .by_hash
                .get(payment_hash)
                .cloned()
                .ok_or_else(|| RailError::NotFound(payment_hash.to_string()))?;
            let invoice = state
                .invoices
                .get_mut(&bolt11)
                .ok_or_else(|| RailError::NotFound(bolt11.clone()))?;
            if self.clock.now_secs() >= invoice.expiry_time {
                return Err(RailError::Expired);
            }
            if invoice.state != InvoiceState::Open {
                return Err(RailError::InvalidRequest("invoice not open".to_string()));
            }
            invoice.state = InvoiceState::Accepted;
            invoice.amount_sats.unwrap_or_default()
        };

        let _ = self.events.send(InvoiceEvent::Accepted {
            payment_hash: *payment_hash,
            amount_sats,
        });
        Ok(())
    }

    /// Simulate the recipient of one of our payments revealing its preimage
    pub fn complete_outgoing(&self, preimage: &Preimage) -> Result<InvoiceEvent, RailError> {
        let payment_hash = preimage.payment_hash();
        if self.state().outgoing.remove(&payment_hash).is_none() {
            return Err(RailError::NotFound(payment_hash.to_string()));
        }
        let event = InvoiceEvent::Settled {
            payment_hash,
            preimage: preimage.clone(),
        };
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Cancel every open or accepted invoice past its expiry and announce it
    pub fn expire_invoices(&self) -> Vec<InvoiceEvent> {
        let now = self.clock.now_secs();
        let expired: Vec<InvoiceEvent> = {
            let mut state = self.state();
            state
                .invoices
                .values_mut()
                .filter(|i| {
                    matches!(i.state, InvoiceState::Open | InvoiceState::Accepted)
                        && now >= i.expiry_time
                })
                .map(|i| {
                    i.state = InvoiceState::Cancelled;
                    InvoiceEvent::Expired {
                        payment_hash: i.payment_hash,
                    }
                })
                .collect()
        };
        for event in &expired {
            let _ = self.events.send(event.clone());
        }
        expired
    }
}

#[async_trait]
impl LightningNodeClient for MockLightningNode {
    async fn create_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        _description: &str,
    ) -> Result<String, RailError> {
        if self.state().by_hash.contains_key(payment_hash) {
            return Err(RailError::InvalidRequest(format!(
                "invoice for {payment_hash} already exists"
            )));
        }
        Ok(self.add_invoice(MockInvoice {
            payment_hash: *payment_hash,
            amount_sats,
            expiry_time: self.clock.now_secs() + expiry_secs,
            state: InvoiceState::Open,
            preimage: None,
        }))
    }

    async fn create_invoice(
        &self,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        _description: &str,
    ) -> Result<String, RailError> {
        let preimage = Preimage::random();
        Ok(self.add_invoice(MockInvoice {
            payment_hash: preimage.payment_hash(),
            amount_sats,
            expiry_time: self.clock.now_secs() + expiry_secs,
            state: InvoiceState::Open,
            preimage: Some(preimage),
        }))
    }

    async fn settle_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        preimage: &Preimage,
    ) -> Result<(), RailError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        if !payment_hash.verify(preimage) {
            return Err(RailError::InvalidPreimage);
        }

        let mut state = self.state();
        let bolt11 = state
            .by_hash
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| RailError::NotFound(payment_hash.to_string()))?;
        let invoice = state
            .invoices
            .get_mut(&bolt11)
            .ok_or_else(|| RailError::NotFound(bolt11.clone()))?;

        match invoice.state {
            // Can't settle an invoice nobody paid yet
            InvoiceState::Open => Err(RailError::PaymentFailed(
                "invoice not yet paid".to_string(),
            )),
            InvoiceState::Accepted => {
                invoice.state = InvoiceState::Settled;
                Ok(())
            }
            InvoiceState::Settled => Err(RailError::AlreadySettled),
            InvoiceState::Cancelled => Err(RailError::Expired),
        }
    }

    async fn decode_invoice(&self, invoice: &str) -> Result<DecodedInvoice, RailError> {
        let state = self.state();
        let found = state
            .invoices
            .get(invoice)
            .ok_or_else(|| RailError::InvalidRequest(format!("unknown invoice {invoice}")))?;
        Ok(DecodedInvoice {
            payment_hash: found.payment_hash,
            amount_sats: found.amount_sats,
            expiry_time: found.expiry_time,
        })
    }

    async fn estimate_fee(&self, _invoice: &str, _amount_sats: u64) -> Result<u64, RailError> {
        Ok(self.fee_sats)
    }

    async fn pay_invoice(&self, invoice: &str, amount_sats: u64) -> Result<String, RailError> {
        {
            let mut state = self.state();
            let found = state
                .invoices
                .get_mut(invoice)
                .ok_or_else(|| RailError::InvalidRequest(format!("unknown invoice {invoice}")))?;
            if self.clock.now_secs() >= found.expiry_time {
                return Err(RailError::Expired);
            }
            if found.state != InvoiceState::Open {
                return Err(RailError::PaymentFailed("invoice not payable".to_string()));
            }
            found.state = InvoiceState::Accepted;
            let payment_hash = found.payment_hash;
            state.outgoing.insert(payment_hash, amount_sats);
        }
        if !self.pay_ack_delay.is_zero() {
            tokio::time::sleep(self.pay_ack_delay).await;
        }
        Ok(Uuid::new_v4().to_string())
    }
}
