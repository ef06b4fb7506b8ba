//! Claim orchestration: validate a preimage, settle on the rail, transition the record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::crypto::{verify, PaymentHash, Preimage};
use crate::error::HtlcError;
use crate::models::{HtlcStatus, Payment, Rail};
use crate::rail::{bounded, RailAdapter, RailError};
use crate::store::PaymentStore;

/// Looks up the adapter for a rail, failing with `NotReady` when none is attached
pub trait RailResolver: Send + Sync {
    fn adapter(&self, rail: Rail) -> Result<Arc<dyn RailAdapter>, HtlcError>;
}

type HashLocks = Mutex<HashMap<PaymentHash, Arc<AsyncMutex<()>>>>;

/// Serializes claims per payment hash and drives them through the store and rail
pub struct ClaimOrchestrator {
    store: Arc<PaymentStore>,
    locks: HashLocks,
    timeout: Duration,
}

/// One caller's hold on a per-hash lock entry; the entry goes away with its last holder
struct HashSlot<'a> {
    locks: &'a HashLocks,
    payment_hash: PaymentHash,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for HashSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Ours plus the map's
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.payment_hash);
        }
    }
}

impl ClaimOrchestrator {
    pub fn new(store: Arc<PaymentStore>, timeout: Duration) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn slot(&self, payment_hash: PaymentHash) -> HashSlot<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(payment_hash)
            .or_default()
            .clone();
        HashSlot {
            locks: &self.locks,
            payment_hash,
            lock,
        }
    }

    /// Hashes with a claim running or queued
    pub fn active_hashes(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Claim the HTLC committed under `payment_hash` by revealing `preimage`.
    ///
    /// Claims on one hash run one at a time. Dropping the returned future
    /// before the rail answers leaves the record claimable.
    pub async fn claim(
        &self,
        rails: &dyn RailResolver,
        payment_hash: PaymentHash,
        preimage: &Preimage,
    ) -> Result<Payment, HtlcError> {
        let slot = self.slot(payment_hash);
        let _held = slot.lock.lock().await;
        self.claim_serialized(rails, payment_hash, preimage).await
    }

    async fn claim_serialized(
        &self,
        rails: &dyn RailResolver,
        payment_hash: PaymentHash,
        preimage: &Preimage,
    ) -> Result<Payment, HtlcError> {
        let target = self.store.claim_target(&payment_hash)?;
        let status = target
            .htlc_status()
            .ok_or_else(|| HtlcError::NotFound(format!("no HTLC under {payment_hash}")))?;

        match status {
            // A retry after a lost response: same secret, same answer
            HtlcStatus::Claimed if verify(preimage, &payment_hash) => return Ok(target),
            HtlcStatus::Claimed | HtlcStatus::Refunded | HtlcStatus::Failed => {
                return Err(HtlcError::AlreadyTerminal {
                    payment_hash,
                    status,
                })
            }
            HtlcStatus::WaitingForPreimage => {}
        }

        if !verify(preimage, &payment_hash) {
            return Err(HtlcError::InvalidPreimage(payment_hash));
        }

        let rail = target.rail();
        let adapter = rails.adapter(rail)?;
        let ticket = self.store.begin_claim(&target.id)?;

        match bounded(self.timeout, adapter.settle(&target, preimage)).await {
            Ok(()) | Err(RailError::AlreadySettled) => {
                let payment = ticket.complete(preimage)?;
                info!("Claimed HTLC {payment_hash} on {rail} (payment {})", payment.id);
                Ok(payment)
            }
            Err(source) if source.is_permanent() => {
                warn!("Rail {rail} failed HTLC {payment_hash} for good: {source}");
                ticket.fail()?;
                Err(HtlcError::RailSettlementError {
                    rail,
                    payment_hash,
                    source,
                })
            }
            Err(source) => {
                warn!("Settlement of {payment_hash} on {rail} failed, claim may be retried: {source}");
                Err(HtlcError::RailSettlementError {
                    rail,
                    payment_hash,
                    source,
                })
            }
        }
    }
}
