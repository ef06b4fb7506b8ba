//! Payment store and query engine.
//!
//! The store is the only shared mutable state. Every mutation happens under
//! one short-lived mutex that is never held across an await; claims fence
//! themselves off from the expiry path with a per-record claim marker.

mod filter;
mod sqlite;

pub use filter::Predicate;
pub use sqlite::SqlitePaymentLog;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::crypto::{PaymentHash, Preimage};
use crate::error::HtlcError;
use crate::models::{
    HtlcStatus, ListPaymentsRequest, Payment, PaymentDetails, PaymentId, PaymentType, Rail,
};

/// In-memory payment index with an optional SQLite write-through log
pub struct PaymentStore {
    inner: Mutex<StoreInner>,
    log: Option<Mutex<SqlitePaymentLog>>,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<PaymentId, StoredPayment>,
    /// Insertion order
    order: Vec<PaymentId>,
    by_hash: HashMap<PaymentHash, Vec<PaymentId>>,
    /// Commitments handed to a rail but not yet recorded
    reserved: HashSet<(Rail, PaymentType, PaymentHash)>,
    /// Records with a settle call in flight
    claiming: HashSet<PaymentId>,
    next_seq: u64,
}

struct StoredPayment {
    seq: u64,
    payment: Payment,
}

impl StoreInner {
    fn payments_for_hash<'a>(
        &'a self,
        payment_hash: &PaymentHash,
    ) -> impl Iterator<Item = &'a StoredPayment> + 'a {
        self.by_hash
            .get(payment_hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
    }

    fn open_record(&self, rail: Rail, payment_hash: &PaymentHash) -> Option<PaymentId> {
        self.payments_for_hash(payment_hash)
            .find(|r| {
                r.payment.rail() == rail
                    && r.payment.htlc_status() == Some(HtlcStatus::WaitingForPreimage)
            })
            .map(|r| r.payment.id)
    }

    /// One of our own commitments under (rail, direction, hash) is open or being made
    fn in_flight(&self, rail: Rail, payment_type: PaymentType, payment_hash: &PaymentHash) -> bool {
        self.reserved.contains(&(rail, payment_type, *payment_hash))
            || self.payments_for_hash(payment_hash).any(|r| {
                r.payment.rail() == rail
                    && r.payment.payment_type == payment_type
                    && r.payment.htlc_status() == Some(HtlcStatus::WaitingForPreimage)
            })
    }

    fn spark_transfer(&self, transfer_id: &str) -> Option<&StoredPayment> {
        self.records.values().find(|r| {
            matches!(
                &r.payment.details,
                PaymentDetails::Spark { transfer_id: Some(id), .. } if id == transfer_id
            )
        })
    }

    /// An open Spark send whose locked transfer the ledger never confirmed
    fn unconfirmed_spark_send(&self, payment_hash: &PaymentHash) -> Option<PaymentId> {
        self.payments_for_hash(payment_hash)
            .find(|r| {
                r.payment.payment_type == PaymentType::Send
                    && r.payment.htlc_status() == Some(HtlcStatus::WaitingForPreimage)
                    && matches!(
                        r.payment.details,
                        PaymentDetails::Spark {
                            transfer_id: None,
                            ..
                        }
                    )
            })
            .map(|r| r.payment.id)
    }
}

impl PaymentStore {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            log: None,
        }
    }

    /// Open a store backed by a SQLite log, replaying its payments
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HtlcError> {
        let log = SqlitePaymentLog::open(path.into())?;
        let payments = log.load_all()?;

        let mut inner = StoreInner::default();
        for payment in payments {
            let id = payment.id;
            if let Some(hash) = payment.payment_hash() {
                inner.by_hash.entry(hash).or_default().push(id);
            }
            inner.order.push(id);
            inner.records.insert(
                id,
                StoredPayment {
                    seq: inner.next_seq,
                    payment,
                },
            );
            inner.next_seq += 1;
        }
        info!(
            "Opened payment store {} with {} payments",
            log.path().display(),
            inner.order.len()
        );

        Ok(Self {
            inner: Mutex::new(inner),
            log: Some(Mutex::new(log)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, seq: u64, payment: &Payment) -> Result<(), HtlcError> {
        match &self.log {
            Some(log) => log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .upsert(seq, payment),
            None => Ok(()),
        }
    }

    /// Record a payment the rail already holds, such as an inbound lock.
    ///
    /// Our own hash-locked commitments go through `reserve_commitment` instead,
    /// which is where duplicates are refused.
    pub fn insert(&self, payment: Payment) -> Result<Payment, HtlcError> {
        let mut inner = self.lock();
        self.insert_locked(&mut inner, payment)
    }

    fn insert_locked(
        &self,
        inner: &mut StoreInner,
        payment: Payment,
    ) -> Result<Payment, HtlcError> {
        if inner.records.contains_key(&payment.id) {
            return Err(HtlcError::InvalidInput(format!(
                "payment {} already exists",
                payment.id
            )));
        }

        let seq = inner.next_seq;
        self.persist(seq, &payment)?;

        inner.next_seq += 1;
        inner.order.push(payment.id);
        if let Some(hash) = payment.payment_hash() {
            inner.by_hash.entry(hash).or_default().push(payment.id);
        }
        inner.records.insert(
            payment.id,
            StoredPayment {
                seq,
                payment: payment.clone(),
            },
        );
        debug!("Inserted payment {} ({:?})", payment.id, payment.rail());
        Ok(payment)
    }

    /// Apply `f` to a copy of the record, persist it, then publish it
    fn update_locked(
        &self,
        inner: &mut StoreInner,
        id: &PaymentId,
        f: impl FnOnce(&mut Payment) -> Result<(), HtlcError>,
    ) -> Result<Payment, HtlcError> {
        let record = inner
            .records
            .get_mut(id)
            .ok_or_else(|| HtlcError::NotFound(format!("payment {id}")))?;

        let mut updated = record.payment.clone();
        f(&mut updated)?;
        self.persist(record.seq, &updated)?;
        record.payment = updated.clone();
        Ok(updated)
    }

    /// Hold the (rail, direction, hash) slot while the rail call that commits funds runs
    pub fn reserve_commitment(
        self: &Arc<Self>,
        rail: Rail,
        payment_type: PaymentType,
        payment_hash: PaymentHash,
    ) -> Result<CommitmentReservation, HtlcError> {
        let mut inner = self.lock();
        if inner.in_flight(rail, payment_type, &payment_hash) {
            return Err(HtlcError::DuplicateCommitment { rail, payment_hash });
        }
        inner.reserved.insert((rail, payment_type, payment_hash));

        Ok(CommitmentReservation {
            store: Arc::clone(self),
            rail,
            payment_type,
            payment_hash,
            released: false,
        })
    }

    /// The Spark payment carrying ledger transfer `transfer_id`
    pub fn find_by_transfer_id(&self, transfer_id: &str) -> Option<Payment> {
        self.lock()
            .spark_transfer(transfer_id)
            .map(|r| r.payment.clone())
    }

    /// Attach the ledger transfer id learned after an unconfirmed commit
    pub fn confirm_transfer(&self, id: &PaymentId, transfer_id: &str) -> Result<Payment, HtlcError> {
        let mut inner = self.lock();
        let payment = self.update_locked(&mut inner, id, |p| match &mut p.details {
            PaymentDetails::Spark {
                transfer_id: slot @ None,
                ..
            } => {
                *slot = Some(transfer_id.to_string());
                Ok(())
            }
            PaymentDetails::Spark { .. } => Ok(()),
            PaymentDetails::Lightning { .. } => Err(HtlcError::InvalidInput(format!(
                "payment {id} is not a Spark transfer"
            ))),
        })?;
        info!("Payment {id} confirmed as ledger transfer {transfer_id}");
        Ok(payment)
    }

    pub fn get(&self, id: &PaymentId) -> Result<Payment, HtlcError> {
        self.lock()
            .records
            .get(id)
            .map(|r| r.payment.clone())
            .ok_or_else(|| HtlcError::NotFound(format!("payment {id}")))
    }

    /// Payments matching the request, insertion order unless `sort_ascending` is false
    pub fn list(&self, request: &ListPaymentsRequest) -> Vec<Payment> {
        let predicate = Predicate::from_request(request);
        let mut payments: Vec<Payment> = {
            let inner = self.lock();
            inner
                .order
                .iter()
                .filter_map(|id| inner.records.get(id))
                .map(|r| &r.payment)
                .filter(|p| predicate.matches(p))
                .cloned()
                .collect()
        };

        if request.sort_ascending == Some(false) {
            payments.reverse();
        }

        let offset = request.offset.unwrap_or(0) as usize;
        let limit = request.limit.map_or(usize::MAX, |l| l as usize);
        payments.into_iter().skip(offset).take(limit).collect()
    }

    /// Every payment committed under `payment_hash`, in insertion order
    pub fn find_by_hash(&self, payment_hash: &PaymentHash) -> Vec<Payment> {
        let inner = self.lock();
        let mut found: Vec<&StoredPayment> = inner.payments_for_hash(payment_hash).collect();
        found.sort_by_key(|r| r.seq);
        found.into_iter().map(|r| r.payment.clone()).collect()
    }

    /// The record a claim for `payment_hash` acts on.
    ///
    /// Open records win, receives before sends, then oldest first. With no
    /// open record the newest terminal one is returned so the caller can
    /// report it.
    pub fn claim_target(&self, payment_hash: &PaymentHash) -> Result<Payment, HtlcError> {
        let inner = self.lock();
        let candidates: Vec<&StoredPayment> = inner
            .payments_for_hash(payment_hash)
            .filter(|r| r.payment.is_claimable_locally())
            .collect();

        let open = candidates
            .iter()
            .filter(|r| r.payment.htlc_status() == Some(HtlcStatus::WaitingForPreimage))
            .min_by_key(|r| (r.payment.payment_type != PaymentType::Receive, r.seq));

        open.or_else(|| candidates.iter().max_by_key(|r| r.seq))
            .map(|r| r.payment.clone())
            .ok_or_else(|| {
                HtlcError::NotFound(format!("no claimable HTLC for payment hash {payment_hash}"))
            })
    }

    /// Mark a record as being claimed so no other transition can touch it
    pub fn begin_claim(self: &Arc<Self>, id: &PaymentId) -> Result<ClaimTicket, HtlcError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get(id)
            .ok_or_else(|| HtlcError::NotFound(format!("payment {id}")))?;
        let htlc = record.payment.htlc_details().ok_or_else(|| {
            HtlcError::InvalidInput(format!("payment {id} carries no HTLC"))
        })?;
        let payment_hash = htlc.payment_hash;

        if htlc.status.is_terminal() {
            return Err(HtlcError::AlreadyTerminal {
                payment_hash,
                status: htlc.status,
            });
        }
        if !inner.claiming.insert(*id) {
            return Err(HtlcError::ClaimInProgress(payment_hash));
        }

        Ok(ClaimTicket {
            store: Arc::clone(self),
            id: *id,
            payment_hash,
        })
    }

    /// Move every unclaimed, expired lock to `Refunded`
    pub fn expire_due(&self, now_secs: u64) -> Result<Vec<Payment>, HtlcError> {
        let mut inner = self.lock();
        let due: Vec<PaymentId> = inner
            .order
            .iter()
            .filter(|id| !inner.claiming.contains(*id))
            .filter_map(|id| inner.records.get(id))
            .filter(|r| {
                r.payment.htlc_details().is_some_and(|h| {
                    h.status == HtlcStatus::WaitingForPreimage && h.is_expired_at(now_secs)
                })
            })
            .map(|r| r.payment.id)
            .collect();

        let mut refunded = Vec::with_capacity(due.len());
        for id in due {
            let payment =
                self.update_locked(&mut inner, &id, |p| transition(p, HtlcStatus::Refunded))?;
            info!(
                "Refunded expired HTLC {} (payment {})",
                payment.payment_hash().map(|h| h.to_string()).unwrap_or_default(),
                payment.id
            );
            refunded.push(payment);
        }
        Ok(refunded)
    }

    /// Rail-reported expiry of an open lock; deferred while a claim is in flight
    pub fn refund(
        &self,
        rail: Rail,
        payment_hash: &PaymentHash,
    ) -> Result<Option<Payment>, HtlcError> {
        let mut inner = self.lock();
        let Some(id) = inner.open_record(rail, payment_hash) else {
            return Ok(None);
        };
        if inner.claiming.contains(&id) {
            debug!("Refund of {payment_hash} deferred: claim in flight");
            return Ok(None);
        }

        let payment = self.update_locked(&mut inner, &id, |p| transition(p, HtlcStatus::Refunded))?;
        info!("Refunded HTLC {payment_hash} on {rail} (payment {})", payment.id);
        Ok(Some(payment))
    }

    /// The ledger returned locked transfer `transfer_id` to its sender.
    ///
    /// Falls back to an unconfirmed send under the same hash, since the ledger
    /// may have taken that lock without our seeing its id.
    pub fn refund_transfer(
        &self,
        transfer_id: &str,
        payment_hash: &PaymentHash,
    ) -> Result<Option<Payment>, HtlcError> {
        let mut inner = self.lock();
        let id = match inner.spark_transfer(transfer_id) {
            Some(r) if r.payment.htlc_status() == Some(HtlcStatus::WaitingForPreimage) => {
                Some(r.payment.id)
            }
            Some(_) => None,
            None => inner.unconfirmed_spark_send(payment_hash),
        };
        let Some(id) = id else {
            return Ok(None);
        };
        if inner.claiming.contains(&id) {
            debug!("Refund of transfer {transfer_id} deferred: claim in flight");
            return Ok(None);
        }

        let payment = self.update_locked(&mut inner, &id, |p| transition(p, HtlcStatus::Refunded))?;
        info!("Ledger returned transfer {transfer_id} under {payment_hash} (payment {})", payment.id);
        Ok(Some(payment))
    }

    /// The payer locked funds against one of our hold invoices
    pub fn mark_accepted(
        &self,
        payment_hash: &PaymentHash,
        amount_sats: u64,
    ) -> Result<Option<Payment>, HtlcError> {
        let mut inner = self.lock();
        let Some(id) = inner.open_record(Rail::Lightning, payment_hash) else {
            return Ok(None);
        };

        let payment = self.update_locked(&mut inner, &id, |p| {
            if p.amount == 0 {
                p.amount = amount_sats;
            }
            if let PaymentDetails::Lightning { accepted, .. } = &mut p.details {
                *accepted = true;
            }
            Ok(())
        })?;
        Ok(Some(payment))
    }

    /// A preimage learned from the rail settles our open send under `payment_hash`
    pub fn record_preimage(
        &self,
        rail: Rail,
        payment_hash: &PaymentHash,
        preimage: &Preimage,
    ) -> Result<Option<Payment>, HtlcError> {
        if !payment_hash.verify(preimage) {
            return Err(HtlcError::InvalidPreimage(*payment_hash));
        }

        let mut inner = self.lock();
        let Some(id) = inner.open_record(rail, payment_hash) else {
            return Ok(None);
        };
        if inner.claiming.contains(&id) {
            return Ok(None);
        }

        let payment = self.update_locked(&mut inner, &id, |p| settle_with(p, preimage))?;
        info!("HTLC {payment_hash} settled by the network (payment {})", payment.id);
        Ok(Some(payment))
    }
}

impl Default for PaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic HTLC transition: only `WaitingForPreimage` may move
fn transition(payment: &mut Payment, to: HtlcStatus) -> Result<(), HtlcError> {
    let id = payment.id;
    let htlc = payment
        .details
        .htlc_details_mut()
        .ok_or_else(|| HtlcError::InvalidInput(format!("payment {id} carries no HTLC")))?;
    if htlc.status.is_terminal() {
        return Err(HtlcError::AlreadyTerminal {
            payment_hash: htlc.payment_hash,
            status: htlc.status,
        });
    }
    htlc.status = to;
    payment.status = to.payment_status();
    Ok(())
}

fn settle_with(payment: &mut Payment, preimage: &Preimage) -> Result<(), HtlcError> {
    transition(payment, HtlcStatus::Claimed)?;
    if let Some(htlc) = payment.details.htlc_details_mut() {
        htlc.preimage = Some(preimage.clone());
    }
    Ok(())
}

/// Exclusive right to record a commitment under (rail, direction, hash)
pub struct CommitmentReservation {
    store: Arc<PaymentStore>,
    rail: Rail,
    payment_type: PaymentType,
    payment_hash: PaymentHash,
    released: bool,
}

impl CommitmentReservation {
    /// Swap the reservation for the committed payment record
    pub fn commit(mut self, payment: Payment) -> Result<Payment, HtlcError> {
        debug_assert_eq!(payment.rail(), self.rail);
        debug_assert_eq!(payment.payment_type, self.payment_type);
        debug_assert_eq!(payment.payment_hash(), Some(self.payment_hash));

        let mut inner = self.store.lock();
        inner
            .reserved
            .remove(&(self.rail, self.payment_type, self.payment_hash));
        self.released = true;
        self.store.insert_locked(&mut inner, payment)
    }
}

impl std::fmt::Debug for CommitmentReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentReservation")
            .field("rail", &self.rail)
            .field("payment_type", &self.payment_type)
            .field("payment_hash", &self.payment_hash)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for CommitmentReservation {
    fn drop(&mut self) {
        if !self.released {
            self.store
                .lock()
                .reserved
                .remove(&(self.rail, self.payment_type, self.payment_hash));
        }
    }
}

/// Exclusive right to move one record out of `WaitingForPreimage` by claim.
///
/// Dropping the ticket without finishing leaves the record claimable.
pub struct ClaimTicket {
    store: Arc<PaymentStore>,
    id: PaymentId,
    payment_hash: PaymentHash,
}

impl ClaimTicket {
    pub fn payment_id(&self) -> PaymentId {
        self.id
    }

    pub fn payment_hash(&self) -> PaymentHash {
        self.payment_hash
    }

    /// The rail released the funds: store the preimage and mark `Claimed`
    pub fn complete(self, preimage: &Preimage) -> Result<Payment, HtlcError> {
        if !self.payment_hash.verify(preimage) {
            return Err(HtlcError::InvalidPreimage(self.payment_hash));
        }
        let mut inner = self.store.lock();
        let payment = self
            .store
            .update_locked(&mut inner, &self.id, |p| settle_with(p, preimage))?;
        inner.claiming.remove(&self.id);
        Ok(payment)
    }

    /// The rail failed the lock for good
    pub fn fail(self) -> Result<Payment, HtlcError> {
        let mut inner = self.store.lock();
        let payment = self
            .store
            .update_locked(&mut inner, &self.id, |p| transition(p, HtlcStatus::Failed))?;
        inner.claiming.remove(&self.id);
        Ok(payment)
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        self.store.lock().claiming.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HtlcDetails, PaymentStatus};

    fn htlc_payment(rail: Rail, preimage: &Preimage, expiry_time: u64) -> Payment {
        let htlc_details = Some(HtlcDetails::waiting(preimage.payment_hash(), expiry_time));
        let details = match rail {
            Rail::Spark => PaymentDetails::Spark {
                transfer_id: Some("tx".to_string()),
                address: None,
                htlc_details,
                conversion_status: None,
            },
            Rail::Lightning => PaymentDetails::Lightning {
                invoice: "lnbcrt1".to_string(),
                description: None,
                htlc_details,
                lnurl_preimage: None,
                accepted: false,
            },
        };
        Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Receive,
            status: PaymentStatus::Pending,
            amount: 1_000,
            fees: 0,
            timestamp: 10,
            details,
        }
    }

    #[test]
    fn test_duplicate_commitment_same_rail() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let mut send = htlc_payment(Rail::Spark, &preimage, 100);
        send.payment_type = PaymentType::Send;
        store
            .reserve_commitment(Rail::Spark, PaymentType::Send, hash)
            .unwrap()
            .commit(send)
            .unwrap();

        let err = store
            .reserve_commitment(Rail::Spark, PaymentType::Send, hash)
            .unwrap_err();
        assert!(matches!(err, HtlcError::DuplicateCommitment { rail: Rail::Spark, .. }));

        // Other rail is independent
        store
            .reserve_commitment(Rail::Lightning, PaymentType::Send, hash)
            .unwrap();
    }

    #[test]
    fn test_inbound_lock_recorded_beside_open_send() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let mut send = htlc_payment(Rail::Spark, &preimage, 100);
        send.payment_type = PaymentType::Send;
        let send = store
            .reserve_commitment(Rail::Spark, PaymentType::Send, hash)
            .unwrap()
            .commit(send)
            .unwrap();

        let mut inbound = htlc_payment(Rail::Spark, &preimage, 100);
        if let PaymentDetails::Spark { transfer_id, .. } = &mut inbound.details {
            *transfer_id = Some("inbound-tx".to_string());
        }
        let inbound = store.insert(inbound).unwrap();

        assert_eq!(store.find_by_hash(&hash).len(), 2);
        assert_eq!(store.claim_target(&hash).unwrap().id, inbound.id);
        assert_eq!(store.find_by_transfer_id("inbound-tx").unwrap().id, inbound.id);
        assert_ne!(send.id, inbound.id);

        // An open receive does not block our own send slot either way
        assert!(store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, hash)
            .is_ok());
    }

    #[test]
    fn test_unconfirmed_send_reconciles() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let mut send = htlc_payment(Rail::Spark, &preimage, 100);
        send.payment_type = PaymentType::Send;
        if let PaymentDetails::Spark { transfer_id, .. } = &mut send.details {
            *transfer_id = None;
        }
        let send = store
            .reserve_commitment(Rail::Spark, PaymentType::Send, hash)
            .unwrap()
            .commit(send)
            .unwrap();

        let confirmed = store.confirm_transfer(&send.id, "late-tx").unwrap();
        assert!(matches!(
            confirmed.details,
            PaymentDetails::Spark { transfer_id: Some(ref id), .. } if id == "late-tx"
        ));

        let refunded = store.refund_transfer("late-tx", &hash).unwrap().unwrap();
        assert_eq!(refunded.id, send.id);
        assert_eq!(refunded.htlc_status(), Some(HtlcStatus::Refunded));
    }

    #[test]
    fn test_return_of_unknown_transfer_refunds_unconfirmed_send() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let mut send = htlc_payment(Rail::Spark, &preimage, 100);
        send.payment_type = PaymentType::Send;
        if let PaymentDetails::Spark { transfer_id, .. } = &mut send.details {
            *transfer_id = None;
        }
        let send = store.insert(send).unwrap();

        let refunded = store.refund_transfer("never-seen", &hash).unwrap().unwrap();
        assert_eq!(refunded.id, send.id);
        assert!(store.refund_transfer("never-seen", &hash).unwrap().is_none());
    }

    #[test]
    fn test_reservation_blocks_and_releases() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let reservation = store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, hash)
            .unwrap();
        assert!(matches!(
            store.reserve_commitment(Rail::Spark, PaymentType::Receive, hash),
            Err(HtlcError::DuplicateCommitment { .. })
        ));
        drop(reservation);

        let reservation = store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, hash)
            .unwrap();
        let payment = reservation
            .commit(htlc_payment(Rail::Spark, &preimage, 100))
            .unwrap();
        assert_eq!(store.get(&payment.id).unwrap(), payment);
        assert!(store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, hash)
            .is_err());
    }

    #[test]
    fn test_terminal_record_frees_the_hash() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();

        assert!(store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, preimage.payment_hash())
            .is_err());

        store.expire_due(100).unwrap();
        assert_eq!(
            store.get(&payment.id).unwrap().htlc_status(),
            Some(HtlcStatus::Refunded)
        );
        store
            .reserve_commitment(Rail::Spark, PaymentType::Receive, preimage.payment_hash())
            .unwrap()
            .commit(htlc_payment(Rail::Spark, &preimage, 500))
            .unwrap();
    }

    #[test]
    fn test_claim_ticket_completes() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();

        let ticket = store.begin_claim(&payment.id).unwrap();
        let claimed = ticket.complete(&preimage).unwrap();

        assert_eq!(claimed.status, PaymentStatus::Completed);
        let htlc = claimed.htlc_details().unwrap();
        assert_eq!(htlc.status, HtlcStatus::Claimed);
        assert_eq!(htlc.preimage.as_ref(), Some(&preimage));

        assert!(matches!(
            store.begin_claim(&payment.id),
            Err(HtlcError::AlreadyTerminal {
                status: HtlcStatus::Claimed,
                ..
            })
        ));
    }

    #[test]
    fn test_claim_ticket_rejects_wrong_preimage() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();

        let ticket = store.begin_claim(&payment.id).unwrap();
        assert!(matches!(
            ticket.complete(&Preimage::random()),
            Err(HtlcError::InvalidPreimage(_))
        ));
        assert_eq!(
            store.get(&payment.id).unwrap().htlc_status(),
            Some(HtlcStatus::WaitingForPreimage)
        );
        // Ticket was released on drop
        store.begin_claim(&payment.id).unwrap();
    }

    #[test]
    fn test_sweep_skips_record_being_claimed() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();

        let ticket = store.begin_claim(&payment.id).unwrap();
        assert!(matches!(
            store.begin_claim(&payment.id),
            Err(HtlcError::ClaimInProgress(_))
        ));
        assert!(store.expire_due(1_000).unwrap().is_empty());
        assert!(store
            .refund(Rail::Spark, &preimage.payment_hash())
            .unwrap()
            .is_none());

        drop(ticket);
        assert_eq!(store.expire_due(1_000).unwrap().len(), 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let store = Arc::new(PaymentStore::new());
        let preimage = Preimage::random();
        let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();

        store.expire_due(100).unwrap();
        assert!(matches!(
            store.begin_claim(&payment.id),
            Err(HtlcError::AlreadyTerminal {
                status: HtlcStatus::Refunded,
                ..
            })
        ));
        assert!(store.expire_due(10_000).unwrap().is_empty());
        assert!(store
            .record_preimage(Rail::Spark, &preimage.payment_hash(), &preimage)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_claim_target_prefers_open_receive() {
        let store = PaymentStore::new();
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();

        let mut send = htlc_payment(Rail::Spark, &preimage, 100);
        send.payment_type = PaymentType::Send;
        store.insert(send).unwrap();
        let receive = store
            .insert(htlc_payment(Rail::Lightning, &preimage, 100))
            .unwrap();

        assert_eq!(store.claim_target(&hash).unwrap().id, receive.id);
        assert!(matches!(
            store.claim_target(&Preimage::random().payment_hash()),
            Err(HtlcError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_order_offset_limit() {
        let store = PaymentStore::new();
        let ids: Vec<PaymentId> = (0..4)
            .map(|_| {
                store
                    .insert(htlc_payment(Rail::Spark, &Preimage::random(), 100))
                    .unwrap()
                    .id
            })
            .collect();

        let all = store.list(&ListPaymentsRequest::default());
        assert_eq!(all.iter().map(|p| p.id).collect::<Vec<_>>(), ids);

        let page = store.list(&ListPaymentsRequest {
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(page.iter().map(|p| p.id).collect::<Vec<_>>(), ids[1..3]);

        let newest_first = store.list(&ListPaymentsRequest {
            sort_ascending: Some(false),
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(newest_first[0].id, ids[3]);
    }

    #[test]
    fn test_record_preimage_verifies() {
        let store = PaymentStore::new();
        let preimage = Preimage::random();
        let hash = preimage.payment_hash();
        let mut send = htlc_payment(Rail::Lightning, &preimage, 100);
        send.payment_type = PaymentType::Send;
        store.insert(send).unwrap();

        assert!(matches!(
            store.record_preimage(Rail::Lightning, &hash, &Preimage::random()),
            Err(HtlcError::InvalidPreimage(_))
        ));
        let settled = store
            .record_preimage(Rail::Lightning, &hash, &preimage)
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Completed);
    }

    #[test]
    fn test_sqlite_log_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payments.sqlite");
        let preimage = Preimage::random();

        let id = {
            let store = Arc::new(PaymentStore::open(&path).unwrap());
            let payment = store.insert(htlc_payment(Rail::Spark, &preimage, 100)).unwrap();
            store
                .begin_claim(&payment.id)
                .unwrap()
                .complete(&preimage)
                .unwrap();
            store
                .insert(htlc_payment(Rail::Lightning, &Preimage::random(), 100))
                .unwrap();
            payment.id
        };

        let reopened = PaymentStore::open(&path).unwrap();
        let all = reopened.list(&ListPaymentsRequest::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, id);
        let htlc = all[0].htlc_details().unwrap();
        assert_eq!(htlc.status, HtlcStatus::Claimed);
        assert_eq!(htlc.preimage.as_ref(), Some(&preimage));
    }
}
