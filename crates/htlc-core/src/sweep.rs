//! Expiry sweep: moves due, unclaimed locks to `Refunded`.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::HtlcError;
use crate::models::Payment;
use crate::store::PaymentStore;

/// Anything that can expire its due HTLCs at a given instant
pub trait ExpirySweep: Send + Sync {
    /// Refund every `WaitingForPreimage` record with `expiry_time <= now_secs`
    fn sweep(&self, now_secs: u64) -> Result<Vec<Payment>, HtlcError>;
}

impl ExpirySweep for PaymentStore {
    fn sweep(&self, now_secs: u64) -> Result<Vec<Payment>, HtlcError> {
        self.expire_due(now_secs)
    }
}

/// Run `target.sweep(clock.now())` every `interval` until the handle is aborted
pub fn spawn_expiry_sweeper(
    target: Arc<dyn ExpirySweep>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Expiry sweeper running every {interval:?}");

        loop {
            ticker.tick().await;
            match target.sweep(clock.now_secs()) {
                Ok(refunded) if refunded.is_empty() => debug!("Sweep: nothing due"),
                Ok(refunded) => info!("Sweep refunded {} HTLC(s)", refunded.len()),
                Err(e) => warn!("Sweep failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::Preimage;
    use crate::models::{
        HtlcDetails, HtlcStatus, PaymentDetails, PaymentId, PaymentStatus, PaymentType,
    };

    fn waiting_receive(expiry_time: u64) -> Payment {
        Payment {
            id: PaymentId::new(),
            payment_type: PaymentType::Receive,
            status: PaymentStatus::Pending,
            amount: 1_000,
            fees: 0,
            timestamp: 0,
            details: PaymentDetails::Spark {
                transfer_id: Some("tx".to_string()),
                address: None,
                htlc_details: Some(HtlcDetails::waiting(
                    Preimage::random().payment_hash(),
                    expiry_time,
                )),
                conversion_status: None,
            },
        }
    }

    #[test]
    fn test_sweep_only_refunds_due_records() {
        let store = PaymentStore::new();
        let due = store.insert(waiting_receive(100)).unwrap();
        let later = store.insert(waiting_receive(200)).unwrap();

        assert!(store.sweep(99).unwrap().is_empty());
        let refunded = store.sweep(100).unwrap();
        assert_eq!(refunded.len(), 1);
        assert_eq!(refunded[0].id, due.id);
        assert_eq!(
            store.get(&later.id).unwrap().htlc_status(),
            Some(HtlcStatus::WaitingForPreimage)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_refunds_expired() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(PaymentStore::new());
        let payment = store
            .insert(waiting_receive(clock.now_secs() + 60))
            .unwrap();

        let handle = spawn_expiry_sweeper(store.clone(), clock.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            store.get(&payment.id).unwrap().htlc_status(),
            Some(HtlcStatus::WaitingForPreimage)
        );

        clock.advance(60).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            store.get(&payment.id).unwrap().htlc_status(),
            Some(HtlcStatus::Refunded)
        );
        handle.abort();
    }
}
