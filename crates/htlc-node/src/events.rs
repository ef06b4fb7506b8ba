//! Forwarding of collaborator event feeds into the payment service.

use htlc_core::{InvoiceEvent, LedgerEvent, PaymentService};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn forward_invoice_events(
    service: Arc<PaymentService>,
    mut events: broadcast::Receiver<InvoiceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = service.handle_invoice_event(&event) {
                        warn!("Invoice event {event:?} not applied: {e}");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Invoice feed lagged, {missed} event(s) dropped; the sweep will catch expiries")
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Invoice event feed closed");
    })
}

pub fn forward_ledger_events(
    service: Arc<PaymentService>,
    mut events: broadcast::Receiver<LedgerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = service.handle_ledger_event(&event) {
                        warn!("Ledger event {event:?} not applied: {e}");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Ledger feed lagged, {missed} event(s) dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Ledger event feed closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use htlc_core::{
        Clock, HtlcConfig, HtlcStatus, ManualClock, MockLedger, PaymentStore, Preimage,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_incoming_locked_transfer_becomes_claimable() {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = MockLedger::new(0, clock.clone());
        let service = Arc::new(PaymentService::new(
            HtlcConfig::default(),
            clock.clone(),
            Arc::new(PaymentStore::new()),
        ));
        service.attach_ledger(Arc::new(ledger.clone()));
        let forwarder = forward_ledger_events(service.clone(), ledger.subscribe());

        let preimage = Preimage::random();
        ledger.receive_locked_transfer(
            "sparkrt1alice",
            preimage.payment_hash(),
            2_000,
            clock.now_secs() + 60,
        );

        let mut found = Vec::new();
        for _ in 0..50 {
            found = service.store().find_by_hash(&preimage.payment_hash());
            if !found.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].htlc_status(), Some(HtlcStatus::WaitingForPreimage));

        forwarder.abort();
    }
}
