//! HTLC Node
//!
//! Conditional payments over the Spark ledger and Lightning hold invoices.

use anyhow::{Context, Result};
use htlc_core::{
    spawn_expiry_sweeper, Clock, ExpirySweep, LightningNodeClient, ManualClock, MockLedger,
    MockLightningNode, PaymentService, PaymentStore, RpcLightningClient, SystemClock,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use htlc_node::config::NodeConfig;
use htlc_node::events::{forward_invoice_events, forward_ledger_events};
use htlc_node::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;

    let manual_clock = config
        .simulated_time
        .then(|| Arc::new(ManualClock::starting_now()));
    let clock: Arc<dyn Clock> = match &manual_clock {
        Some(clock) => {
            tracing::info!("Simulated time enabled (advance with POST /api/system/tick)");
            clock.clone()
        }
        None => Arc::new(SystemClock),
    };

    let store = match &config.db_path {
        Some(path) => Arc::new(PaymentStore::open(path).context("open payment log")?),
        None => {
            tracing::info!("Payment log not configured (set HTLC_DB_PATH to persist payments)");
            Arc::new(PaymentStore::new())
        }
    };
    let service = Arc::new(PaymentService::new(config.htlc.clone(), clock.clone(), store));

    // The ledger is always the in-memory one
    let ledger = MockLedger::new(config.demo_balance_sats, clock.clone());
    tracing::info!("Demo ledger address: {}", ledger.address());
    forward_ledger_events(service.clone(), ledger.subscribe());
    service.attach_ledger(Arc::new(ledger));

    let lightning: Arc<dyn LightningNodeClient> = match &config.lightning_rpc_url {
        Some(url) => {
            tracing::info!("Lightning RPC enabled: {}", url);
            Arc::new(RpcLightningClient::new(url.clone()))
        }
        None => {
            tracing::info!("Lightning RPC not configured (set LIGHTNING_RPC_URL to enable)");
            let node = MockLightningNode::new(clock.clone());
            forward_invoice_events(service.clone(), node.subscribe());
            Arc::new(node)
        }
    };
    service.attach_lightning(lightning);

    let sweep_target: Arc<dyn ExpirySweep> = service.clone();
    spawn_expiry_sweeper(sweep_target, clock, config.htlc.sweep_interval());

    let state = match manual_clock {
        Some(clock) => AppState::with_simulated_time(service, clock),
        None => AppState::new(service),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("HTLC node starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
