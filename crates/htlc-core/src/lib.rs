//! HTLC Core Library
//!
//! Hash time-locked payments over two rails:
//! - Commitment codec (Preimage, PaymentHash)
//! - Spark ledger and Lightning hold-invoice adapters, with mock and JSON-RPC collaborators
//! - Payment store with filtered listing and an optional SQLite log
//! - Claim orchestration, serialized per payment hash, and the expiry sweep

pub mod claim;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod rail;
pub mod service;
pub mod store;
pub mod sweep;

pub use claim::{ClaimOrchestrator, RailResolver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HtlcConfig;
pub use crypto::{PaymentHash, Preimage};
pub use error::HtlcError;
pub use models::*;
pub use rail::{
    InvoiceEvent, LedgerClient, LedgerEvent, LightningNodeClient, MockLedger, MockLightningNode,
    RailAdapter, RailError, RpcLightningClient,
};
pub use service::PaymentService;
pub use store::PaymentStore;
pub use sweep::{spawn_expiry_sweeper, ExpirySweep};
