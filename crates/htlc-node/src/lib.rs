//! HTLC Node
//!
//! HTTP surface over `htlc_core::PaymentService`.

pub mod config;
pub mod events;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::*;
pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Payments
        .route("/api/payments/prepare-send", post(prepare_send))
        .route("/api/payments/send", post(send_payment))
        .route("/api/payments/receive", post(receive_payment))
        .route("/api/payments/claim", post(claim_payment))
        .route("/api/payments/list", post(list_payments))
        .route("/api/payments/:id", get(get_payment))
        // System
        .route("/api/system/tick", post(tick))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
