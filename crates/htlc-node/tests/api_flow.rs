//! HTTP-level tests for the payment API, driven in-process through the router.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use htlc_core::{
    HtlcConfig, ManualClock, MockLedger, MockLightningNode, PaymentService, PaymentStore, Preimage,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use htlc_node::{build_router, AppState};

struct TestNode {
    app: Router,
    node: MockLightningNode,
}

fn test_node(store: PaymentStore) -> TestNode {
    let clock = Arc::new(ManualClock::starting_now());
    let service = Arc::new(PaymentService::new(
        HtlcConfig::default(),
        clock.clone(),
        Arc::new(store),
    ));
    service.attach_ledger(Arc::new(MockLedger::new(100_000, clock.clone())));
    let node = MockLightningNode::new(clock.clone());
    service.attach_lightning(Arc::new(node.clone()));

    TestNode {
        app: build_router(AppState::with_simulated_time(service, clock)),
        node,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, Some(body)).await
}

async fn spark_lock(app: &Router, preimage: &Preimage, expiry_secs: u64) -> Value {
    let (status, prepared) = post(
        app,
        "/api/payments/prepare-send",
        json!({ "payment_request": "sparkrt1receiver", "amount": 50000, "fee_policy": null }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{prepared}");

    let (status, sent) = post(
        app,
        "/api/payments/send",
        json!({
            "prepare_response": prepared,
            "options": {
                "htlc_options": {
                    "payment_hash": preimage.payment_hash().to_hex(),
                    "expiry": { "duration_secs": expiry_secs }
                }
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{sent}");
    sent["payment"].clone()
}

#[tokio::test]
async fn test_health() {
    let t = test_node(PaymentStore::new());
    let (status, body) = call(&t.app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));
}

#[tokio::test]
async fn test_spark_lock_and_claim() {
    let t = test_node(PaymentStore::new());
    let preimage = Preimage::from_bytes([0x11; 32]);

    let payment = spark_lock(&t.app, &preimage, 1_000).await;
    assert_eq!(payment["status"], "pending");
    assert_eq!(payment["details"]["rail"], "spark");
    assert_eq!(payment["details"]["htlc_details"]["status"], "waiting_for_preimage");
    assert!(payment["details"]["htlc_details"]["preimage"].is_null());

    let (status, listed) = post(
        &t.app,
        "/api/payments/list",
        json!({
            "status_filter": ["pending"],
            "payment_details_filter": [{ "rail": "spark", "htlc_status": ["waiting_for_preimage"], "conversion_refund_needed": null }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["payments"].as_array().unwrap().len(), 1);

    // A preimage is looked up by its own hash, so a wrong one finds nothing
    let (status, _) = post(
        &t.app,
        "/api/payments/claim",
        json!({ "preimage": Preimage::random().to_hex() }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, short) = post(&t.app, "/api/payments/claim", json!({ "preimage": "1111" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(short["retryable"], false);

    let (status, claimed) = post(
        &t.app,
        "/api/payments/claim",
        json!({ "preimage": preimage.to_hex() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{claimed}");
    assert_eq!(claimed["payment"]["status"], "completed");
    assert_eq!(
        claimed["payment"]["details"]["htlc_details"]["preimage"],
        preimage.to_hex()
    );

    let id = payment["id"].as_str().unwrap();
    let (status, fetched) = call(&t.app, Method::GET, &format!("/api/payments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["payment"]["details"]["htlc_details"]["status"], "claimed");
}

#[tokio::test]
async fn test_duplicate_lock_conflicts() {
    let t = test_node(PaymentStore::new());
    let preimage = Preimage::random();
    spark_lock(&t.app, &preimage, 600).await;

    let (_, prepared) = post(
        &t.app,
        "/api/payments/prepare-send",
        json!({ "payment_request": "sparkrt1receiver", "amount": 1000, "fee_policy": null }),
    )
    .await;
    let (status, body) = post(
        &t.app,
        "/api/payments/send",
        json!({
            "prepare_response": prepared,
            "options": { "htlc_options": {
                "payment_hash": preimage.payment_hash().to_hex(),
                "expiry": { "duration_secs": 600 }
            } }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn test_tick_refunds_hold_invoice() {
    let t = test_node(PaymentStore::new());
    let preimage = Preimage::random();

    let (status, receive) = post(
        &t.app,
        "/api/payments/receive",
        json!({
            "payment_method": {
                "type": "bolt11_invoice",
                "description": "escrow",
                "amount_sats": 2000,
                "expiry_secs": 60,
                "payment_hash": preimage.payment_hash().to_hex()
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{receive}");
    assert!(receive["payment_request"].as_str().unwrap().starts_with("ln"));
    t.node
        .simulate_incoming_payment(&preimage.payment_hash())
        .unwrap();

    let (status, tick) = post(&t.app, "/api/system/tick", json!({ "seconds": 61 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tick["refunded"][0], receive["payment_id"]);

    let (status, body) = post(
        &t.app,
        "/api/payments/claim",
        json!({ "preimage": preimage.to_hex() }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(t.node.settle_calls(), 0);
}

#[tokio::test]
async fn test_tick_out_of_range_is_400() {
    let t = test_node(PaymentStore::new());
    let (_, before) = post(&t.app, "/api/system/tick", json!({ "seconds": 0 })).await;

    let (status, body) = post(&t.app, "/api/system/tick", json!({ "seconds": i64::MAX })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["retryable"], false);

    let (status, after) = post(&t.app, "/api/system/tick", json!({ "seconds": 0 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["now"], before["now"]);
}

#[tokio::test]
async fn test_unknown_payment_is_404() {
    let t = test_node(PaymentStore::new());
    let (status, _) = call(
        &t.app,
        Method::GET,
        "/api/payments/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(
        &t.app,
        "/api/payments/claim",
        json!({ "preimage": Preimage::random().to_hex() }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_not_ready_is_503() {
    let clock = Arc::new(ManualClock::starting_now());
    let service = Arc::new(PaymentService::new(
        HtlcConfig::default(),
        clock.clone(),
        Arc::new(PaymentStore::new()),
    ));
    let app = build_router(AppState::new(service));

    let (status, body) = post(
        &app,
        "/api/payments/prepare-send",
        json!({ "payment_request": "sparkrt1receiver", "amount": 1000, "fee_policy": null }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert_eq!(body["retryable"], true);

    // Time is real here, so tick is refused
    let (status, _) = post(&app, "/api/system/tick", json!({ "seconds": 10 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payments_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payments.sqlite");
    let preimage = Preimage::random();

    let id = {
        let t = test_node(PaymentStore::open(&path).unwrap());
        let payment = spark_lock(&t.app, &preimage, 600).await;
        payment["id"].as_str().unwrap().to_string()
    };

    let t = test_node(PaymentStore::open(&path).unwrap());
    let (status, fetched) = call(&t.app, Method::GET, &format!("/api/payments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        fetched["payment"]["details"]["htlc_details"]["status"],
        "waiting_for_preimage"
    );
}
