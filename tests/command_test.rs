//! HTTP command surface, driven through the router without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use gatesync::command::routes;
use gatesync::gateway::{ScriptedGatewayClient, payment_record};
use gatesync::sync::RetryPolicy;
use gatesync::{
    GatewayId, GatewayRegistry, InMemorySyncStore, PaymentState, RecordKind, SyncGate,
    SyncOrchestrator, SyncService, TierSchedule,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn service(max_triggers: u32) -> SyncService<InMemorySyncStore> {
    let yesterday = Utc::now() - Duration::days(1);
    let client = ScriptedGatewayClient::new(GatewayId::Asaas).with_records(
        RecordKind::Payment,
        vec![
            payment_record("pay_1", Decimal::new(10000, 2), PaymentState::Paid, yesterday),
            payment_record("pay_2", Decimal::new(5000, 2), PaymentState::Pending, yesterday),
        ],
        100,
    );
    let store = InMemorySyncStore::new();
    let registry = GatewayRegistry::new()
        .with_client(Arc::new(client), true)
        .with_client(
            Arc::new(ScriptedGatewayClient::new(GatewayId::PagBank).unconfigured()),
            true,
        );
    let orchestrator =
        SyncOrchestrator::new(registry, store.clone(), Arc::new(TierSchedule::default()))
            .with_retry_policy(RetryPolicy::immediate(0));
    SyncService::new(
        orchestrator,
        SyncGate::new(max_triggers, std::time::Duration::from_secs(120)),
        store,
    )
}

async fn call(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_sync_trigger_reports_counts() {
    let app = routes(service(3));

    let (status, body) = call(app.clone(), "POST", "/sync/asaas/payments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["gateway"], "asaas");
    assert_eq!(body["kind"], "payment");
    assert_eq!(body["processed"], 2);
    assert_eq!(body["created"], 2);
    assert_eq!(body["source"], "gateway");

    let (_, replay) = call(app, "POST", "/sync/asaas/payment?lookback_days=7").await;
    assert_eq!(replay["created"], 0);
    assert_eq!(replay["updated"], 0);
}

#[tokio::test]
async fn test_garbage_dates_still_run() {
    let app = routes(service(3));
    let (status, body) = call(
        app,
        "POST",
        "/sync/asaas/payment?start_date=not-a-date&end_date=2024-02-30&lookback_days=abc",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let today = Utc::now().date_naive().to_string();
    assert_eq!(body["window"]["end"], today.as_str());
}

#[tokio::test]
async fn test_unknown_gateway_is_not_found() {
    let app = routes(service(3));
    let (status, _) = call(app, "POST", "/sync/stripe/payment").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unconfigured_gateway_is_bad_request() {
    let app = routes(service(3));
    let (status, body) = call(app, "POST", "/sync/pagbank/customer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["source"], "not_configured");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_repeated_triggers_are_throttled() {
    let app = routes(service(2));
    for _ in 0..2 {
        let (status, _) = call(app.clone(), "POST", "/sync/asaas/customer").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = call(app, "POST", "/sync/asaas/customer").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["source"], "rejected");
}

#[tokio::test]
async fn test_reports_after_sync() {
    let app = routes(service(3));
    call(app.clone(), "POST", "/sync/asaas/payment").await;

    let (status, body) = call(app.clone(), "GET", "/reports/gateway").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_by"], "gateway");
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["key"], "asaas");
    assert_eq!(rows[0]["entries"], 1);
    assert_eq!(body["summary"]["charges"], 1);

    let (status, _) = call(app, "GET", "/reports/week").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_record_rollups_after_sync() {
    let app = routes(service(3));
    let (status, body) = call(app.clone(), "GET", "/reports/records/payment/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"], serde_json::json!([]));

    call(app.clone(), "POST", "/sync/asaas/payment").await;

    let (status, body) = call(app.clone(), "GET", "/reports/records/payment/gateway").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "payment");
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["key"], "asaas");
    assert_eq!(rows[0]["records"], 2);

    let (_, customers) = call(app.clone(), "GET", "/reports/records/customer/day").await;
    assert_eq!(customers["rows"], serde_json::json!([]));

    let (status, _) = call(app.clone(), "GET", "/reports/records/payment/tier").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(app, "GET", "/reports/records/invoice/day").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tier_progress_route() {
    let app = routes(service(3));
    let (status, body) = call(app.clone(), "GET", "/fees/tier").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"]["tier_number"], 1);

    let (status, _) = call(app, "GET", "/fees/tier?as_of=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
