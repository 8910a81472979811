//! HTTP handlers driven through the router with `oneshot`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{harness, Harness};
use healthy_pay_settlement::api::{self, AppState};
use healthy_pay_settlement::health::HealthChecker;
use healthy_pay_settlement::payments::types::CollectionStatus;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn app(h: &Harness) -> Router {
    api::router().with_state(AppState {
        engine: h.engine.clone(),
        worker: h.worker(),
        health_checker: HealthChecker::new(None, h.psp.clone()),
    })
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri)
        .header("content-type", "application/json")
        .header("x-request-id", "req-42");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Uuid) -> Request<Body> {
    Request::get(uri)
        .header("x-user-id", user.to_string())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn requests_without_user_are_unauthenticated() {
    let h = harness();
    let (status, body) = call(app(&h), post("/api/transactions/send", None, json!({}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHENTICATED");
    assert_eq!(body["request_id"], "req-42");
}

#[tokio::test]
async fn wallet_send_returns_completed_transaction() {
    let h = harness();
    let user = Uuid::new_v4();
    h.fund_wallet(user, "100").await;

    let (status, body) = call(
        app(&h),
        post(
            "/api/transactions/send",
            Some(user),
            json!({
                "amount": "50",
                "recipient_name": "Esi",
                "recipient_account": "0241112223",
                "recipient_type": "mobile_money",
                "network": "MTN",
                "payment_method_id": "wallet_balance"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "completed");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(app(&h), get(&format!("/api/transactions/{id}/status"), user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delivery_status"], "delivered");

    let (_, body) = call(app(&h), get("/api/transactions", user)).await;
    assert_eq!(body["meta"]["count"], 1);
}

#[tokio::test]
async fn overdraft_is_a_client_error() {
    let h = harness();
    let user = Uuid::new_v4();

    let (status, body) = call(
        app(&h),
        post(
            "/api/transactions/send",
            Some(user),
            json!({
                "amount": "10",
                "recipient_name": "Esi",
                "recipient_account": "0241112223",
                "recipient_type": "mobile_money",
                "network": "MTN",
                "payment_method_id": "wallet_balance"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INSUFFICIENT_BALANCE");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn deposit_round_trip_over_http() {
    let h = harness();
    h.provider.script(&[CollectionStatus::Collected]);
    let user = Uuid::new_v4();
    let method = h.mobile_money_method(user);

    let (status, body) = call(
        app(&h),
        post(
            "/api/deposits",
            Some(user),
            json!({ "amount": "20", "payment_method_id": method }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(app(&h), get(&format!("/api/deposits/{id}/status"), user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "collected");
    assert_eq!(body["data"]["queue_status"], "completed");
}

#[tokio::test]
async fn psp_inspection_endpoints() {
    let h = harness();
    let user = Uuid::new_v4();

    let (_, body) = call(app(&h), get("/api/psp/providers", user)).await;
    assert_eq!(body["data"]["providers"], json!(["ogate"]));
    assert_eq!(body["data"]["default"], "ogate");

    let (_, body) = call(app(&h), get("/api/psp/recommend?provider=vodafone", user)).await;
    assert_eq!(body["data"]["recommended_psp"], "ogate");

    let (status, body) = call(app(&h), post("/api/psp/test/mtn", Some(user), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "PROVIDER_NOT_CONFIGURED");
}

#[tokio::test]
async fn process_pending_reports_the_cycle() {
    let h = harness();
    let user = Uuid::new_v4();

    let (status, body) = call(
        app(&h),
        post("/api/transactions/process-pending", Some(user), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["transactions_checked"], 0);
    assert_eq!(body["data"]["errors"], 0);
}
