//! # Integration Tests for escrow-api
//!
//! Drives the full router in-process: escrow lifecycle scenarios, dispute
//! resolution, error mapping, the audit endpoint, the gateway webhook,
//! health probes and the OpenAPI document.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use escrow_api::bootstrap::Services;
use escrow_api::AppConfig;
use escrow_core::{ManualClock, Timestamp};
use escrow_gateway::MockGateway;
use escrow_ledger::MemoryStore;

const BUYER: (&str, &str) = ("buyer-1", "participant");
const SUPPLIER: (&str, &str) = ("supplier-1", "participant");
const MEDIATOR: (&str, &str) = ("mediator-1", "mediator");
const GATEWAY: (&str, &str) = ("gateway", "system");
const OUTSIDER: (&str, &str) = ("someone-else", "participant");

struct TestApp {
    router: axum::Router,
    store: Arc<MemoryStore>,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Timestamp::parse("2026-01-15T12:00:00Z").unwrap(),
    ));
    let services = Services::assemble(
        AppConfig::default(),
        store.clone(),
        Arc::new(MockGateway::new()),
        clock,
        None,
    );
    TestApp {
        router: escrow_api::app(services.state),
        store,
    }
}

async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    actor: Option<(&str, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

fn create_body() -> Value {
    json!({
        "rfqId": "rfq-42",
        "buyerId": "buyer-1",
        "supplierId": "supplier-1",
        "amount": "10000",
        "currency": "INR",
        "terms": "100 units of grade-A steel",
        "deadline": "2026-01-22T12:00:00Z"
    })
}

async fn create(app: &TestApp) -> String {
    let (status, body) = send(app, "POST", "/v1/escrows", Some(BUYER), Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().to_string()
}

async fn create_active(app: &TestApp) -> String {
    let id = create(app).await;
    let (status, body) = send(
        app,
        "POST",
        &format!("/v1/escrows/{id}/fund"),
        Some(GATEWAY),
        Some(json!({"transactionId": "fund-tx-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    id
}

// -- Scenario A ---------------------------------------------------------------

#[tokio::test]
async fn create_fund_and_partially_release() {
    let app = test_app();
    let (status, created) =
        send(&app, "POST", "/v1/escrows", Some(BUYER), Some(create_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["state"], "CREATED");
    assert_eq!(created["originalAmount"], "10000.00");
    assert_eq!(created["heldAmount"], "10000.00");
    assert_eq!(created["version"], 1);
    let id = created["id"].as_str().unwrap();

    let (status, funded) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/fund"),
        Some(GATEWAY),
        Some(json!({"transactionId": "fund-tx-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(funded["state"], "ACTIVE");
    assert_eq!(funded["fundingTransactionId"], "fund-tx-1");

    let (status, released) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/release"),
        Some(BUYER),
        Some(json!({"amount": "4000", "reason": "milestone 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{released}");
    assert_eq!(released["state"], "ACTIVE");
    assert_eq!(released["heldAmount"], "6000.00");
    assert_eq!(released["releasedAmount"], "4000.00");
    assert_eq!(released["settlementStatus"], "RELEASE_PENDING");
    assert_eq!(released["movements"].as_array().unwrap().len(), 1);
    assert_eq!(released["movements"][0]["kind"], "release");
}

// -- Scenario B ---------------------------------------------------------------

#[tokio::test]
async fn dispute_partial_refund_then_release_remainder() {
    let app = test_app();
    let id = create_active(&app).await;
    send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/release"),
        Some(BUYER),
        Some(json!({"amount": "4000", "reason": "milestone 1"})),
    )
    .await;

    let (status, disputed) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/dispute"),
        Some(BUYER),
        Some(json!({
            "reason": "quality issue",
            "description": "30% of the batch failed inspection",
            "evidence": ["photo1"],
            "requestedAction": "partial_refund",
            "amount": "3000"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{disputed}");
    assert_eq!(disputed["state"], "DISPUTED");
    assert_eq!(disputed["disputes"][0]["status"], "OPEN");

    let (status, resolved) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/dispute/resolve"),
        Some(MEDIATOR),
        Some(json!({
            "outcome": {"type": "partial_refund", "amount": "3000"},
            "notes": "split the difference"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{resolved}");
    assert_eq!(resolved["state"], "DISPUTED");
    assert_eq!(resolved["heldAmount"], "3000.00");
    assert_eq!(resolved["refundedAmount"], "3000.00");
    assert_eq!(resolved["disputes"][0]["status"], "RESOLVED");
    assert_eq!(resolved["disputes"][0]["mediatorId"], "mediator-1");

    let (status, released) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/release"),
        Some(BUYER),
        Some(json!({"amount": "3000", "reason": "remaining goods accepted"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{released}");
    assert_eq!(released["state"], "RELEASED");
    assert_eq!(released["heldAmount"], "0.00");
    assert_eq!(released["releasedAmount"], "7000.00");
    assert!(released["closedAt"].is_string());
}

#[tokio::test]
async fn acknowledge_then_escalate() {
    let app = test_app();
    let id = create_active(&app).await;
    send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/dispute"),
        Some(SUPPLIER),
        Some(json!({
            "reason": "payment withheld",
            "description": "goods delivered on time",
            "evidence": ["delivery-note-7"],
            "requestedAction": "release"
        })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/dispute/acknowledge"),
        Some(MEDIATOR),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["disputes"][0]["status"], "MEDIATION");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/dispute/escalate"),
        Some(MEDIATOR),
        Some(json!({"reason": "parties unresponsive"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["disputes"][0]["status"], "ESCALATED");
    assert_eq!(body["state"], "DISPUTED");
}

// -- Scenario D ---------------------------------------------------------------

#[tokio::test]
async fn cancel_after_funding_is_a_conflict() {
    let app = test_app();
    let id = create_active(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/cancel"),
        Some(BUYER),
        Some(json!({"reason": "changed my mind"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "STATE_CONFLICT");

    let (_, snapshot) = send(&app, "GET", &format!("/v1/escrows/{id}"), Some(BUYER), None).await;
    assert_eq!(snapshot["state"], "ACTIVE");
    assert_eq!(snapshot["version"], 2);
}

#[tokio::test]
async fn cancel_before_funding() {
    let app = test_app();
    let id = create(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/cancel"),
        Some(BUYER),
        Some(json!({"reason": "supplier withdrew"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "CANCELLED");
    assert_eq!(body["validTransitions"], json!([]));
}

// -- Idempotency and extension ------------------------------------------------

#[tokio::test]
async fn release_replay_with_header_key_creates_one_movement() {
    let app = test_app();
    let id = create_active(&app).await;
    let request = || {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/escrows/{id}/release"))
            .header("x-actor-id", "buyer-1")
            .header("idempotency-key", "milestone-1")
            .header("content-type", "application/json")
            .body(Body::from(json!({"amount": "1000", "reason": "m1"}).to_string()))
            .unwrap()
    };
    for _ in 0..2 {
        let response = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let (_, snapshot) = send(&app, "GET", &format!("/v1/escrows/{id}"), Some(BUYER), None).await;
    assert_eq!(snapshot["movements"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["heldAmount"], "9000.00");
}

#[tokio::test]
async fn extend_moves_deadline_forward_only() {
    let app = test_app();
    let id = create_active(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/extend"),
        Some(BUYER),
        Some(json!({
            "newDeadline": "2026-02-01T00:00:00Z",
            "reason": "shipping delay",
            "additionalTerms": "partial shipment allowed"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["deadline"], "2026-02-01T00:00:00Z");
    assert!(body["terms"].as_str().unwrap().contains("partial shipment allowed"));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/extend"),
        Some(BUYER),
        Some(json!({"newDeadline": "2026-01-20T00:00:00Z", "reason": "oops"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// -- Error mapping ------------------------------------------------------------

#[tokio::test]
async fn missing_actor_is_401() {
    let app = test_app();
    let (status, body) = send(&app, "POST", "/v1/escrows", None, Some(create_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn malformed_json_is_400() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/escrows")
                .header("x-actor-id", "buyer-1")
                .header("content-type", "application/json")
                .body(Body::from("{\"rfqId\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_currency_is_400() {
    let app = test_app();
    let mut body = create_body();
    body["currency"] = json!("XYZ");
    let (status, body) = send(&app, "POST", "/v1/escrows", Some(BUYER), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn outsider_cannot_read_escrow() {
    let app = test_app();
    let id = create(&app).await;
    let (status, body) = send(&app, "GET", &format!("/v1/escrows/{id}"), Some(OUTSIDER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");
}

#[tokio::test]
async fn supplier_cannot_release() {
    let app = test_app();
    let id = create_active(&app).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/release"),
        Some(SUPPLIER),
        Some(json!({"reason": "pay me"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_escrow_is_404() {
    let app = test_app();
    let (status, body) = send(
        &app,
        "GET",
        "/v1/escrows/00000000-0000-4000-8000-000000000000",
        Some(BUYER),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_escrow_id_is_400() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/v1/escrows/not-a-uuid", Some(BUYER), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn over_release_is_a_conflict() {
    let app = test_app();
    let id = create_active(&app).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/release"),
        Some(BUYER),
        Some(json!({"amount": "10000.01", "reason": "too much"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// -- Listing ------------------------------------------------------------------

#[tokio::test]
async fn listing_is_staff_only() {
    let app = test_app();
    create(&app).await;
    create(&app).await;

    let (status, _) = send(&app, "GET", "/v1/escrows", Some(BUYER), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/v1/escrows?limit=1&offset=1", Some(MEDIATOR), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["escrows"].as_array().unwrap().len(), 1);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["offset"], 1);
}

// -- Audit trail --------------------------------------------------------------

#[tokio::test]
async fn audit_trail_records_rejections_and_verifies() {
    let app = test_app();
    let id = create_active(&app).await;
    send(
        &app,
        "POST",
        &format!("/v1/escrows/{id}/cancel"),
        Some(BUYER),
        Some(json!({"reason": "too late"})),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/v1/escrows/{id}/audit"), Some(BUYER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert!(body.get("brokenAt").is_none());
    let events = body["events"].as_array().unwrap();
    let ops: Vec<&str> = events.iter().map(|e| e["operation"].as_str().unwrap()).collect();
    assert_eq!(ops, ["create", "fund", "fund", "cancel"]);
    assert_eq!(events[3]["outcome"], "REJECTED");
    assert_eq!(events[1]["toState"], "FUNDED");
    assert_eq!(events[2]["toState"], "ACTIVE");
    assert_eq!(events[1]["eventHash"], events[2]["previousEventHash"]);
}

#[tokio::test]
async fn tampered_audit_trail_reports_break() {
    let app = test_app();
    let id = create_active(&app).await;
    let escrow_id = escrow_core::EscrowId::parse(&id).unwrap();
    app.store.tamper_audit(&escrow_id, 1, |e| e.detail = Some("edited".into()));

    let (status, body) = send(&app, "GET", &format!("/v1/escrows/{id}/audit"), Some(BUYER), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], false);
    assert_eq!(body["brokenAt"], 1);
}

// -- Gateway webhook ----------------------------------------------------------

#[tokio::test]
async fn webhook_funds_escrow() {
    let app = test_app();
    let id = create(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        "/v1/gateway/webhook",
        Some(GATEWAY),
        Some(json!({"event": "funds_received", "transactionId": "fund-tx-9", "escrowId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "ACTIVE");
}

#[tokio::test]
async fn webhook_requires_gateway_role() {
    let app = test_app();
    let id = create(&app).await;
    let (status, _) = send(
        &app,
        "POST",
        "/v1/gateway/webhook",
        Some(BUYER),
        Some(json!({"event": "funds_received", "transactionId": "fund-tx-9", "escrowId": id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_funds_received_needs_escrow_id() {
    let app = test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/v1/gateway/webhook",
        Some(GATEWAY),
        Some(json!({"event": "funds_received", "transactionId": "fund-tx-9"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn webhook_confirmation_for_unknown_transaction_is_404() {
    let app = test_app();
    let (status, _) = send(
        &app,
        "POST",
        "/v1/gateway/webhook",
        Some(GATEWAY),
        Some(json!({"event": "settlement_confirmed", "transactionId": "never-seen"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// -- Probes and documents -----------------------------------------------------

#[tokio::test]
async fn health_probes() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/health/liveness", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));

    let (status, body) = send(&app, "GET", "/health/readiness", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ready".into()));
}

#[tokio::test]
async fn metrics_not_served_without_recorder() {
    let app = test_app();
    let (status, _) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = test_app();
    let (status, body) = send(&app, "GET", "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "Escrow API");
    assert!(body["paths"]["/v1/escrows/{id}/release"].is_object());
}
