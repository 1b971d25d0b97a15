// =============================================================================
// Integration tests — dashboard/webhook HTTP surface, no real browsers
// =============================================================================
//
// Builds a real `axum::Router` over an `AppState` whose `Fleet` has zero
// Sessions (an empty credential store), and drives it with
// `tower::ServiceExt::oneshot` instead of a bound TCP listener.
// =============================================================================

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use copytrade_fleet::config::FleetConfig;
use copytrade_fleet::credentials::CredentialStore;
use copytrade_fleet::dispatch::engine::DispatchEngine;
use copytrade_fleet::dispatch::record::OrderRecordStore;
use copytrade_fleet::state::AppState;
use copytrade_fleet::supervisor::Fleet;
use tower::ServiceExt;

fn empty_credential_store() -> CredentialStore {
    let file = tempfile::NamedTempFile::new().unwrap();
    CredentialStore::load(file.path()).unwrap()
}

fn test_app_state() -> Arc<AppState> {
    let fleet = Arc::new(Fleet::bootstrap(FleetConfig::default(), &empty_credential_store()).unwrap());
    let records = Arc::new(OrderRecordStore::new());
    let dispatch = Arc::new(DispatchEngine::new(fleet.clone(), records.clone()));
    Arc::new(AppState::new(fleet, records, dispatch))
}

async fn send(router: axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// Exercises health, auth rejection/acceptance, and an empty-fleet dispatch
/// in one test function — `FLEET_ADMIN_TOKEN` is process-global env, so
/// every assertion that depends on it runs sequentially here rather than
/// racing against other `#[tokio::test]` functions.
#[tokio::test]
async fn dashboard_http_surface() {
    std::env::set_var("FLEET_ADMIN_TOKEN", "test-admin-token");

    let state = test_app_state();
    let router = copytrade_fleet::api::rest::router(state);

    let (status, body) = send(
        router.clone(),
        Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(
        router.clone(),
        Request::builder().uri("/api/v1/fleet").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        router.clone(),
        Request::builder()
            .uri("/api/v1/fleet")
            .header("authorization", "Bearer wrong-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        router.clone(),
        Request::builder()
            .uri("/api/v1/fleet")
            .header("authorization", "Bearer test-admin-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 0);
    assert_eq!(body["dispatch_paused"], false);

    let dispatch_body = serde_json::json!({
        "account": "all",
        "action": "BUY",
        "symbol": "ES",
        "quantity": 1.0,
        "order_kind": "MARKET",
        "state_probe": false,
    });
    let (status, body) = send(
        router.clone(),
        Request::builder()
            .method("POST")
            .uri("/api/v1/dispatch")
            .header("authorization", "Bearer test-admin-token")
            .header("content-type", "application/json")
            .body(Body::from(dispatch_body.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);

    let (status, _) = send(
        router.clone(),
        Request::builder()
            .method("POST")
            .uri("/api/v1/control/pause")
            .header("authorization", "Bearer test-admin-token")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        router.clone(),
        Request::builder()
            .uri("/api/v1/fleet")
            .header("authorization", "Bearer test-admin-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["dispatch_paused"], true);

    std::env::remove_var("FLEET_ADMIN_TOKEN");
}

#[tokio::test]
async fn webhook_rejects_missing_passphrase() {
    std::env::remove_var("FLEET_WEBHOOK_SECRET");

    let state = test_app_state();
    let router = copytrade_fleet::api::rest::router(state);

    let payload = serde_json::json!({
        "passphrase": "whatever",
        "action": "SELL",
        "symbol": "NQ",
        "quantity": 2.0,
    });
    let (status, _) = send(
        router,
        Request::builder()
            .method("POST")
            .uri("/webhook/tradingview")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
