use std::sync::Arc;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use standby_core::notify::{MemoryNotifier, TemplateId};
use standby_core::Engine;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize a project in `dir` and open it with an in-memory notifier.
fn open_engine(dir: &TempDir) -> (Arc<Engine>, Arc<MemoryNotifier>) {
    Engine::init(dir.path()).unwrap();
    let notifier = MemoryNotifier::new();
    let engine = Engine::open_with(dir.path(), notifier.clone()).unwrap();
    (Arc::new(engine), notifier)
}

fn roster(candidates: &[(&str, f64)]) -> serde_json::Value {
    let guides: Vec<_> = candidates
        .iter()
        .map(|(id, _)| serde_json::json!({ "id": id, "name": id.to_uppercase() }))
        .collect();
    let applications: Vec<_> = candidates
        .iter()
        .map(|(id, score)| {
            serde_json::json!({
                "trip_id": "trip-1",
                "guide_id": id,
                "status": "approved",
                "match_score": score,
                "applied_at": "2026-01-01T00:00:00Z",
            })
        })
        .collect();
    serde_json::json!({
        "guides": guides,
        "trips": [{
            "id": "trip-1",
            "title": "Dolomites Hut Trek",
            "starts_at": "2030-07-01T07:00:00Z",
            "ends_at": "2030-07-06T17:00:00Z",
            "status": "active",
        }],
        "applications": applications,
    })
}

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

// ---------------------------------------------------------------------------
// Assignment flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_decline_accept_assigns_backup() {
    let dir = TempDir::new().unwrap();
    let (engine, notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);

    let (status, report) =
        post_json(app.clone(), "/api/roster", roster(&[("g1", 90.0), ("g2", 80.0)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["trips_created"], 1);

    let (status, out) = post_json(
        app.clone(),
        "/api/trips/trip-1/trigger",
        serde_json::json!({ "reason": "guide_cancelled", "prior_guide_name": "Marta" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["effect"], "requested");
    assert_eq!(out["state"], "requesting");
    assert_eq!(out["request"]["guide_id"], "g1");
    let first = out["request"]["id"].as_str().unwrap().to_string();

    let (status, out) = post_json(
        app.clone(),
        &format!("/api/requests/{first}/respond"),
        serde_json::json!({ "decision": "decline" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["answered"]["status"], "declined");
    assert_eq!(out["effect"], "requested");
    let second = out["request"]["id"].as_str().unwrap().to_string();

    let (status, out) = post_json(
        app.clone(),
        &format!("/api/requests/{second}/respond"),
        serde_json::json!({ "decision": "accept" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["effect"], "assigned");
    assert_eq!(out["guide_id"], "g2");

    let (status, snap) = get(app.clone(), "/api/trips/trip-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snap["trip"]["backup_guide_id"], "g2");
    assert_eq!(snap["state"], "assigned");
    assert_eq!(snap["requests"].as_array().unwrap().len(), 2);

    // A repeated accept is reported, not applied.
    let (status, out) = post_json(
        app,
        &format!("/api/requests/{first}/respond"),
        serde_json::json!({ "decision": "accept" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["effect"], "ignored");

    assert_eq!(notifier.sent_with(TemplateId::BackupConfirmed).len(), 1);
}

#[tokio::test]
async fn empty_pool_raises_alert_that_operators_can_resolve() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);
    post_json(app.clone(), "/api/roster", roster(&[])).await;

    let (status, out) =
        post_json(app.clone(), "/api/trips/trip-1/trigger", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["effect"], "escalated");
    assert_eq!(out["alert"]["alert_type"], "no_candidates");

    let (_, alerts) = get(app.clone(), "/api/alerts").await;
    let alerts = alerts.as_array().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["status"], "open");
    let id = alerts[0]["id"].as_str().unwrap().to_string();

    let (status, resolved) = post_json(
        app.clone(),
        &format!("/api/alerts/{id}/resolve"),
        serde_json::json!({ "resolution": "arranged a guide by phone" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (_, open) = get(app.clone(), "/api/alerts").await;
    assert!(open.as_array().unwrap().is_empty());
    let (_, all) = get(app, "/api/alerts?status=all").await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn second_manual_assignment_conflicts() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);
    post_json(app.clone(), "/api/roster", roster(&[("g1", 90.0), ("g2", 80.0)])).await;

    let (status, out) = post_json(
        app.clone(),
        "/api/trips/trip-1/assign",
        serde_json::json!({ "guide_id": "g2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["state"], "assigned");

    let (status, body) = post_json(
        app,
        "/api/trips/trip-1/assign",
        serde_json::json!({ "guide_id": "g1" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("g2"));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_records_return_404() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);

    let (status, _) = get(app.clone(), "/api/trips/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_json(app.clone(), "/api/trips/nope/trigger", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_json(
        app.clone(),
        "/api/requests/00000000-0000-0000-0000-000000000000/respond",
        serde_json::json!({ "decision": "accept" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(app, "/api/alerts/00000000-0000-0000-0000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_input_returns_400() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);
    post_json(app.clone(), "/api/roster", roster(&[("g1", 90.0)])).await;

    let (status, _) = post_json(
        app.clone(),
        "/api/trips/trip-1/trigger",
        serde_json::json!({ "reason": "because" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, out) = post_json(app.clone(), "/api/trips/trip-1/trigger", serde_json::json!({})).await;
    let id = out["request"]["id"].as_str().unwrap().to_string();
    let (status, _) = post_json(
        app.clone(),
        &format!("/api/requests/{id}/respond"),
        serde_json::json!({ "decision": "maybe" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app,
        "PUT",
        "/api/trips/trip-1",
        Some(serde_json::json!({
            "id": "trip-2",
            "starts_at": "2030-07-01T07:00:00Z",
            "ends_at": "2030-07-06T17:00:00Z",
            "status": "active",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Policy / sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_updates_are_validated_and_versioned() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);

    let (status, policy) = get(app.clone(), "/api/policy").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["version"], 1);
    assert_eq!(policy["max_requests_per_trip"], 3);

    let (status, _) = send(
        app.clone(),
        "PATCH",
        "/api/policy",
        Some(serde_json::json!({ "max_requests_per_trip": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, policy) = send(
        app.clone(),
        "PATCH",
        "/api/policy",
        Some(serde_json::json!({ "max_requests_per_trip": 5, "response_timeout_secs": 7200 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["version"], 2);
    assert_eq!(policy["response_timeout_secs"], 7200);

    let (_, history) = get(app, "/api/policy/history").await;
    assert_eq!(history.as_array().unwrap().last().unwrap()["version"], 2);
}

#[tokio::test]
async fn manual_sweep_reports_counts() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);

    let mut body = roster(&[("g1", 90.0)]);
    body["trips"][0]["requires_backup"] = serde_json::json!(true);
    post_json(app.clone(), "/api/roster", body).await;

    let (status, report) = post_json(app.clone(), "/api/sweep", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["trips_scanned"], 1);
    assert_eq!(report["triggered"], 1);

    let (_, requests) = get(app, "/api/trips/trip-1/requests").await;
    assert_eq!(requests.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn config_endpoint_reports_settings() {
    let dir = TempDir::new().unwrap();
    let (engine, _notifier) = open_engine(&dir);
    let app = standby_server::build_router(engine);
    let (status, body) = get(app, "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["sweep_interval_secs"], 60);
    assert!(body["warnings"].as_array().unwrap().is_empty());
}
