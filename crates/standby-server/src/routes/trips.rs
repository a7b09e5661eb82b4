use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use standby_core::orchestrator::{TriggerOutcome, TripSnapshot};
use standby_core::types::{BackupRequest, Trip, TriggerReason};

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/trips: every trip the engine knows about.
pub async fn list_trips(State(app): State<AppState>) -> Result<Json<Vec<Trip>>, AppError> {
    let engine = app.engine.clone();
    let trips = run_blocking(move || engine.trips()).await?;
    Ok(Json(trips))
}

/// GET /api/trips/:id: trip with workflow state, requests and alerts.
pub async fn get_trip(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TripSnapshot>, AppError> {
    let engine = app.engine.clone();
    let snapshot = run_blocking(move || engine.trip(&id)).await?;
    Ok(Json(snapshot))
}

/// GET /api/trips/:id/requests: request history, oldest first.
pub async fn list_requests(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<BackupRequest>>, AppError> {
    let engine = app.engine.clone();
    let requests = run_blocking(move || engine.requests(&id)).await?;
    Ok(Json(requests))
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

/// PUT /api/trips/:id: create or update a trip from upstream.
pub async fn put_trip(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(trip): Json<Trip>,
) -> Result<Json<Trip>, AppError> {
    if trip.id != id {
        return Err(AppError::bad_request(format!(
            "trip id '{}' does not match path '{id}'",
            trip.id
        )));
    }
    let engine = app.engine.clone();
    let stored = run_blocking(move || engine.upsert_trip(trip)).await?;
    app.publish("trip_updated", Some(stored.id.clone()));
    Ok(Json(stored))
}

// ---------------------------------------------------------------------------
// Trigger / assign
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct TriggerBody {
    pub reason: Option<String>,
    pub prior_guide_name: Option<String>,
}

/// POST /api/trips/:id/trigger: start or re-enter the backup workflow.
pub async fn trigger_trip(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TriggerBody>>,
) -> Result<Json<TriggerOutcome>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let reason: TriggerReason = match body.reason.as_deref() {
        Some(r) => r.parse()?,
        None => TriggerReason::Manual,
    };
    let engine = app.engine.clone();
    let trip_id = id.clone();
    let outcome = run_blocking(move || {
        engine.trigger(&trip_id, reason, body.prior_guide_name, Utc::now())
    })
    .await?;
    app.publish("trip_updated", Some(id));
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub guide_id: String,
}

/// POST /api/trips/:id/assign: operator override.
pub async fn assign_trip(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<TriggerOutcome>, AppError> {
    let engine = app.engine.clone();
    let trip_id = id.clone();
    let outcome =
        run_blocking(move || engine.assign(&trip_id, &body.guide_id, Utc::now())).await?;
    app.publish("trip_updated", Some(id));
    Ok(Json(outcome))
}
