use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use standby_core::orchestrator::ResponseOutcome;
use standby_core::types::{BackupRequest, Decision};
use uuid::Uuid;

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/requests/:id
pub async fn get_request(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupRequest>, AppError> {
    let engine = app.engine.clone();
    let request = run_blocking(move || engine.request(id)).await?;
    Ok(Json(request))
}

#[derive(Deserialize)]
pub struct RespondBody {
    pub decision: String,
}

/// POST /api/requests/:id/respond: a candidate accepts or declines.
///
/// Late or repeated responses come back 200 with `"effect": "ignored"`.
pub async fn respond(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondBody>,
) -> Result<Json<ResponseOutcome>, AppError> {
    let decision: Decision = body.decision.parse()?;
    let engine = app.engine.clone();
    let outcome = run_blocking(move || engine.respond(id, decision, Utc::now())).await?;
    app.publish("trip_updated", Some(outcome.answered.trip_id.clone()));
    Ok(Json(outcome))
}
