use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use standby_core::escalation::AdminAlert;
use uuid::Uuid;

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/alerts: list alerts (default: open only; ?status=resolved|all)
pub async fn list_alerts(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let alerts = run_blocking(move || engine.alerts(q.status.as_deref())).await?;
    let list: Vec<serde_json::Value> = alerts.iter().map(alert_to_json).collect();
    Ok(Json(serde_json::json!(list)))
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

/// GET /api/alerts/:id
pub async fn get_alert(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = app.engine.clone();
    let alert = run_blocking(move || engine.alert(id)).await?;
    Ok(Json(alert_to_json(&alert)))
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

const DEFAULT_RESOLUTION: &str = "resolved by operator";

#[derive(Deserialize, Default)]
pub struct ResolveBody {
    #[serde(default)]
    pub resolution: Option<String>,
}

/// POST /api/alerts/:id/resolve: body optional; `{"resolution": "..."}`
pub async fn resolve_alert(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resolution = match body.and_then(|Json(b)| b.resolution) {
        Some(r) if r.trim().is_empty() => {
            return Err(AppError::bad_request("resolution must not be empty"))
        }
        Some(r) => r,
        None => DEFAULT_RESOLUTION.to_string(),
    };
    let engine = app.engine.clone();
    let alert = run_blocking(move || engine.resolve_alert(id, resolution, Utc::now())).await?;
    app.publish("alert_resolved", Some(alert.trip_id.clone()));
    Ok(Json(alert_to_json(&alert)))
}

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn alert_to_json(a: &AdminAlert) -> serde_json::Value {
    serde_json::json!({
        "id": a.id,
        "trip_id": a.trip_id,
        "alert_type": a.alert_type.to_string(),
        "priority": a.priority.to_string(),
        "message": a.message,
        "escalation_configured": a.escalation_configured,
        "status": if a.resolved { "resolved" } else { "open" },
        "created_at": a.created_at,
        "resolved_at": a.resolved_at,
        "resolution": a.resolution,
    })
}
