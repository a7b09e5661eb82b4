use axum::{extract::State, Json};
use chrono::Utc;
use standby_core::policy::{AutomationPolicy, PolicyUpdate};

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/policy: the policy every new decision reads.
pub async fn get_policy(State(app): State<AppState>) -> Result<Json<AutomationPolicy>, AppError> {
    let engine = app.engine.clone();
    let policy = run_blocking(move || engine.policy()).await?;
    Ok(Json(policy))
}

/// PATCH /api/policy: apply a partial update and bump the version.
///
/// In-flight requests keep the deadline they were issued with.
pub async fn update_policy(
    State(app): State<AppState>,
    Json(update): Json<PolicyUpdate>,
) -> Result<Json<AutomationPolicy>, AppError> {
    if update.is_empty() {
        return Err(AppError::bad_request("policy update sets no fields"));
    }
    let engine = app.engine.clone();
    let policy = run_blocking(move || engine.update_policy(&update, Utc::now())).await?;
    app.publish("policy_updated", None);
    Ok(Json(policy))
}

/// GET /api/policy/history: every version, oldest first.
pub async fn policy_history(
    State(app): State<AppState>,
) -> Result<Json<Vec<AutomationPolicy>>, AppError> {
    let engine = app.engine.clone();
    let history = run_blocking(move || engine.policy_history()).await?;
    Ok(Json(history))
}
