use axum::{extract::State, Json};
use chrono::Utc;
use standby_core::sweep::SweepReport;

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

/// POST /api/sweep: run one sweep pass now instead of waiting for the tick.
pub async fn run_sweep(State(app): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let engine = app.engine.clone();
    let report = run_blocking(move || engine.sweep(Utc::now())).await?;
    if !report.is_noop() {
        app.publish("sweep", None);
    }
    Ok(Json(report))
}
