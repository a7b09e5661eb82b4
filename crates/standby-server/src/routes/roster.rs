use axum::{
    extract::{Path, State},
    Json,
};
use standby_core::roster::{ImportReport, Roster};
use standby_core::types::{BackupApplication, Guide};

use super::run_blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/guides
pub async fn list_guides(State(app): State<AppState>) -> Result<Json<Vec<Guide>>, AppError> {
    let engine = app.engine.clone();
    let guides = run_blocking(move || engine.guides()).await?;
    Ok(Json(guides))
}

/// PUT /api/guides/:id: create or update a guide.
pub async fn put_guide(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(guide): Json<Guide>,
) -> Result<Json<Guide>, AppError> {
    if guide.id != id {
        return Err(AppError::bad_request(format!(
            "guide id '{}' does not match path '{id}'",
            guide.id
        )));
    }
    let engine = app.engine.clone();
    let stored = run_blocking(move || engine.upsert_guide(guide)).await?;
    app.publish("roster_updated", None);
    Ok(Json(stored))
}

/// PUT /api/applications: create or update one backup application.
pub async fn put_application(
    State(app): State<AppState>,
    Json(application): Json<BackupApplication>,
) -> Result<Json<BackupApplication>, AppError> {
    let engine = app.engine.clone();
    let stored = run_blocking(move || engine.upsert_application(application)).await?;
    app.publish("roster_updated", Some(stored.trip_id.clone()));
    Ok(Json(stored))
}

/// POST /api/roster: bulk import guides, trips and applications.
pub async fn import_roster(
    State(app): State<AppState>,
    Json(roster): Json<Roster>,
) -> Result<Json<ImportReport>, AppError> {
    let engine = app.engine.clone();
    let report = run_blocking(move || engine.import(&roster)).await?;
    app.publish("roster_updated", None);
    Ok(Json(report))
}
