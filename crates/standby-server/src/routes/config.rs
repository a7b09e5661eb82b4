use axum::{extract::State, Json};

use crate::state::AppState;

/// GET /api/config: process settings plus any validation warnings.
pub async fn get_config(State(app): State<AppState>) -> Json<serde_json::Value> {
    let config = app.engine.config();
    Json(serde_json::json!({
        "config": config,
        "warnings": config.validate(),
    }))
}
