pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use standby_core::Engine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing. Does not start
/// the background sweep.
pub fn build_router(engine: Arc<Engine>) -> Router {
    router(AppState::new(engine))
}

fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Trips
        .route("/api/trips", get(routes::trips::list_trips))
        .route(
            "/api/trips/{id}",
            get(routes::trips::get_trip).put(routes::trips::put_trip),
        )
        .route("/api/trips/{id}/requests", get(routes::trips::list_requests))
        .route("/api/trips/{id}/trigger", post(routes::trips::trigger_trip))
        .route("/api/trips/{id}/assign", post(routes::trips::assign_trip))
        // Requests
        .route("/api/requests/{id}", get(routes::requests::get_request))
        .route("/api/requests/{id}/respond", post(routes::requests::respond))
        // Roster
        .route("/api/guides", get(routes::roster::list_guides))
        .route("/api/guides/{id}", put(routes::roster::put_guide))
        .route("/api/applications", put(routes::roster::put_application))
        .route("/api/roster", post(routes::roster::import_roster))
        // Alerts
        .route("/api/alerts", get(routes::alerts::list_alerts))
        .route("/api/alerts/{id}", get(routes::alerts::get_alert))
        .route(
            "/api/alerts/{id}/resolve",
            post(routes::alerts::resolve_alert),
        )
        // Policy
        .route(
            "/api/policy",
            get(routes::policy::get_policy).patch(routes::policy::update_policy),
        )
        .route("/api/policy/history", get(routes::policy::policy_history))
        // Sweep
        .route("/api/sweep", post(routes::sweep::run_sweep))
        // Config
        .route("/api/config", get(routes::config::get_config))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve the API and run the sweep on its interval until the process exits.
pub async fn serve(engine: Arc<Engine>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(engine, listener).await
}

/// Like `serve`, on a pre-bound listener (useful with port 0).
pub async fn serve_on(engine: Arc<Engine>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = AppState::new(engine);
    let sweeper = state::spawn_sweeper(app_state.clone());

    tracing::info!("standby API listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, router(app_state)).await;
    sweeper.abort();
    result?;
    Ok(())
}
