use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use standby_core::Engine;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Change notice pushed to `/api/events` subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub event_tx: broadcast::Sender<EngineEvent>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            engine,
            event_tx: tx,
        }
    }

    /// Tell subscribers something changed. No subscribers is not an error.
    pub fn publish(&self, kind: &'static str, trip_id: Option<String>) {
        let _ = self.event_tx.send(EngineEvent { kind, trip_id });
    }
}

/// Run the sweep on the configured interval for as long as the server lives.
///
/// Each pass runs on the blocking pool; a failed pass is logged and the next
/// tick tries again.
pub fn spawn_sweeper(app: AppState) -> tokio::task::JoinHandle<()> {
    let period = app.engine.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let engine = app.engine.clone();
            match tokio::task::spawn_blocking(move || engine.sweep(Utc::now())).await {
                Ok(Ok(report)) => {
                    if !report.is_noop() {
                        app.publish("sweep", None);
                    }
                }
                Ok(Err(e)) => tracing::error!(error = %e, "sweep pass failed"),
                Err(e) => tracing::error!(error = %e, "sweep task join error"),
            }
        }
    })
}
