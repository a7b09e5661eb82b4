pub mod alerts;
pub mod config;
pub mod events;
pub mod policy;
pub mod requests;
pub mod roster;
pub mod sweep;
pub mod trips;

use crate::error::AppError;

/// Run an engine call on the blocking pool. Every engine operation touches
/// redb and may deliver notifications over the network.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> standby_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(result)
}
