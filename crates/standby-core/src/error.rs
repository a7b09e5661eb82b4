use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not initialized: run 'standby init'")]
    NotInitialized,

    #[error("trip not found: {0}")]
    TripNotFound(String),

    #[error("guide not found: {0}")]
    GuideNotFound(String),

    #[error("backup request not found: {0}")]
    RequestNotFound(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("trip '{0}' is not active")]
    TripNotActive(String),

    #[error("invalid id '{0}': must be non-empty and must not contain '/'")]
    InvalidId(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("trip '{trip_id}' already has backup guide '{guide_id}'")]
    ConcurrentAssignmentConflict { trip_id: String, guide_id: String },

    #[error("invalid policy: {0}")]
    PolicyValidation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Wrap any redb error as [`EngineError::Store`].
pub(crate) fn store_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(e.to_string())
}
