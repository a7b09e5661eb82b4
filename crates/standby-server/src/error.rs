use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use standby_core::EngineError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(EngineError::InvalidValue(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<EngineError>() {
            Some(e) => match e {
                EngineError::NotInitialized => StatusCode::BAD_REQUEST,
                EngineError::TripNotFound(_)
                | EngineError::GuideNotFound(_)
                | EngineError::RequestNotFound(_)
                | EngineError::AlertNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::TripNotActive(_)
                | EngineError::ConcurrentAssignmentConflict { .. } => StatusCode::CONFLICT,
                EngineError::InvalidId(_)
                | EngineError::InvalidValue(_)
                | EngineError::PolicyValidation(_) => StatusCode::BAD_REQUEST,
                EngineError::Store(_)
                | EngineError::Io(_)
                | EngineError::Yaml(_)
                | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: EngineError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn missing_records_map_to_404() {
        assert_eq!(status_of(EngineError::TripNotFound("t".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::GuideNotFound("g".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::RequestNotFound("r".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(EngineError::AlertNotFound("a".into())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn assignment_conflict_maps_to_409() {
        let err = EngineError::ConcurrentAssignmentConflict {
            trip_id: "trip-1".into(),
            guide_id: "g1".into(),
        };
        assert_eq!(status_of(err), StatusCode::CONFLICT);
        assert_eq!(status_of(EngineError::TripNotActive("t".into())), StatusCode::CONFLICT);
    }

    #[test]
    fn bad_input_maps_to_400() {
        assert_eq!(status_of(EngineError::InvalidId("a/b".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(EngineError::PolicyValidation("too many".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::bad_request("nope").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_failure_maps_to_500() {
        assert_eq!(
            status_of(EngineError::Store("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError(anyhow::anyhow!("something unexpected"))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(EngineError::TripNotFound("t".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
