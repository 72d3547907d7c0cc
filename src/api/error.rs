use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::engine::EngineError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error kind, e.g. "vehicle_busy" or "validation"
    pub kind: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map an engine failure to its HTTP shape. State-machine and uniqueness
/// violations are conflicts; everything else keeps its usual code.
pub fn from_engine(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::InvalidState { .. }
        | EngineError::IllegalTransition { .. }
        | EngineError::VehicleBusy { .. }
        | EngineError::TripAlreadyStarted(_) => StatusCode::CONFLICT,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
            kind: "validation".to_string(),
        }),
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.into(),
            kind: "internal".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::TripStatus;

    #[test]
    fn conflict_class_errors_map_to_409() {
        let (status, body) = from_engine(EngineError::VehicleBusy {
            vehicle_id: 1,
            trip_id: 2,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.kind, "vehicle_busy");

        let (status, body) = from_engine(EngineError::IllegalTransition {
            from: TripStatus::Completed,
            to: TripStatus::Active,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.kind, "illegal_transition");
    }

    #[test]
    fn not_found_and_validation_codes() {
        let (status, _) = from_engine(EngineError::not_found("trip", 9));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = from_engine(EngineError::Validation("bad".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.kind, "validation");
    }
}
