use thiserror::Error;

use super::types::TripStatus;

/// Engine-level failure taxonomy. The API layer maps `kind` to a status
/// code and a machine-readable string; the telemetry path logs and drops.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation not allowed while trip {trip_id} is {status}")]
    InvalidState { trip_id: i64, status: TripStatus },
    #[error("illegal trip transition {from} -> {to}")]
    IllegalTransition { from: TripStatus, to: TripStatus },
    #[error("vehicle {vehicle_id} already runs active trip {trip_id}")]
    VehicleBusy { vehicle_id: i64, trip_id: i64 },
    #[error("trip {0} already started")]
    TripAlreadyStarted(i64),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        EngineError::NotFound { entity, id }
    }

    /// Machine-readable error kind surfaced to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::VehicleBusy { .. } => "vehicle_busy",
            EngineError::TripAlreadyStarted(_) => "trip_already_started",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Validation(_) => "validation",
            EngineError::Database(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_state() {
        let err = EngineError::InvalidState {
            trip_id: 7,
            status: TripStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "operation not allowed while trip 7 is COMPLETED"
        );
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn error_display_illegal_transition() {
        let err = EngineError::IllegalTransition {
            from: TripStatus::Completed,
            to: TripStatus::Active,
        };
        assert_eq!(err.to_string(), "illegal trip transition COMPLETED -> ACTIVE");
        assert_eq!(err.kind(), "illegal_transition");
    }

    #[test]
    fn error_display_vehicle_busy() {
        let err = EngineError::VehicleBusy {
            vehicle_id: 3,
            trip_id: 12,
        };
        assert_eq!(err.to_string(), "vehicle 3 already runs active trip 12");
        assert_eq!(err.kind(), "vehicle_busy");
    }

    #[test]
    fn error_display_not_found() {
        let err = EngineError::not_found("trip", 99);
        assert_eq!(err.to_string(), "trip 99 not found");
        assert_eq!(err.kind(), "not_found");
    }
}
