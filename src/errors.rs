use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;

/// Error taxonomy raised by the service layer.
///
/// Every validation failure is detected before any write. The variants carry
/// enough context (current vs requested state, requested vs outstanding
/// amount) for a caller to render a precise user-facing message; the service
/// layer itself never formats responses.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    /// Entity id absent or soft-deleted.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, or a generated-number retry loop exhausted.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operation attempted against an entity whose state forbids it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Status change not permitted by the manual transition table.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Payment amount non-positive or exceeding the outstanding balance.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// HTTP status equivalent for this error. Single source of truth for the
    /// error-to-status mapping used by whatever transport fronts this crate.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ValidationError(_)
            | Self::InvalidState(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message suitable for transports. Internal errors collapse to a generic
    /// message so implementation details never leak to callers.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_by_taxonomy() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InvalidAmount("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: "FullyPaid".into(),
                to: "Draft".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = ServiceError::InvalidTransition {
            from: "Draft".into(),
            to: "FullyPaid".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Draft"));
        assert!(message.contains("FullyPaid"));
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");
    }
}
