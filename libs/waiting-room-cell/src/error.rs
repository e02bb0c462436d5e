use thiserror::Error;

use shared_models::error::AppError;

use crate::models::ErrorPayload;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("expired")]
    Expired,

    #[error("invalid")]
    Invalid,

    #[error("declared role does not match credentials")]
    RoleMismatch,

    #[error("not authorized for this room")]
    NotAuthorized,

    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

#[derive(Error, Debug)]
pub enum WaitingRoomError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Consultation for room {0} has expired")]
    ConsultationExpired(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WaitingRoomError {
    pub fn code(&self) -> &'static str {
        match self {
            WaitingRoomError::Auth(_) => "auth_error",
            WaitingRoomError::RoomNotFound(_) => "room_not_found",
            WaitingRoomError::ConsultationExpired(_) => "consultation_expired",
            WaitingRoomError::Validation(_) => "validation_error",
            WaitingRoomError::ExternalService(_) => "external_service_error",
            WaitingRoomError::Serialization(_) => "serialization_error",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            message: self.to_string(),
            code: self.code().to_string(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Lookup(msg) => AppError::ExternalService(msg),
            other => AppError::Auth(other.to_string()),
        }
    }
}

impl From<WaitingRoomError> for AppError {
    fn from(err: WaitingRoomError) -> Self {
        match err {
            WaitingRoomError::Auth(auth) => auth.into(),
            WaitingRoomError::RoomNotFound(room_id) => {
                AppError::NotFound(format!("Room {} not found", room_id))
            }
            WaitingRoomError::ConsultationExpired(room_id) => {
                AppError::Gone(format!("Consultation for room {} has expired", room_id))
            }
            WaitingRoomError::Validation(msg) => AppError::ValidationError(msg),
            WaitingRoomError::ExternalService(msg) => AppError::ExternalService(msg),
            WaitingRoomError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_messages() {
        assert_eq!(AuthError::Expired.to_string(), "expired");
        assert_eq!(AuthError::Invalid.to_string(), "invalid");
    }

    #[test]
    fn test_error_payload_carries_code() {
        let err = WaitingRoomError::ConsultationExpired("R2".to_string());
        let payload = err.to_payload();

        assert_eq!(payload.code, "consultation_expired");
        assert!(payload.message.contains("R2"));
    }

    #[test]
    fn test_app_error_mapping() {
        let err: AppError = WaitingRoomError::RoomNotFound("R9".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = WaitingRoomError::Auth(AuthError::MissingCredentials).into();
        assert!(matches!(err, AppError::Auth(_)));
    }
}
