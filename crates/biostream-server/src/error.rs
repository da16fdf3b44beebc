//! HTTP-facing error type

use crate::coordinator::RegistrationError;
use axum::http::StatusCode;
use biostream_core::dsp::filter::ValidationError;
use biostream_core::session::AuthError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Registration(RegistrationError::Auth(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Registration(RegistrationError::Capacity { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Registration(RegistrationError::Link(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::ClientNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApiError> for (StatusCode, String) {
    fn from(err: ApiError) -> Self {
        (err.status(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(AuthError::ExpiredToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(ValidationError::OrderZero).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(RegistrationError::Capacity { max: 4 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::ClientNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_into_tuple_keeps_message() {
        let (status, body): (StatusCode, String) =
            ApiError::from(AuthError::InvalidCredentials).into();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Invalid password");
    }
}
