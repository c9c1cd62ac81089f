use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::messaging::MessageError;
use thiserror::Error;

/// Errors surfaced by the gateway and the consumers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Broker(#[from] MessageError),
}

impl ServiceError {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.http_status_code();
        let body = match self {
            ServiceError::InvalidArgument(message) => message,
            ServiceError::Broker(error) => error.to_string(),
        };
        (status, body).into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            ServiceError::InvalidArgument("empty".to_string()).http_status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Broker(MessageError::Producer("down".to_string())).http_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_broker_error_is_not_wrapped() {
        let error: ServiceError = MessageError::Connection("refused".to_string()).into();
        assert_eq!(error.to_string(), "Connection error: refused");
    }
}
