//! Route handlers, grouped by API area.

pub mod auth;
pub mod similarity;

use axum::{
    Json,
    extract::{FromRequest, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::error::{Error, MetricsError, NonceStoreError, SessionError};
use crate::web::types::ErrorResponse;

/// Error returned by every handler. Renders as `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body extractor whose rejections use the `{success: false, error}`
/// envelope with status 400.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// The only body an authentication failure ever produces.
    pub fn verification_failed() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "verification failed".to_string(),
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "too many requests".to_string(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(e) => Self::bad_request(e.to_string()),
            other => {
                error!(error = %other, "Request failed");
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<NonceStoreError> for ApiError {
    fn from(err: NonceStoreError) -> Self {
        Error::from(err).into()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Error::from(err).into()
    }
}

impl From<MetricsError> for ApiError {
    fn from(err: MetricsError) -> Self {
        Error::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Host the request was addressed to, from the `Host` header.
pub(crate) fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
}

/// Browser origin, offered to the verifier as the message URI.
pub(crate) fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|o| o.starts_with("https://") || o.starts_with("http://"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, ValidationError};

    #[test]
    fn validation_errors_keep_their_message() {
        let err = ApiError::from(Error::from(ValidationError::InvalidAddress));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            err.message,
            "address must be a 0x-prefixed 40-hex Ethereum address"
        );
    }

    #[test]
    fn infrastructure_errors_are_generic() {
        let err = ApiError::from(Error::from(DatabaseError::Query(
            "relation identity does not exist".to_string(),
        )));
        assert_eq!(err, ApiError::internal());

        let err = ApiError::from(NonceStoreError::Unavailable("down".to_string()));
        assert_eq!(err.message, "internal error");
    }

    #[test]
    fn origin_must_be_http() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, "null".parse().expect("header"));
        assert_eq!(request_origin(&headers), None);
        headers.insert(header::ORIGIN, "https://app.example".parse().expect("header"));
        assert_eq!(request_origin(&headers), Some("https://app.example"));
    }
}
