use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::auth::AuthError;
use crate::links::LinkError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP-facing error: a status and a message safe to show the caller
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, message)
        }
    }

    /// Log the cause and answer with a generic 500
    pub fn internal(context: &str, cause: &dyn std::fmt::Display) -> Self {
        error!(error = %cause, "{context}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::InvalidUrl(_) | LinkError::InvalidSlug(_) | LinkError::ReservedSlug => {
                Self::bad_request(err.to_string())
            }
            LinkError::SlugTaken => Self::new(StatusCode::CONFLICT, err.to_string()),
            LinkError::NotFound => Self::not_found(err.to_string()),
            LinkError::Storage(e) => Self::internal("Link storage failure", &e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::InvalidToken => {
                Self::unauthorized(err.to_string())
            }
            AuthError::Storage(_) | AuthError::Token(_) => {
                Self::internal("Authentication failure", &err)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection.body_text(), "Rejected request body");
        Self::bad_request("Invalid request body")
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        debug!(error = %rejection.body_text(), "Rejected path parameter");
        Self::bad_request("Invalid link id")
    }
}
