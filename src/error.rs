use std::collections::BTreeMap;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;
use uuid::Uuid;

use crate::outbox::StoreError;
use crate::types::{ApiErrorCode, ApiErrorResponse};

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    /// Per-field problems for schema validation failures.
    FieldValidation(BTreeMap<String, String>),
    Unauthorized(String),
    RateLimited {
        retry_after_seconds: u64,
    },
    NotFound(String),
    Conflict(String),
    Db(sqlx::Error),
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Db(err) => Self::Db(err),
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::NotFound(message) => Self::NotFound(message),
            StoreError::Parse(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut fields = None;
        let mut retry_after_seconds = None;
        let mut request_id = None;

        let (status, code, message) = match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, ApiErrorCode::Validation, message)
            }
            ApiError::FieldValidation(problems) => {
                fields = Some(problems);
                (
                    StatusCode::BAD_REQUEST,
                    ApiErrorCode::Validation,
                    "request validation failed".to_string(),
                )
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, ApiErrorCode::Unauthorized, message)
            }
            ApiError::RateLimited {
                retry_after_seconds: seconds,
            } => {
                retry_after_seconds = Some(seconds);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    ApiErrorCode::RateLimited,
                    "too many requests".to_string(),
                )
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, message)
            }
            ApiError::Conflict(message) => (StatusCode::CONFLICT, ApiErrorCode::Conflict, message),
            ApiError::Db(err) => {
                let id = Uuid::new_v4().to_string();
                error!(request_id = %id, error = %err, "database error");
                request_id = Some(id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorCode::Database,
                    "database error".to_string(),
                )
            }
            ApiError::Internal(message) => {
                let id = Uuid::new_v4().to_string();
                error!(request_id = %id, error = %message, "internal error");
                request_id = Some(id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorCode::Internal,
                    "internal error".to_string(),
                )
            }
        };

        let body = ApiErrorResponse {
            code,
            message,
            fields,
            retry_after_seconds,
            request_id,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
