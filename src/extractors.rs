//! Request extractors that turn axum's plain-text rejections into the
//! shared JSON error body.

use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, rejection::JsonRejection},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::ApiError;

pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(
        req: axum::http::Request<axum::body::Body>,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidJson(value)),
            Err(rejection) => Err(json_body_error(rejection)),
        }
    }
}

/// Phrases the rejection in terms of what the caller sent rather than
/// which axum extractor tripped.
fn json_body_error(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::validation("Content-Type must be application/json")
        }
        JsonRejection::JsonSyntaxError(err) => {
            ApiError::validation(format!("body is not valid JSON: {err}"))
        }
        JsonRejection::JsonDataError(err) => {
            ApiError::validation(format!("body does not match the expected shape: {err}"))
        }
        other => ApiError::validation(other.body_text()),
    }
}

pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ValidQuery(value)),
            Err(rejection) => Err(ApiError::validation(format!(
                "invalid query string: {}",
                rejection.body_text()
            ))),
        }
    }
}

/// Typed `:message_id` path segment for the admin routes.
#[derive(Debug, Clone, Copy)]
pub struct MessageId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for MessageId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::validation("message_id is missing from the path"))?;
        let id =
            Uuid::parse_str(&raw).map_err(|_| ApiError::validation("message_id must be a UUID"))?;
        Ok(MessageId(id))
    }
}
