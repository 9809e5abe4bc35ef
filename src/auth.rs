use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

/// Bearer-token guard for the admin routes.
///
/// With no token configured the guard lets everything through; startup
/// logs a warning so the open state is visible. The comparison always
/// covers the full token length.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.admin_api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    match bearer_token(req.headers()) {
        Some(provided) if token_matches(expected, provided) => Ok(next.run(req).await),
        Some(_) => Err(ApiError::unauthorized("invalid token")),
        None => Err(ApiError::unauthorized("missing bearer token")),
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`. The scheme
/// keyword is case-insensitive; the token itself is not.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?;
    Some(token.trim())
}

fn token_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
