//! Bearer token middleware

use super::{error::ApiError, ApiState};
use crate::error::AppError;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

/// Verifies the bearer token and stores the caller's `Principal` in the
/// request extensions.
pub async fn auth(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    let principal = state.verifier.verify(token)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
