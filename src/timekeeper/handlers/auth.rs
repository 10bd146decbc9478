//! Bearer-token middleware for protected routes.

use crate::auth::TokenVerifier;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

/// Verify the `Authorization: Bearer` token and attach its claims to the
/// request. Any failure is a bare 401.
pub async fn require_bearer(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| TokenVerifier::extract_from_header(value.trim()))
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match verifier.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => {
            debug!("Rejected bearer token: {}", err);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
