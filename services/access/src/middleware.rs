//! Middleware guarding the internal API with a shared service token

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::warn;

use crate::AppState;

/// Require `Authorization: Bearer <service_token>` when a token is configured
pub async fn require_service_token(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.service_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    match bearer {
        Some(TypedHeader(Authorization(token))) if token.token() == expected => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            warn!("Rejected call to {} with a wrong service token", req.uri().path());
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
