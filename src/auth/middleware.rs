use crate::auth::jwt::verify_token;
use crate::auth::Actor;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(token, state.config.jwt.secret.as_bytes()).map_err(|e| {
        tracing::debug!("Auth Middleware - rejected token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    let actor = Actor::from(&claims);
    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}
