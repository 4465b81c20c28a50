use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use snapsolve_core::SnapSolveError;

use crate::{ApiError, AppState};

/// Rejects the request before any handler (and therefore before any AI or
/// store call) when the bearer credential is missing or invalid. On success
/// the verified identity is made available as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| SnapSolveError::Unauthenticated("Authorization token required".into()))?
        .to_string();

    let user = state.verifier.verify(&token).await?;
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
