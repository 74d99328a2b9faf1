use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::AppState;

const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Guards the review dashboard and catalogue-admin routes. The token is a
/// shared secret from config; full operator auth is out of scope.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = match headers.get(ADMIN_TOKEN_HEADER) {
        Some(value) => match value.to_str() {
            Ok(token) => token,
            Err(_) => {
                warn!("Malformed {} header", ADMIN_TOKEN_HEADER);
                return Err(StatusCode::BAD_REQUEST);
            }
        },
        None => {
            warn!("Missing {} header on admin route", ADMIN_TOKEN_HEADER);
            return Err(StatusCode::FORBIDDEN);
        }
    };

    if provided != state.config.admin_token {
        warn!("Rejected admin request with invalid token");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
