use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::AppState;

/// Browser requests from an origin outside the allowlist get a hard 403
/// instead of relying on the missing CORS header alone; requests without an
/// Origin header (server-to-server gateway callbacks, curl) pass through.
pub async fn origin_allowlist_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| origin_allowed(o, &state.config.allowed_origins))
            .unwrap_or(false);
        if !allowed {
            warn!("Rejected request from disallowed origin {:?}", origin);
            return Err(StatusCode::FORBIDDEN);
        }
    }

    Ok(next.run(request).await)
}

fn origin_allowed(origin: &str, allowed_origins: &[String]) -> bool {
    allowed_origins.iter().any(|allowed| allowed == origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Vec<String> {
        vec![
            "https://kazipesa.co.tz".to_string(),
            "https://www.kazipesa.co.tz".to_string(),
        ]
    }

    #[test]
    fn listed_origin_is_allowed() {
        assert!(origin_allowed("https://kazipesa.co.tz", &allowlist()));
        assert!(origin_allowed("https://www.kazipesa.co.tz", &allowlist()));
    }

    #[test]
    fn unlisted_origin_is_refused() {
        assert!(!origin_allowed("https://evil.example", &allowlist()));
        // Scheme and subdomain must match exactly.
        assert!(!origin_allowed("http://kazipesa.co.tz", &allowlist()));
        assert!(!origin_allowed("https://api.kazipesa.co.tz", &allowlist()));
        assert!(!origin_allowed("", &allowlist()));
    }
}
