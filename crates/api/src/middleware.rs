use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use cashbook_core::UserId;

use crate::context::RequestContext;

pub const USER_HEADER: &str = "x-user-id";

/// Parses the acting user out of `x-user-id` and stores a `RequestContext`.
///
/// A missing header is allowed here; write handlers refuse it. A header that
/// is present but not a UUID is rejected outright.
pub async fn acting_user_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let acting_user = extract_user(req.headers())?;
    req.extensions_mut().insert(RequestContext::new(acting_user));
    Ok(next.run(req).await)
}

fn extract_user(headers: &HeaderMap) -> Result<Option<UserId>, StatusCode> {
    let Some(header) = headers.get(USER_HEADER) else {
        return Ok(None);
    };

    let raw = header.to_str().map_err(|_| StatusCode::BAD_REQUEST)?.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse::<UserId>()
        .map(Some)
        .map_err(|_| StatusCode::BAD_REQUEST)
}
