//! Cross-origin policy: CORS headers for allowed origins, 403 for the rest.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// CORS layer for the configured allow-list.
pub fn cors_layer(allowed: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed.iter().cloned()))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// Reject requests whose `Origin` is not on the allow-list.
///
/// Requests without an `Origin` header come from non-browser clients and pass.
pub async fn origin_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        if !state.origin_allowed(origin) {
            let shown = origin.to_str().unwrap_or("<non-ascii>").to_string();
            warn!(origin = %shown, path = %request.uri().path(), "Rejected cross-origin request");
            return ApiError::ForbiddenOrigin(shown).into_response();
        }
    }
    next.run(request).await
}
