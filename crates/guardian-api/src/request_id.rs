//! Request correlation ids.
//!
//! Every request carries an id: the caller's `x-request-id` when it sends a
//! usable one, otherwise a fresh `req_` ULID. The id is echoed on the
//! response, attached to the request's tracing span, and copied into any
//! [`ApiError`](crate::error::ApiError) body produced while handling it.

use axum::extract::Request;
use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const REQUEST_ID_PREFIX: &str = "req_";
const MAX_REQUEST_ID_LEN: usize = 128;

tokio::task_local! {
    static CURRENT: String;
}

/// Request id of the request being handled on this task, if any.
#[must_use]
pub fn current() -> Option<String> {
    CURRENT.try_with(Clone::clone).ok()
}

fn from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// Middleware that assigns, scopes and echoes the request id.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = from_headers(request.headers())
        .unwrap_or_else(|| guardian_core::id::prefixed_ulid(REQUEST_ID_PREFIX));
    let span = tracing::info_span!("request", request_id = %request_id);

    let mut response = CURRENT
        .scope(request_id.clone(), next.run(request).instrument(span))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
