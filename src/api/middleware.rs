//! Request-id propagation and request metrics.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Id of the request being served, or `req-unknown` outside a request.
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| "req-unknown".to_string())
}

/// Client-supplied id when usable, otherwise `req-{uuid}`.
pub fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

/// Scopes the request id over the handler, bounds it by the request timeout,
/// echoes the id on the response and records the request in the HTTP metrics.
pub async fn request_context(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let request_id = resolve_request_id(request.headers());
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        route = %route,
    );

    let timeout = state.request_timeout;
    let mut response = REQUEST_ID
        .scope(request_id.clone(), async move {
            match tokio::time::timeout(timeout, next.run(request).instrument(span)).await {
                Ok(response) => response,
                Err(_) => ApiError::timeout().into_response(),
            }
        })
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    state
        .service
        .metrics()
        .record_http_request(&method, &route, status, started.elapsed());
    tracing::debug!(
        request_id = %request_id,
        method = %method,
        route = %route,
        status,
        duration_ms = started.elapsed().as_millis() as u64,
        "Request served"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_id_is_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" req-abc "));
        assert_eq!(resolve_request_id(&headers), "req-abc");
    }

    #[test]
    fn test_request_id_is_generated() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(""));
        let id = resolve_request_id(&headers);
        assert!(id.starts_with("req-"));
        assert_eq!(id.len(), "req-".len() + 36);
    }

    #[test]
    fn test_oversized_request_id_is_replaced() {
        let mut headers = HeaderMap::new();
        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert_ne!(resolve_request_id(&headers), long);
    }

    #[tokio::test]
    async fn test_current_request_id_inside_scope() {
        assert_eq!(current_request_id(), "req-unknown");
        let seen = REQUEST_ID
            .scope("req-1".to_string(), async { current_request_id() })
            .await;
        assert_eq!(seen, "req-1");
    }
}
