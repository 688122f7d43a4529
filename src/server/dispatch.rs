//! Per-request dispatch: event → handler → adapted response.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{RawPathParams, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::context::InvocationContext;
use crate::error::SpaError;
use crate::event::InvocationEvent;
use crate::response::adapt;
use crate::routes::BoundRoute;

/// Settings shared by every dispatched request of one server generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    pub handler_timeout: Option<Duration>,
    /// Trust `X-Forwarded-For` for the client address.
    pub proxy_headers: bool,
}

/// First address listed in `X-Forwarded-For`, if any.
pub fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// HTTP status a dispatch error is reported with.
pub fn error_status(err: &SpaError) -> StatusCode {
    match err {
        SpaError::HandlerTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SpaError::InvalidStatusCode(..) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &SpaError) -> Response {
    let status = error_status(err);
    let message = match status {
        StatusCode::GATEWAY_TIMEOUT => "Endpoint request timed out",
        StatusCode::BAD_GATEWAY => "Malformed handler response",
        _ => "Internal Server Error",
    };
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

/// Resolved path parameters keyed by the names the descriptor declared.
///
/// Captures are matched to names by position; a failed extraction yields an
/// empty mapping.
fn path_parameters(route: &BoundRoute, raw: Option<RawPathParams>) -> BTreeMap<String, String> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    route
        .param_names
        .iter()
        .cloned()
        .zip(raw.iter().map(|(_, value)| value.to_string()))
        .collect()
}

pub(crate) async fn dispatch(
    route: Arc<BoundRoute>,
    options: DispatchOptions,
    raw_params: Option<RawPathParams>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(endpoint = %route.endpoint, error = %e, "failed to read request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": "Bad Request" })),
            )
                .into_response();
        }
    };

    let mut event =
        InvocationEvent::from_request(&parts, &bytes, path_parameters(&route, raw_params));
    if options.proxy_headers {
        if let Some(client) = forwarded_client(&parts.headers) {
            event.request_context.http.source_ip = client;
        }
    }
    let context = InvocationContext::mock();

    let call = route.handler.invoke(&route.endpoint, event, context);
    let result = match options.handler_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SpaError::HandlerTimeout(route.endpoint.clone())),
        },
        None => call.await,
    };

    match result.and_then(|r| adapt(&route.endpoint, r)) {
        Ok(adapted) => {
            tracing::debug!(
                endpoint = %route.endpoint,
                method = %parts.method,
                path = %parts.uri.path(),
                status = adapted.status.as_u16(),
                duration_ms = %start.elapsed().as_millis(),
                "request dispatched"
            );
            adapted.into_response()
        }
        Err(e) => {
            tracing::error!(
                endpoint = %route.endpoint,
                method = %parts.method,
                error = %e,
                duration_ms = %start.elapsed().as_millis(),
                "handler invocation failed"
            );
            error_response(&e)
        }
    }
}
