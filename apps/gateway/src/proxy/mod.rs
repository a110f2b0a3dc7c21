//! Reverse proxy for the reservation service.

pub mod director;

use axum::body::{self, Body};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::response::Response;
use axum::routing::any;
use axum::Router;

pub use director::ProxyDirector;

use crate::error::ApiError;
use crate::AppState;

/// Path prefixes served by the reservation service.
pub const PROXIED_PREFIXES: [&str; 5] = [
    "/v1/room",
    "/v1/reserve",
    "/v1/specificRoom",
    "/v1/equip",
    "/v1/issue",
];

/// Largest request body buffered for forwarding.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn router() -> Router<AppState> {
    PROXIED_PREFIXES
        .iter()
        .fold(Router::new(), |router, prefix| {
            router
                .route(prefix, any(forward))
                .route(&format!("{prefix}/{{*rest}}"), any(forward))
        })
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    state
        .proxy
        .direct(
            &mut parts.headers,
            &parts.uri,
            &state.config.session_key,
            &state.sessions,
        )
        .await;
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(header::HOST);

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = state.proxy.next_target();
    let url = format!("{target}{path}");

    let body = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::bad_request("Request body too large"))?;

    let upstream = state
        .http
        .request(parts.method, &url)
        .headers(parts.headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, %target, "upstream request failed");
            ApiError::bad_gateway("Upstream service unavailable")
        })?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let bytes = upstream.bytes().await.map_err(|e| {
        tracing::warn!(error = %e, %target, "upstream response interrupted");
        ApiError::bad_gateway("Upstream service unavailable")
    })?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
