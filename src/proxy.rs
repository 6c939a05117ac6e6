// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// HTTP proxy surface
//
// Responsibilities:
// - Request body limit, enforced before any upstream call
// - Request forwarding via injected UpstreamClient trait
// - Hop-by-hop response header stripping
// - Health endpoint
// - Anthropic-shaped error bodies for transport failures

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Inbound request data forwarded to the upstream client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response to send back to the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: Body::from(body.into()),
        }
    }

    /// A JSON body with a matching content type.
    pub fn json(status: StatusCode, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::from_bytes(status, headers, body)
    }
}

/// Errors that can occur during upstream forwarding.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Anthropic error `type` plus the message shown to the client. Transport
    /// details stay in the logs.
    fn public_parts(&self) -> (&'static str, String) {
        match self {
            ProxyError::UpstreamFailure(_) => ("api_error", "upstream request failed".to_string()),
            ProxyError::UpstreamTimeout(_) => ("api_error", "upstream request timed out".to_string()),
            ProxyError::PayloadTooLarge { .. } => ("request_too_large", self.to_string()),
            ProxyError::InvalidRequest(_) => ("invalid_request_error", self.to_string()),
        }
    }
}

/// `{"type":"error","error":{"type":..., "message":...}}`
pub fn error_body(error_type: &str, message: &str) -> Vec<u8> {
    let body = serde_json::json!({
        "type": "error",
        "error": { "type": error_type, "message": message },
    });
    body.to_string().into_bytes()
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let (error_type, message) = self.public_parts();
        tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        let mut response = Response::new(Body::from(error_body(error_type, &message)));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over whatever forwards a request to the upstream and shapes
/// its response.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Header stripping
// ---------------------------------------------------------------------------

/// Connection-scoped headers that must not be relayed (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers. All other headers are preserved unchanged.
pub fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub max_body_bytes: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health -> 200 OK
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Proxy handler for every non-health path.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes) {
        return ProxyError::PayloadTooLarge {
            limit: state.max_body_bytes,
        }
        .into_response();
    }

    let body = match read_body(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };

    let proxy_req = ProxyRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };

    match state.upstream.forward(proxy_req).await {
        Ok(mut resp) => {
            strip_hop_by_hop_headers(&mut resp.headers);
            let mut response = Response::new(resp.body);
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Read the request body, failing as soon as it passes `limit`. Covers
/// chunked uploads that declare no length.
async fn read_body(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {e}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router: health endpoint plus a catch-all proxy.
///
/// The upstream client is injected, no side effects, no hard-coded clients.
pub fn build_router(upstream: Arc<dyn UpstreamClient>, max_body_bytes: usize) -> Router {
    let state = AppState {
        upstream,
        max_body_bytes,
    };

    Router::new()
        .route("/health", get(health))
        .fallback(proxy_handler)
        .with_state(state)
}

/// Default listen address. Always localhost, never 0.0.0.0.
pub const BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9810);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
