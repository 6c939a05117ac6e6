// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Engine: the relay between an Anthropic client and the configured upstream.
//
// Two routes, picked per request:
// - Passthrough: forward as-is, then repair streamed tool_use blocks and
//   normalize model ids when the upstream speaks Anthropic.
// - Translated: `/v1/messages` against an OpenAI-style upstream. The request
//   is mapped to a chat completion and the response is mapped back, streamed
//   or buffered.

use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::Read as _;

use crate::config::{Config, UpstreamFormat};
use crate::model_id::ModelNormalizer;
use crate::proxy::{ProxyError, ProxyRequest, ProxyResponse, UpstreamClient};
use crate::rewrite::{adapt_request_body, normalize_buffered_response};
use crate::stream::{RequiredParamsValidator, StreamProcessor, ToolCallValidator, ToolUseRepairer};
use crate::transform::{
    to_chat_request, transform_response, ChatCompletion, SseTranslator, StreamTransformer,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Path the Messages API is served on; the only path translated for an
/// OpenAI-style upstream.
const MESSAGES_PATH: &str = "/v1/messages";

// ---------------------------------------------------------------------------
// Request context for structured logging
// ---------------------------------------------------------------------------

struct RequestContext {
    request_id: String,
    format: UpstreamFormat,
    path: String,
    model: String,
    started: Instant,
}

impl RequestContext {
    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the upstream.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout_ms: Option<u64>,
    pub stream: bool,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl HttpBody {
    fn into_stream(self) -> ByteStream {
        match self {
            HttpBody::Full(bytes) => Box::pin(futures_util::stream::once(async move { Ok(bytes) })),
            HttpBody::Stream(s) => s,
        }
    }

    async fn collect(self) -> Result<Bytes, ProxyError> {
        match self {
            HttpBody::Full(b) => Ok(b),
            HttpBody::Stream(mut s) => {
                let mut collected = Vec::new();
                while let Some(chunk) = s.next().await {
                    let bytes = chunk.map_err(ProxyError::from)?;
                    collected.extend_from_slice(&bytes);
                }
                Ok(Bytes::from(collected))
            }
        }
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

impl From<HttpError> for ProxyError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub normalizer: Arc<ModelNormalizer>,
    pub validator: Arc<dyn ToolCallValidator>,
}

impl EngineDeps {
    /// Dependencies derived from `config` with the given transport.
    pub fn from_config(config: Arc<Config>, http: Arc<dyn HttpSender>) -> Self {
        let normalizer = Arc::new(ModelNormalizer::new(config.model_aliases.clone()));
        let validator = Arc::new(RequiredParamsValidator::new(config.required_params.clone()));
        Self {
            config,
            http,
            normalizer,
            validator,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineUpstreamClient
// ---------------------------------------------------------------------------

/// Upstream client that runs the relay pipeline.
pub struct EngineUpstreamClient {
    deps: EngineDeps,
}

impl EngineUpstreamClient {
    pub fn new_with(deps: EngineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl UpstreamClient for EngineUpstreamClient {
    async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let format = self.deps.config.upstream.format;
        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            format,
            path: request.uri.path().to_string(),
            model: extract_model(&request.body),
            started: Instant::now(),
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            format = %ctx.format,
            path = %ctx.path,
            model = %ctx.model,
            "processing request"
        );

        let translate = format == UpstreamFormat::OpenAi
            && request.method == Method::POST
            && ctx.path == MESSAGES_PATH;

        let result = if translate {
            self.forward_translated(request, &ctx).await
        } else {
            self.forward_passthrough(request, &ctx).await
        };

        match &result {
            Ok(resp) => tracing::info!(
                request_id = %ctx.request_id,
                format = %ctx.format,
                path = %ctx.path,
                model = %ctx.model,
                translated = translate,
                status = resp.status.as_u16(),
                latency_ms = ctx.elapsed_ms(),
                "request forwarded"
            ),
            Err(e) => tracing::warn!(
                request_id = %ctx.request_id,
                format = %ctx.format,
                path = %ctx.path,
                model = %ctx.model,
                error = %e,
                latency_ms = ctx.elapsed_ms(),
                "request failed"
            ),
        }
        result
    }
}

impl EngineUpstreamClient {
    /// Forward unchanged (apart from request adaptation and auth), then
    /// repair the response when the upstream speaks Anthropic.
    async fn forward_passthrough(
        &self,
        request: ProxyRequest,
        ctx: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let upstream_cfg = &self.deps.config.upstream;
        let anthropic = upstream_cfg.format == UpstreamFormat::Anthropic;

        let body = if anthropic {
            adapt_request_body(&request.body).unwrap_or_else(|| request.body.clone())
        } else {
            request.body.clone()
        };
        let stream = is_streaming_request(&body);

        // Host points at this relay; reqwest sets the upstream one from the
        // URL. Content-Length is recomputed for the possibly rewritten body.
        let mut headers = request.headers.clone();
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        // The repairer parses SSE lines, so the stream must arrive uncompressed.
        if anthropic && stream {
            headers.remove(header::ACCEPT_ENCODING);
        }
        self.inject_auth(&mut headers);

        let http_req = HttpRequest {
            method: request.method.clone(),
            url: build_upstream_url(&upstream_cfg.base_url, &request),
            headers,
            body,
            timeout_ms: Some(upstream_cfg.timeout_ms),
            stream,
        };

        let upstream = self.deps.http.send(http_req).await?;

        if !upstream.status.is_success() {
            return Ok(passthrough_raw(upstream));
        }

        if stream {
            if !anthropic {
                return Ok(passthrough_raw(upstream));
            }
            // Encoded SSE cannot be split into lines; relay it untouched.
            if let Some(encoding) = content_encoding(&upstream.headers) {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    encoding,
                    "streaming response has Content-Encoding; passing through without repair"
                );
                return Ok(passthrough_raw(upstream));
            }
            return Ok(self.repair_stream(upstream, ctx));
        }

        let mut resp_headers = upstream.headers;
        let body_bytes = upstream.body.collect().await?;
        let body_bytes = maybe_decompress(&mut resp_headers, body_bytes)?;
        let body_bytes = if anthropic {
            normalize_buffered_response(&body_bytes, &self.deps.normalizer).unwrap_or(body_bytes)
        } else {
            body_bytes
        };
        resp_headers.remove(header::CONTENT_LENGTH);

        Ok(ProxyResponse::from_bytes(upstream.status, resp_headers, body_bytes))
    }

    fn repair_stream(&self, upstream: HttpResponse, ctx: &RequestContext) -> ProxyResponse {
        tracing::debug!(request_id = %ctx.request_id, "repairing streamed tool_use blocks");
        let repairer = ToolUseRepairer::new(self.deps.normalizer.clone(), self.deps.validator.clone());
        let processed = StreamProcessor::new(Box::new(repairer)).process(upstream.body.into_stream());

        let mut headers = upstream.headers;
        headers.remove(header::CONTENT_LENGTH);
        ProxyResponse {
            status: upstream.status,
            headers,
            body: Body::from_stream(processed.map(Ok::<Bytes, std::io::Error>)),
        }
    }

    /// Map a Messages request to a chat completion, send it, and map the
    /// answer back into the Messages format.
    async fn forward_translated(
        &self,
        request: ProxyRequest,
        ctx: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let upstream_cfg = &self.deps.config.upstream;
        let chat = to_chat_request(&request.body, upstream_cfg.model.as_deref())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        let echo_model = self.deps.normalizer.normalize(&chat.client_model).to_string();
        let body = serde_json::to_vec(&chat.body)
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to encode upstream request: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(value) = self.translated_auth(&request.headers) {
            headers.insert(header::AUTHORIZATION, value);
        }

        let base = upstream_cfg.base_url.trim_end_matches('/');
        let http_req = HttpRequest {
            method: Method::POST,
            url: format!("{base}{}", upstream_cfg.chat_path),
            headers,
            body: Bytes::from(body),
            timeout_ms: Some(upstream_cfg.timeout_ms),
            stream: chat.stream,
        };

        let upstream = self.deps.http.send(http_req).await?;
        if !upstream.status.is_success() {
            return Ok(passthrough_raw(upstream));
        }

        let message_id = format!("msg_{}", Uuid::new_v4().simple());

        if chat.stream {
            tracing::debug!(request_id = %ctx.request_id, %message_id, "translating chat-completion stream");
            let transformer =
                StreamTransformer::new(message_id, echo_model, self.deps.config.loop_guard.threshold);
            let translator = SseTranslator::new(transformer);
            let processed =
                StreamProcessor::new(Box::new(translator)).process(upstream.body.into_stream());

            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            return Ok(ProxyResponse {
                status: StatusCode::OK,
                headers,
                body: Body::from_stream(processed.map(Ok::<Bytes, std::io::Error>)),
            });
        }

        let mut resp_headers = upstream.headers;
        let raw = upstream.body.collect().await?;
        let raw = maybe_decompress(&mut resp_headers, raw)?;

        let completion: ChatCompletion = match serde_json::from_slice(&raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    error = %e,
                    bytes = raw.len(),
                    "upstream completion is not valid JSON; passing through"
                );
                resp_headers.remove(header::CONTENT_LENGTH);
                return Ok(ProxyResponse::from_bytes(upstream.status, resp_headers, raw));
            }
        };

        let message = transform_response(completion, message_id, echo_model);
        let body = serde_json::to_vec(&message)
            .map_err(|e| ProxyError::UpstreamFailure(format!("failed to encode translated response: {e}")))?;
        Ok(ProxyResponse::json(StatusCode::OK, body))
    }

    /// Set the configured credential in the header the upstream expects.
    fn inject_auth(&self, headers: &mut HeaderMap) {
        let Some(token) = self.deps.config.upstream.auth_token.as_deref() else {
            return;
        };
        match self.deps.config.upstream.format {
            UpstreamFormat::Anthropic => match HeaderValue::from_str(token) {
                Ok(v) => {
                    headers.insert("x-api-key", v);
                }
                Err(_) => tracing::warn!("configured auth token is not a valid header value"),
            },
            UpstreamFormat::OpenAi => {
                if let Some(v) = bearer(token) {
                    headers.insert(header::AUTHORIZATION, v);
                }
            }
        }
    }

    /// Bearer credential for a translated request: the configured token, or
    /// else the key the Anthropic client sent.
    fn translated_auth(&self, client_headers: &HeaderMap) -> Option<HeaderValue> {
        if let Some(token) = self.deps.config.upstream.auth_token.as_deref() {
            return bearer(token);
        }
        if let Some(key) = client_headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            return bearer(key);
        }
        client_headers.get(header::AUTHORIZATION).cloned()
    }
}

fn bearer(token: &str) -> Option<HeaderValue> {
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("auth token is not a valid header value");
            None
        }
    }
}

/// Relay an upstream response without looking at its body.
fn passthrough_raw(upstream: HttpResponse) -> ProxyResponse {
    ProxyResponse {
        status: upstream.status,
        headers: upstream.headers,
        body: Body::from_stream(upstream.body.into_stream()),
    }
}

// ---------------------------------------------------------------------------
// Default HTTP sender (reqwest)
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        if let Some(timeout_ms) = request.timeout_ms {
            req = req.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let resp = req.send().await.map_err(classify_reqwest_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp.bytes_stream().map_err(classify_reqwest_error);
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp.bytes().await.map_err(classify_reqwest_error)?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Public factory for default engine client
// ---------------------------------------------------------------------------

pub fn build_engine_client(config: Arc<Config>) -> Result<EngineUpstreamClient, reqwest::Error> {
    let insecure = config.upstream.insecure_skip_tls_verify;
    if insecure {
        tracing::warn!(
            base_url = %config.upstream.base_url,
            "TLS certificate verification disabled for upstream"
        );
    }
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(insecure)
        .build()?;

    let deps = EngineDeps::from_config(config, Arc::new(ReqwestHttpSender::new(client)));
    Ok(EngineUpstreamClient::new_with(deps))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check if the response has gzip Content-Encoding.
fn is_gzip(headers: &HeaderMap) -> bool {
    content_encoding_is(headers, "gzip")
}

/// Check if the response has deflate Content-Encoding.
fn is_deflate(headers: &HeaderMap) -> bool {
    content_encoding_is(headers, "deflate")
}

fn content_encoding_is(headers: &HeaderMap, encoding: &str) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(encoding))
        .unwrap_or(false)
}

/// Content-Encoding other than `identity`, if the response carries one.
fn content_encoding(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("identity"))
}

fn decompress_with(mut decoder: impl std::io::Read, kind: &str) -> Result<Bytes, ProxyError> {
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ProxyError::UpstreamFailure(format!("{kind} decompression failed: {e}")))?;
    Ok(Bytes::from(decompressed))
}

/// Decompress body if Content-Encoding is set. Strips Content-Encoding and
/// Content-Length from headers (body size changed after decompression).
fn maybe_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, ProxyError> {
    let result = if is_gzip(headers) {
        decompress_with(GzDecoder::new(&body[..]), "gzip")?
    } else if is_deflate(headers) {
        decompress_with(DeflateDecoder::new(&body[..]), "deflate")?
    } else {
        return Ok(body);
    };
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    Ok(result)
}

fn build_upstream_url(base_url: &str, req: &ProxyRequest) -> String {
    let base = base_url.trim_end_matches('/');
    let path_and_query = req
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(req.uri.path());
    format!("{base}{path_and_query}")
}

fn extract_model(body: &Bytes) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("model")?.as_str().map(String::from))
        .unwrap_or_default()
}

fn is_streaming_request(body: &Bytes) -> bool {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    json.get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}
