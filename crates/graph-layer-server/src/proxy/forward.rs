//! Request forwarding.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, Method, header, request::Parts},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use graph_layer_token::{Token, TokenManager};
use http_body_util::LengthLimitError;

use super::access_log::{AccessLog, AccessRecord};
use super::filter::PathFilter;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::upstream::UpstreamClient;

/// Request headers copied to the upstream request.
const FORWARDED_HEADERS: [HeaderName; 5] = [
    header::ACCEPT,
    header::ACCEPT_ENCODING,
    header::ACCEPT_LANGUAGE,
    header::CACHE_CONTROL,
    header::PRAGMA,
];

/// Upstream response headers not relayed to the client.
const DROPPED_HEADERS: [&str; 4] = ["server", "transfer-encoding", "connection", "keep-alive"];

pub(crate) struct ProxyState {
    pub(crate) config: ProxyConfig,
    pub(crate) filter: PathFilter,
    pub(crate) manager: TokenManager,
    pub(crate) upstream: UpstreamClient,
    pub(crate) access_log: Arc<dyn AccessLog>,
}

/// Proxy handler for every method and path under the base path.
pub(crate) async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let client = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let mut record = AccessRecord::start(
        Arc::clone(&state.access_log),
        client,
        parts.method.as_str(),
        uri,
    );

    match proxy(&state, &parts, body).await {
        Ok(upstream) => relay(upstream, record),
        Err(e) => {
            let response = e.into_response();
            record.set_status(response.status().as_u16());
            response
        }
    }
}

/// Path relative to the base path, always starting with `/`.
fn relative_path<'a>(base_path: &str, path: &'a str) -> &'a str {
    let relative = path.strip_prefix(base_path).unwrap_or(path);
    if relative.is_empty() { "/" } else { relative }
}

/// Value of cookie `name` from any `Cookie` header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn resolve_token(state: &ProxyState, headers: &HeaderMap) -> Result<Token, ProxyError> {
    // A present header selects the anonymous identity even when its value is unusable.
    if let Some(value) = headers.get(state.config.anonymous_header.as_str()) {
        let app_id = value.to_str().map(str::trim).unwrap_or_default();
        if app_id.is_empty() {
            return Err(ProxyError::Unauthorized(format!(
                "Empty {} header",
                state.config.anonymous_header
            )));
        }
        return Ok(state.manager.get_anonymous_token(app_id).await?);
    }

    if let Some(token_id) = cookie_value(headers, &state.config.cookie_name) {
        return Ok(state.manager.get_user_token(&token_id).await?);
    }

    Err(ProxyError::Unauthorized(
        "No session cookie or application header".to_string(),
    ))
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn upstream_method(method: &Method) -> Result<reqwest::Method, ProxyError> {
    match *method {
        Method::GET => Ok(reqwest::Method::GET),
        Method::POST => Ok(reqwest::Method::POST),
        Method::PUT => Ok(reqwest::Method::PUT),
        Method::PATCH => Ok(reqwest::Method::PATCH),
        Method::DELETE => Ok(reqwest::Method::DELETE),
        _ => Err(ProxyError::UnsupportedMethod(method.to_string())),
    }
}

async fn proxy(
    state: &ProxyState,
    parts: &Parts,
    body: Body,
) -> Result<reqwest::Response, ProxyError> {
    let path = relative_path(&state.config.base_path, parts.uri.path());
    if !state.filter.allows(path) {
        return Err(ProxyError::NotFound(path.to_string()));
    }

    let token = resolve_token(state, &parts.headers).await?;
    let method = upstream_method(&parts.method)?;

    let target = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut request = state
        .upstream
        .http()
        .request(method.clone(), state.upstream.url_for(&target))
        .header(header::AUTHORIZATION, token.payload().authorization());

    for name in &FORWARDED_HEADERS {
        for value in parts.headers.get_all(name) {
            request = request.header(name, value);
        }
    }

    if method != reqwest::Method::GET && method != reqwest::Method::DELETE {
        if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        let limit = state.config.max_body_size;
        let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
            if is_length_limit(&e) {
                ProxyError::PayloadTooLarge(limit)
            } else {
                ProxyError::Internal(format!("Failed to read request body: {}", e))
            }
        })?;
        request = request.body(bytes);
    }

    tracing::debug!(method = %method, path, app_id = token.app_id(), "Forwarding request");
    request
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Upstream request failed: {}", e)))
}

/// Relay status, headers and a streamed body; the access record is written
/// once the body stream finishes or is dropped.
fn relay(upstream: reqwest::Response, mut record: AccessRecord) -> Response {
    let status = upstream.status();
    record.set_status(status.as_u16());

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !DROPPED_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut chunks = upstream.bytes_stream();
    let stream = async_stream::stream! {
        let mut record = record;
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    record.add_bytes(bytes.len());
                    yield Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream body stream failed");
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
