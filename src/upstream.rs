//! Forwarding the (possibly rewritten) request to its resolved upstream.
//!
//! Grounded on `internal/gateway/gateway.go`'s use of Echo's
//! `middleware.ProxyWithConfig` (a stateless, no-retry reverse proxy) and
//! the teacher's `reqwest::Client::builder()` convention for outbound HTTP
//! ([`backend/mod.rs`]). Connection pooling lives entirely in the shared
//! `reqwest::Client`; this module holds no per-request state.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::error::{Error, Result};

/// Request/response headers that must not be forwarded across a proxy hop
/// (RFC 7230 §6.1 plus the `TE`/`Trailer` pair).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
];

/// `Host` is forwarded separately (rewritten to the upstream's authority per
/// [`crate::routing`]'s contract), never copied verbatim from the inbound request.
const HOST_HEADER: &str = "host";

/// Forwards requests to their resolved [`crate::config::Destination`] upstream.
pub struct UpstreamProxy {
    client: reqwest::Client,
}

impl UpstreamProxy {
    /// Build a proxy with a shared, pooled HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Forward `req` to `upstream`, passing the method, path, query, headers,
    /// and body through unchanged (the caller has already rewritten the
    /// query string, if needed). The upstream's status, headers, and body
    /// are returned unchanged, with no retries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the request cannot be sent or the
    /// response cannot be read.
    pub async fn forward(&self, req: Request, upstream: &Url) -> Result<Response> {
        let method = req.method().clone();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(ToString::to_string)
            .unwrap_or_default();
        let headers = req.headers().clone();
        let body = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|e| Error::Internal(format!("failed to buffer request body: {e}")))?;

        let mut target = upstream.clone();
        target.set_path("");
        let target = target
            .join(path_and_query.trim_start_matches('/'))
            .map_err(|e| Error::Internal(format!("invalid upstream target: {e}")))?;

        let upstream_host = target
            .host_str()
            .ok_or_else(|| Error::Internal(format!("upstream URL has no host: {target}")))?;
        let upstream_authority = match target.port() {
            Some(port) => format!("{upstream_host}:{port}"),
            None => upstream_host.to_string(),
        };

        let mut upstream_req = self
            .client
            .request(method, target)
            .header(HOST_HEADER, &upstream_authority);
        for (name, value) in headers.iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) || name.as_str() == HOST_HEADER {
                continue;
            }
            upstream_req = upstream_req.header(name, value);
        }
        let upstream_req = upstream_req.body(body);

        let upstream_resp = upstream_req.send().await.map_err(Error::Upstream)?;
        let status = StatusCode::from_u16(upstream_resp.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream_resp.headers() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) {
                response_headers.insert(name, value.clone());
            }
        }

        let body = upstream_resp.bytes().await.map_err(Error::Upstream)?;
        let mut response = (status, Body::from(body)).into_response();
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

impl Default for UpstreamProxy {
    fn default() -> Self {
        Self::new()
    }
}
