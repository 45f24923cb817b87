//! Upstream forwarding.
//!
//! Builds the outbound request for a matched route: resolves the target
//! URL against the route's backend, strips hop-by-hop headers, applies the
//! per-route deadline and buffers the full response body.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};

use gantry_config::{PoolSettings, RouteSpec, TimeoutSettings};
use gantry_core::{GatewayError, ProxyResponse, Result};

/// Headers that apply to a single transport hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "upgrade",
];

/// Pooled HTTP client for upstream calls.
pub struct Upstream {
    client: reqwest::Client,
}

impl Upstream {
    /// Builds the shared client from connection-pool and timeout settings.
    pub fn new(pool: &PoolSettings, timeouts: &TimeoutSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool.max_idle)
            .pool_idle_timeout(Duration::from_secs(pool.idle_timeout))
            .timeout(Duration::from_secs(timeouts.total_seconds))
            .build()
            .map_err(|e| GatewayError::UpstreamTransport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forwards one request to the route's backend and buffers the
    /// response. The route timeout bounds the whole exchange, including
    /// the body read; its expiry is reported as a timeout, everything
    /// else as a transport error.
    pub async fn forward(
        &self,
        route: &RouteSpec,
        method: Method,
        path: &str,
        query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxyResponse> {
        let target = resolve_target(&route.backend, path, query)?;

        let mut outbound = headers.clone();
        for name in HOP_BY_HOP_HEADERS {
            outbound.remove(name);
        }
        // Host tracks the target URL and the client recomputes the body
        // length; stale values from the inbound request must not win.
        outbound.remove(http::header::HOST);
        outbound.remove(http::header::CONTENT_LENGTH);

        let response = self
            .client
            .request(method, target)
            .headers(outbound)
            .body(body)
            .timeout(Duration::from_secs(route.timeout_seconds))
            .send()
            .await
            .map_err(|e| classify(e, route.timeout_seconds))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        // The body is fully buffered; framing headers no longer apply.
        headers.remove(http::header::TRANSFER_ENCODING);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, route.timeout_seconds))?;

        Ok(ProxyResponse::new(status, headers, body))
    }
}

fn classify(err: reqwest::Error, timeout_seconds: u64) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout(timeout_seconds)
    } else {
        GatewayError::UpstreamTransport(err.to_string())
    }
}

/// Resolves `path` and `query` against the route's backend base URL.
fn resolve_target(backend: &str, path: &str, query: &str) -> Result<reqwest::Url> {
    let base = reqwest::Url::parse(backend)
        .map_err(|e| GatewayError::UpstreamInvalidUrl(format!("{backend}: {e}")))?;
    let mut target = base
        .join(path)
        .map_err(|e| GatewayError::UpstreamInvalidUrl(format!("{backend}{path}: {e}")))?;
    if !query.is_empty() {
        target.set_query(Some(query));
    }
    Ok(target)
}
