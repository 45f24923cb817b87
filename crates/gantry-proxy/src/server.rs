//! HTTP server for the gateway.
//!
//! One axum listener serves both the proxied routes (via the fallback
//! handler) and the administrative endpoints `/health` and `/metrics`.
//! Shutdown is graceful: on SIGINT/SIGTERM the listener stops accepting,
//! in-flight requests get a grace period to finish, then remaining
//! connections are closed.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use http::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use gantry_core::{BreakerState, GatewayError, ProxyResponse, Result};

use crate::pipeline::{Pipeline, RequestContext};

/// Maximum inbound payload size (10 MB), bounding per-request buffering.
const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// How long in-flight requests may keep running after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// HTTP server wrapping a [`Pipeline`].
pub struct GatewayServer {
    pipeline: Arc<Pipeline>,
}

impl GatewayServer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Builds the router: administrative endpoints plus the proxying
    /// fallback.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .layer(CorsLayer::permissive())
            .fallback(proxy)
            .with_state(Arc::clone(&self.pipeline))
    }

    /// Binds `addr` and serves until a shutdown signal arrives.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Listener(format!("failed to bind {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| GatewayError::Listener(e.to_string()))?;
        info!("gateway listening on {local}");
        self.serve(listener, SHUTDOWN_GRACE).await
    }

    /// Serves on an already bound listener. Exposed separately so tests
    /// can drive the server on an ephemeral port.
    pub async fn serve(self, listener: TcpListener, grace: Duration) -> Result<()> {
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("shutdown signal received; draining in-flight requests");
                let _ = shutdown_tx.send(true);
            })
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                result.map_err(|e| GatewayError::Listener(e.to_string()))?;
                info!("gateway stopped");
            }
            _ = drain_deadline(&mut shutdown_rx, grace) => {
                warn!("grace period elapsed; closing remaining connections");
            }
        }
        Ok(())
    }
}

/// Completes `grace` after the shutdown signal fires; pends forever if the
/// server ends without one.
async fn drain_deadline(shutdown_rx: &mut tokio::sync::watch::Receiver<bool>, grace: Duration) {
    if shutdown_rx.changed().await.is_ok() {
        tokio::time::sleep(grace).await;
    } else {
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install interrupt handler");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// GET /health
async fn health(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    let status = if pipeline.breaker().state() == BreakerState::Open {
        "degraded"
    } else {
        "healthy"
    };
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(json!({
        "status": status,
        "timestamp": timestamp,
    }))
}

/// GET /metrics
async fn metrics(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    Json(json!({
        "metrics": pipeline.metrics().snapshot(),
        "circuit_breaker": pipeline.breaker().stats(),
        "cache": pipeline.cache().stats(),
    }))
}

/// Fallback handler: every path without an administrative route is
/// proxied through the pipeline.
async fn proxy(
    State(pipeline): State<Arc<Pipeline>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_REQUEST_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return into_http(ProxyResponse::text(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body too large",
            ))
        }
    };

    let ctx = RequestContext {
        method: parts.method,
        path: parts.uri.path().to_owned(),
        query: parts.uri.query().unwrap_or_default().to_owned(),
        headers: parts.headers,
        body,
        client_key: remote.ip().to_string(),
    };

    into_http(pipeline.handle(ctx).await)
}

fn into_http(response: ProxyResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
