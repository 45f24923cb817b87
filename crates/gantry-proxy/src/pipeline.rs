//! The request pipeline.
//!
//! Every inbound request runs the same fixed sequence: route match, rate
//! limit, cache probe, coalesced (GET) or direct (non-GET) upstream call
//! through the circuit breaker, cache fill, metrics. Failures short-circuit
//! at the earliest applicable step and are mapped to HTTP responses here;
//! nothing in this path panics.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, warn};

use gantry_config::{ConfigStore, GatewayConfig, RouteSpec};
use gantry_core::{
    cache_key, CircuitBreaker, Coalescer, GatewayError, ProxyResponse, RateLimiter,
    ResponseCache, Result,
};
use gantry_metrics::Collector;

use crate::upstream::Upstream;

/// How long completed coalesce groups linger for stragglers.
const COALESCE_TTL: Duration = Duration::from_secs(60);

/// One inbound request, decoded from the transport.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Opaque client identity; the remote IP address by default.
    pub client_key: String,
}

/// The gateway data plane: owns the resilience primitives and applies
/// them to each request.
pub struct Pipeline {
    config: Arc<ConfigStore>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ResponseCache>,
    coalescer: Arc<Coalescer>,
    metrics: Arc<Collector>,
    upstream: Upstream,
}

impl Pipeline {
    /// Builds all components from the currently published snapshot.
    ///
    /// Component sizing (shard count, cache bounds, breaker thresholds,
    /// pool limits) is fixed at startup; route tables and enable flags are
    /// re-read from the snapshot on every request.
    pub fn from_store(config: Arc<ConfigStore>) -> Result<Self> {
        let snapshot = config.current();
        let limiter = Arc::new(RateLimiter::new(
            snapshot.rate_limit.num_shards,
            snapshot.rate_limit.default_rate_per_minute,
            snapshot.rate_limit.burst_size,
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            snapshot.circuit_breaker.failure_threshold,
            snapshot.circuit_breaker.success_threshold,
            snapshot.circuit_breaker.timeout_seconds,
            snapshot.circuit_breaker.health_decay,
        ));
        let cache = Arc::new(ResponseCache::new(
            snapshot.cache.capacity,
            snapshot.cache.max_size_mb,
        ));
        let upstream = Upstream::new(&snapshot.connection_pool, &snapshot.timeouts)?;

        Ok(Self {
            config,
            limiter,
            breaker,
            cache,
            coalescer: Arc::new(Coalescer::new(COALESCE_TTL)),
            metrics: Arc::new(Collector::new()),
            upstream,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<Collector> {
        &self.metrics
    }

    /// Runs one request through the pipeline. Always yields a response;
    /// every error kind is mapped to its HTTP status here.
    pub async fn handle(&self, ctx: RequestContext) -> ProxyResponse {
        let start = Instant::now();
        let config = self.config.current();

        let Some(route) = find_route(&config, &ctx.path, &ctx.method) else {
            let err = GatewayError::RouteNotFound {
                method: ctx.method.to_string(),
                path: ctx.path.clone(),
            };
            let response = ProxyResponse::text(StatusCode::NOT_FOUND, err.to_string());
            self.metrics
                .record_request(&ctx.path, start.elapsed(), response.status.as_u16(), false);
            return response;
        };

        if config.rate_limit.enabled {
            let decision = self
                .limiter
                .admit(&ctx.client_key, route.rate_limit_per_minute);
            if !decision.allowed {
                self.metrics.record_rate_limited();
                return rate_limited_response(&config, route, decision);
            }
        }

        let cacheable =
            ctx.method == Method::GET && route.enable_cache && config.cache.enabled;
        if cacheable {
            let key = cache_key(ctx.method.as_str(), &ctx.path, &ctx.query, &ctx.body);
            if let Some(cached) = self.cache.get(&key) {
                debug!(path = %ctx.path, "cache hit");
                self.metrics.record_request(
                    &route.path,
                    start.elapsed(),
                    cached.status.as_u16(),
                    true,
                );
                return cached;
            }
        }

        let outcome = if ctx.method == Method::GET {
            // Identical concurrent GETs share one upstream execution.
            let coalesce_key = format!("{}:{}:{}", ctx.method, ctx.path, ctx.query);
            self.coalescer
                .run(&coalesce_key, self.call_upstream(&config, route, &ctx))
                .await
        } else {
            self.call_upstream(&config, route, &ctx).await
        };

        match outcome {
            Ok(response) => {
                if cacheable && response.status == StatusCode::OK {
                    let key = cache_key(ctx.method.as_str(), &ctx.path, &ctx.query, &ctx.body);
                    if let Err(e) =
                        self.cache
                            .set(&key, response.clone(), config.cache.ttl_seconds)
                    {
                        debug!(path = %ctx.path, error = %e, "response not cached");
                    }
                }
                self.metrics.record_request(
                    &route.path,
                    start.elapsed(),
                    response.status.as_u16(),
                    false,
                );
                response
            }
            Err(err) => {
                warn!(path = %ctx.path, error = %err, "upstream call failed");
                let response = ProxyResponse::text(StatusCode::BAD_GATEWAY, err.to_string());
                self.metrics.record_request(
                    &route.path,
                    start.elapsed(),
                    response.status.as_u16(),
                    false,
                );
                response
            }
        }
    }

    async fn call_upstream(
        &self,
        config: &GatewayConfig,
        route: &RouteSpec,
        ctx: &RequestContext,
    ) -> Result<ProxyResponse> {
        let fut = self.upstream.forward(
            route,
            ctx.method.clone(),
            &ctx.path,
            &ctx.query,
            &ctx.headers,
            ctx.body.clone(),
        );
        if config.circuit_breaker.enabled {
            self.breaker.execute(fut).await
        } else {
            fut.await
        }
    }
}

/// Matches a route by exact path equality and method membership.
fn find_route<'a>(
    config: &'a GatewayConfig,
    path: &str,
    method: &Method,
) -> Option<&'a RouteSpec> {
    config
        .routes
        .iter()
        .find(|route| route.path == path && route.methods.iter().any(|m| m == method.as_str()))
}

fn rate_limited_response(
    config: &GatewayConfig,
    route: &RouteSpec,
    decision: gantry_core::Decision,
) -> ProxyResponse {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let retry_after = (decision.reset - now).max(1);
    let err = GatewayError::RateLimited {
        reset: decision.reset,
        retry_after,
    };
    let limit = if route.rate_limit_per_minute > 0 {
        route.rate_limit_per_minute
    } else {
        config.rate_limit.default_rate_per_minute
    };

    let mut response = ProxyResponse::text(StatusCode::TOO_MANY_REQUESTS, err.to_string());
    response
        .headers
        .insert("x-ratelimit-limit", HeaderValue::from(limit));
    response
        .headers
        .insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
        .headers
        .insert("x-ratelimit-reset", HeaderValue::from(decision.reset));
    response
        .headers
        .insert("retry-after", HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Decision;

    fn route(path: &str, methods: &[&str]) -> RouteSpec {
        RouteSpec {
            path: path.to_owned(),
            backend: "http://127.0.0.1:1".to_owned(),
            methods: methods.iter().map(|m| (*m).to_owned()).collect(),
            rate_limit_per_minute: 0,
            timeout_seconds: 1,
            enable_cache: false,
        }
    }

    fn config_with_routes(routes: Vec<RouteSpec>) -> GatewayConfig {
        GatewayConfig {
            routes,
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_find_route_exact_path_and_method() {
        let config = config_with_routes(vec![
            route("/api/users", &["GET", "POST"]),
            route("/api/orders", &["GET"]),
        ]);

        let matched = find_route(&config, "/api/users", &Method::POST).unwrap();
        assert_eq!(matched.path, "/api/users");
        assert!(find_route(&config, "/api/orders", &Method::POST).is_none());
        assert!(find_route(&config, "/api/users/42", &Method::GET).is_none());
    }

    #[test]
    fn test_find_route_no_prefix_matching() {
        let config = config_with_routes(vec![route("/api", &["GET"])]);
        assert!(find_route(&config, "/api/users", &Method::GET).is_none());
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let config = config_with_routes(vec![]);
        let r = route("/x", &["GET"]);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset: now + 7,
        };

        let response = rate_limited_response(&config, &r, decision);
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        // Route rate is 0, so the default limit is advertised.
        assert_eq!(response.headers["x-ratelimit-limit"], "1000");
        assert_eq!(response.headers["x-ratelimit-remaining"], "0");
        assert_eq!(
            response.headers["x-ratelimit-reset"],
            (now + 7).to_string().as_str()
        );
        let retry_after: i64 = response.headers["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((6..=7).contains(&retry_after));
    }

    #[test]
    fn test_rate_limited_response_uses_route_override() {
        let config = config_with_routes(vec![]);
        let mut r = route("/x", &["GET"]);
        r.rate_limit_per_minute = 42;
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset: 0,
        };

        let response = rate_limited_response(&config, &r, decision);
        assert_eq!(response.headers["x-ratelimit-limit"], "42");
    }
}
