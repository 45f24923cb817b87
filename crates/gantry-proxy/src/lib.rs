//! Gantry Proxy
//!
//! The gateway data plane: the request pipeline that composes route
//! matching, rate limiting, response caching, request coalescing and
//! circuit breaking, the upstream forwarder behind it, and the axum
//! server that exposes the proxied routes alongside the `/health` and
//! `/metrics` administrative endpoints.

pub mod pipeline;
pub mod server;
pub mod upstream;

pub use pipeline::{Pipeline, RequestContext};
pub use server::GatewayServer;
pub use upstream::Upstream;
