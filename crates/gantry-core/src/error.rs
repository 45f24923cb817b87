use thiserror::Error;

/// Errors produced by the gateway request path.
///
/// Every variant carries owned data (no borrowed sources) so that an error
/// can be cloned and fanned out to all waiters of a coalesced request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimited {
        /// Unix timestamp at which the client may retry
        reset: i64,
        /// Seconds until the client may retry
        retry_after: i64,
    },

    #[error("invalid upstream URL: {0}")]
    UpstreamInvalidUrl(String),

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("upstream timed out after {0}s")]
    UpstreamTimeout(u64),

    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("request coalescing timeout")]
    CoalesceTimeout,

    #[error("cache entry of {size} bytes exceeds cache limit of {max} bytes")]
    CacheTooLarge { size: u64, max: u64 },

    #[error("listener error: {0}")]
    Listener(String),
}

impl GatewayError {
    /// Whether this error counts as a timeout when classifying upstream
    /// outcomes for health tracking.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::UpstreamTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
