use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

/// A fully buffered HTTP response as it travels through the gateway.
///
/// The same representation is stored in the cache, broadcast by the
/// coalescer, and written back to clients, so cloning must stay cheap:
/// the body is a [`Bytes`] handle and headers are reference-counted
/// internally by hyper.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Builds a plain-text response, used for locally generated errors
    /// (404, 429, 502).
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(message.into()),
        }
    }

    /// Approximate memory footprint of this response under a given cache
    /// key: key length + header octets + body length.
    pub fn approx_size(&self, key: &str) -> u64 {
        let mut size = key.len() as u64 + self.body.len() as u64;
        for name in self.headers.keys() {
            size += name.as_str().len() as u64;
            for value in self.headers.get_all(name) {
                size += value.len() as u64;
            }
        }
        size
    }
}
