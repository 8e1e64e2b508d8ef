//! Response construction
//!
//! Every response the relay sends is built here: the CORS-decorated upstream
//! response, preflight answers, the root greeting and JSON error bodies.

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
    CONTENT_TYPE,
};
use hyper::Response;
use tracing::error;

use crate::error::{RelayError, Result};
use crate::proxy::target::TargetUrl;

/// Boxed error type carried by streamed bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the relay returns
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
pub const PREFLIGHT_MAX_AGE: &str = "86400";
pub const GREETING: &str = "Hello World";

pub const X_PROXIED_BY: &str = "x-proxied-by";
pub const X_TARGET_URL: &str = "x-target-url";

/// Framing headers of the upstream connection, re-derived by the server
const UPSTREAM_FRAMING_HEADERS: &[&str] = &["connection", "keep-alive", "transfer-encoding"];

/// Decorates upstream responses with CORS and diagnostic headers
#[derive(Debug, Clone)]
pub struct ResponseWrapper {
    identity: HeaderValue,
}

impl ResponseWrapper {
    /// Create a wrapper announcing itself as `identity` in `X-Proxied-By`
    pub fn new(identity: &str) -> Result<Self> {
        let identity = HeaderValue::from_str(identity).map_err(|_| {
            RelayError::InvalidConfig(format!(
                "PROXY_IDENTITY is not a valid header value: {:?}",
                identity
            ))
        })?;
        Ok(Self { identity })
    }

    /// Wrap a successful upstream response
    ///
    /// Status and headers are preserved, the CORS and diagnostic headers are
    /// overlaid and the body is streamed through as it arrives.
    pub fn wrap(&self, upstream: reqwest::Response, target: &TargetUrl) -> Response<ProxyBody> {
        let status = upstream.status();

        let mut headers = HeaderMap::with_capacity(upstream.headers().len() + 5);
        for (name, value) in upstream.headers() {
            if UPSTREAM_FRAMING_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        apply_cors(&mut headers);
        headers.insert(HeaderName::from_static(X_PROXIED_BY), self.identity.clone());
        match HeaderValue::from_str(target.href()) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(X_TARGET_URL), value);
            }
            Err(e) => error!(target_url = %target.href(), error = %e, "Target URL is not a valid header value"),
        }

        let stream = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| Box::new(e) as BoxError);

        let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Answer a CORS preflight request
    pub fn preflight() -> Response<ProxyBody> {
        let mut response = Response::new(empty());
        apply_cors(response.headers_mut());
        response.headers_mut().insert(
            ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(PREFLIGHT_MAX_AGE),
        );
        response
    }

    /// Plain-text greeting served for the root path
    pub fn greeting() -> Response<ProxyBody> {
        let mut response = Response::new(full(GREETING));
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Convert a failure into its JSON error response
    pub fn error(err: &RelayError) -> Response<ProxyBody> {
        let body = serde_json::to_vec(&err.payload()).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize error payload");
            br#"{"error":"Proxy Error"}"#.to_vec()
        });

        let mut response = Response::new(full(body));
        *response.status_mut() = err.status_code();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }
}

/// Overlay the permissive CORS headers
fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
}

fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use serde_json::Value;

    async fn body_bytes(response: Response<ProxyBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_preflight_response() {
        let response = ResponseWrapper::preflight();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "*");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_greeting_response() {
        let response = ResponseWrapper::greeting();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_bytes(response).await, "Hello World");
    }

    #[tokio::test]
    async fn test_error_response_status_and_body() {
        let response = ResponseWrapper::error(&RelayError::Upstream {
            target: "https://down.example.com/".to_string(),
            message: "connection refused".to_string(),
        });

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "Proxy Error");
        assert_eq!(body["message"], "connection refused");
        assert_eq!(body["target"], "https://down.example.com/");
    }

    #[tokio::test]
    async fn test_invalid_protocol_is_bad_request() {
        let response = ResponseWrapper::error(&RelayError::InvalidProtocol);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], "Invalid Protocol");
    }

    #[test]
    fn test_identity_must_be_header_safe() {
        assert!(ResponseWrapper::new("cors-relay").is_ok());
        assert!(matches!(
            ResponseWrapper::new("bad\nidentity"),
            Err(RelayError::InvalidConfig(_))
        ));
    }
}
