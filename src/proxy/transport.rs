//! Upstream transport
//!
//! Sends the outbound request to the target and follows redirects itself so
//! that the redirect rules are fixed here rather than left to the client.

use std::time::Duration;

use hyper::header::LOCATION;
use hyper::{Method, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::ProxyServerConfig;
use crate::error::{RelayError, Result};
use crate::proxy::headers::OutboundHeaders;
use crate::proxy::target::TargetUrl;

/// Request headers describing a body, dropped when a redirect turns the
/// request into a bodiless GET
const REQUEST_BODY_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
];

/// Credentials never carried across a cross-origin redirect
const CROSS_ORIGIN_SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Upstream transport handler
///
/// Holds only immutable client settings. Idle connections are not pooled, so
/// nothing from one request is visible to another.
#[derive(Clone)]
pub struct UpstreamTransport {
    client: reqwest::Client,
    max_redirects: usize,
}

impl UpstreamTransport {
    /// Create a transport from the server configuration
    pub fn new(config: &ProxyServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RelayError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
        })
    }

    /// Send a request to `target`, following redirects
    ///
    /// `body` is sent as-is; it is `None` for methods that must not carry one.
    /// Any network failure is reported as [`RelayError::Upstream`] carrying
    /// the original target href.
    #[instrument(skip_all, fields(method = %method, target_url = %target.href()))]
    pub async fn dispatch(
        &self,
        mut method: Method,
        target: &TargetUrl,
        mut headers: OutboundHeaders,
        mut body: Option<reqwest::Body>,
    ) -> Result<reqwest::Response> {
        let mut current = target.clone();
        let mut body_sent = false;
        let mut hops = 0;

        // Framing is recomputed by the client for the body actually sent
        headers.remove("transfer-encoding");
        if body.is_none() {
            headers.remove("content-length");
        }

        loop {
            headers.set_host(&current);

            let mut url = current.as_url().clone();
            url.set_fragment(None);

            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(headers.to_header_map());
            if let Some(b) = body.take() {
                request = request.body(b);
                body_sent = true;
            }

            let response = request
                .send()
                .await
                .map_err(|e| upstream_error(target, &e))?;

            let status = response.status();
            if !is_followed_redirect(status) {
                return Ok(response);
            }

            let Some(location) = response.headers().get(LOCATION) else {
                debug!(status = %status, "Redirect without Location, returning as final");
                return Ok(response);
            };

            hops += 1;
            if hops > self.max_redirects {
                warn!(hops = hops, "Redirect limit exceeded");
                return Err(RelayError::Upstream {
                    target: target.href().to_string(),
                    message: format!("too many redirects (limit {})", self.max_redirects),
                });
            }

            let location = location.to_str().map_err(|_| RelayError::Upstream {
                target: target.href().to_string(),
                message: "redirect Location is not valid UTF-8".to_string(),
            })?;
            let next = current
                .as_url()
                .join(location)
                .map_err(|e| RelayError::Upstream {
                    target: target.href().to_string(),
                    message: format!("invalid redirect Location {:?}: {}", location, e),
                })?;
            let next = TargetUrl::from_redirect(next).ok_or_else(|| RelayError::Upstream {
                target: target.href().to_string(),
                message: format!("redirect to unsupported scheme: {}", location),
            })?;

            if switches_to_get(status, &method) {
                method = Method::GET;
                body_sent = false;
                for name in REQUEST_BODY_HEADERS {
                    headers.remove(name);
                }
            } else if body_sent {
                // A streamed body cannot be replayed on the next hop
                warn!(status = %status, "Cannot replay streamed request body across redirect");
                return Err(RelayError::Upstream {
                    target: target.href().to_string(),
                    message: "cannot follow redirect with a streamed request body".to_string(),
                });
            }

            if next.as_url().origin() != current.as_url().origin() {
                for name in CROSS_ORIGIN_SENSITIVE_HEADERS {
                    headers.remove(name);
                }
            }

            debug!(
                status = %status,
                from = %current.href(),
                to = %next.href(),
                hop = hops,
                "Following redirect"
            );
            current = next;
        }
    }
}

/// Redirect statuses the transport follows
fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Whether a redirect downgrades the request to a bodiless GET
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => method != Method::GET && method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        _ => false,
    }
}

/// Convert a client failure into the upstream error for `target`,
/// keeping the full cause chain in the message
fn upstream_error(target: &TargetUrl, err: &reqwest::Error) -> RelayError {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    warn!(target_url = %target.href(), error = %message, "Upstream request failed");
    RelayError::Upstream {
        target: target.href().to_string(),
        message,
    }
}
