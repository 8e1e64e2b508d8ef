//! Target URL resolution
//!
//! Extracts the destination URL embedded in the inbound request path and
//! validates it before anything is forwarded.

use hyper::header::HOST;
use hyper::{HeaderMap, Uri};
use tracing::debug;
use url::Url;

use crate::error::{RelayError, Result};

/// Example target appended to the proxy origin in usage hints
const USAGE_EXAMPLE: &str = "https://example.com";

/// A validated absolute http(s) URL the request is forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    url: Url,
}

impl TargetUrl {
    /// Canonical string form of the target
    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    /// Host as sent in the `Host` header, with the port when it is not the
    /// scheme default
    pub fn host(&self) -> String {
        host_header_value(&self.url)
    }

    /// Path plus query of the target
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Accept a redirect destination, which must stay on http(s)
    pub(crate) fn from_redirect(url: Url) -> Option<Self> {
        matches!(url.scheme(), "http" | "https").then_some(Self { url })
    }
}

/// Outcome of resolving an inbound request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Empty path: answered with the greeting, nothing is forwarded
    Root,
    /// A valid target to forward to
    Target(TargetUrl),
}

/// Resolves the target URL from inbound request URIs
pub struct TargetResolver;

impl TargetResolver {
    /// Resolve the target of an inbound request
    ///
    /// `origin` is the public origin of this proxy, used for the usage hint
    /// when the target cannot be parsed.
    pub fn resolve(uri: &Uri, origin: &str) -> Result<Resolution> {
        match Self::effective_target(uri) {
            None => Ok(Resolution::Root),
            Some(raw) => Self::parse(&raw, origin).map(Resolution::Target),
        }
    }

    /// Path without its leading `/`, followed by `?query` when one is present.
    /// Returns `None` when the path itself is empty.
    pub fn effective_target(uri: &Uri) -> Option<String> {
        let path = uri.path().strip_prefix('/').unwrap_or(uri.path());
        if path.is_empty() {
            return None;
        }

        Some(match uri.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", path, q),
            _ => path.to_string(),
        })
    }

    /// Parse and validate a raw target string
    pub fn parse(raw: &str, origin: &str) -> Result<TargetUrl> {
        let url = Url::parse(raw).map_err(|e| {
            debug!(target_url = %raw, error = %e, "Target is not an absolute URL");
            RelayError::InvalidUrl {
                usage: format!("{}/{}", origin, USAGE_EXAMPLE),
            }
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            debug!(scheme = %url.scheme(), "Rejecting non-http(s) target");
            return Err(RelayError::InvalidProtocol);
        }

        Ok(TargetUrl { url })
    }
}

/// Public origin of this proxy as seen by the caller
///
/// A configured origin wins; otherwise the inbound `Host` header is used,
/// falling back to the listener address.
pub fn proxy_origin(configured: Option<&str>, headers: &HeaderMap, fallback_host: &str) -> String {
    if let Some(origin) = configured {
        return origin.to_string();
    }

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or(fallback_host);

    format!("http://{}", host)
}

/// `host[:port]` of a URL, omitting the scheme's default port
fn host_header_value(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
