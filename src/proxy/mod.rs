//! Proxy server implementation
//!
//! This module provides the forwarding pipeline:
//! - Target URL resolution from the request path
//! - Outbound header filtering
//! - Upstream dispatch with pinned redirect handling
//! - Response wrapping with CORS and diagnostic headers

pub mod handler;
pub mod headers;
pub mod response;
pub mod server;
pub mod target;
pub mod transport;

pub use handler::ProxyHandler;
pub use headers::{HeaderFilter, OutboundHeaders};
pub use response::{ProxyBody, ResponseWrapper};
pub use server::ProxyServer;
pub use target::{Resolution, TargetResolver, TargetUrl};
pub use transport::UpstreamTransport;
