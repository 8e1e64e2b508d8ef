//! cors-relay - CORS Forwarding Proxy
//!
//! A stateless HTTP proxy that forwards requests to the absolute URL embedded
//! in the request path and returns the response with permissive CORS headers.
//!
//! ## Features
//!
//! - `/<absolute-url>` forwarding for every HTTP method
//! - Hop-by-hop and platform-identity header stripping
//! - Streamed request and response bodies
//! - Redirect following with fixed method/body rules
//! - JSON error responses (400 for bad targets, 502 for upstream failures)

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
