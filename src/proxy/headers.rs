//! Outbound header construction
//!
//! Copies inbound headers into the outbound request, dropping hop-by-hop and
//! platform-identity headers, and points `Host` at the target.

use std::collections::BTreeMap;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::proxy::target::TargetUrl;

/// Headers never forwarded upstream: hop-by-hop plus the edge platform's
/// client-identity headers
pub const EXCLUDED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "cf-connecting-ip",
    "cf-ray",
    "cf-visitor",
];

/// Case-normalizing header map with last-value-wins inserts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundHeaders {
    entries: BTreeMap<String, HeaderValue>,
}

impl OutboundHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value under the same name
    pub fn set(&mut self, name: &str, value: HeaderValue) {
        self.entries.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point `Host` at the given target
    pub fn set_host(&mut self, target: &TargetUrl) {
        match HeaderValue::from_str(&target.host()) {
            Ok(value) => self.set("host", value),
            Err(e) => warn!(host = %target.host(), error = %e, "Target host is not a valid header value"),
        }
    }

    /// Convert into a header map for the transport
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            // Keys were validated as header names when they were read
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                map.insert(name, value.clone());
            }
        }
        map
    }
}

/// Builds outbound headers from inbound ones
#[derive(Debug, Clone)]
pub struct HeaderFilter {
    excluded: Vec<String>,
}

impl Default for HeaderFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl HeaderFilter {
    /// Create a filter excluding the built-in set plus `extra` names
    pub fn new(extra: &[String]) -> Self {
        let mut excluded: Vec<String> = EXCLUDED_HEADERS.iter().map(|h| h.to_string()).collect();
        for name in extra {
            let name = name.to_ascii_lowercase();
            if !excluded.contains(&name) {
                excluded.push(name);
            }
        }
        Self { excluded }
    }

    /// Check if a header must not be forwarded
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Build the outbound header set for a request to `target`
    pub fn filter(&self, inbound: &HeaderMap, target: &TargetUrl) -> OutboundHeaders {
        let mut outbound = OutboundHeaders::new();

        for (name, value) in inbound {
            if self.is_excluded(name.as_str()) {
                continue;
            }
            outbound.set(name.as_str(), value.clone());
        }

        outbound.set_host(target);
        outbound
    }
}
