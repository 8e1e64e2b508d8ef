use crate::error::{RelayError, Result};
use hyper::header::HeaderName;
use std::env;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy server configuration
    pub proxy: ProxyServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Port for the proxy server (default: 8787)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Value sent back in `X-Proxied-By`
    pub identity: String,
    /// Public origin used in usage hints, e.g. `https://relay.example.com`
    pub public_origin: Option<String>,
    /// Extra platform-identity headers stripped before forwarding (lowercase)
    pub strip_headers: Vec<String>,
    /// Upstream connect timeout in seconds
    pub connect_timeout: u64,
    /// Maximum number of redirects followed per request
    pub max_redirects: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            host: "0.0.0.0".to_string(),
            identity: "cors-relay".to_string(),
            public_origin: None,
            strip_headers: Vec::new(),
            connect_timeout: 10,
            max_redirects: 20,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            proxy: ProxyServerConfig {
                port: get_env_or("PROXY_PORT", "8787").parse().map_err(|_| {
                    RelayError::InvalidConfig("PROXY_PORT must be a valid port number".into())
                })?,
                host: get_env_or("PROXY_HOST", "0.0.0.0"),
                identity: get_env_or("PROXY_IDENTITY", "cors-relay"),
                public_origin: parse_public_origin()?,
                strip_headers: parse_strip_headers()?,
                connect_timeout: get_env_or("PROXY_CONNECT_TIMEOUT", "10")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig(
                            "PROXY_CONNECT_TIMEOUT must be a number of seconds".into(),
                        )
                    })?,
                max_redirects: get_env_or("PROXY_MAX_REDIRECTS", "20")
                    .parse()
                    .map_err(|_| {
                        RelayError::InvalidConfig(
                            "PROXY_MAX_REDIRECTS must be a valid number".into(),
                        )
                    })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the proxy server address
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy.host, self.proxy.port)
    }
}

fn parse_public_origin() -> Result<Option<String>> {
    let raw = env::var("PROXY_PUBLIC_ORIGIN").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|e| {
        RelayError::InvalidConfig(format!("PROXY_PUBLIC_ORIGIN must be a valid URL: {}", e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidConfig(format!(
            "PROXY_PUBLIC_ORIGIN has unsupported scheme: {}",
            url.scheme()
        )));
    }

    Ok(Some(url.origin().ascii_serialization()))
}

fn parse_strip_headers() -> Result<Vec<String>> {
    get_env_or("PROXY_STRIP_HEADERS", "")
        .split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .map(|name| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                RelayError::InvalidConfig(format!(
                    "PROXY_STRIP_HEADERS contains an invalid header name: {}",
                    name
                ))
            })?;
            Ok(name)
        })
        .collect()
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
