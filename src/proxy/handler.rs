//! Proxy request handler
//!
//! Runs one inbound request through the forwarding pipeline: resolve the
//! target, filter headers, dispatch upstream and wrap the response.

use std::time::Instant;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ProxyServerConfig;
use crate::error::{RelayError, Result};
use crate::proxy::headers::HeaderFilter;
use crate::proxy::response::{BoxError, ProxyBody, ResponseWrapper};
use crate::proxy::target::{proxy_origin, Resolution, TargetResolver, TargetUrl};
use crate::proxy::transport::UpstreamTransport;

/// Proxy request handler
///
/// Everything it holds is read-only after construction; requests never see
/// each other's headers or bodies.
pub struct ProxyHandler {
    public_origin: Option<String>,
    listen_addr: String,
    filter: HeaderFilter,
    transport: UpstreamTransport,
    wrapper: ResponseWrapper,
}

impl ProxyHandler {
    pub fn new(config: &ProxyServerConfig) -> Result<Self> {
        Ok(Self {
            public_origin: config.public_origin.clone(),
            listen_addr: format!("{}:{}", config.host, config.port),
            filter: HeaderFilter::new(&config.strip_headers),
            transport: UpstreamTransport::new(config)?,
            wrapper: ResponseWrapper::new(&config.identity)?,
        })
    }

    /// Handle an incoming request
    ///
    /// Always produces a response; failures are turned into JSON errors.
    #[instrument(
        skip_all,
        fields(request_id = %Uuid::new_v4(), method = %req.method(), uri = %req.uri())
    )]
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let response = self.process(req).await;

        info!(
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn process<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if req.method() == Method::OPTIONS {
            return ResponseWrapper::preflight();
        }

        let origin = proxy_origin(
            self.public_origin.as_deref(),
            req.headers(),
            &self.listen_addr,
        );

        let target = match TargetResolver::resolve(req.uri(), &origin) {
            Ok(Resolution::Root) => return ResponseWrapper::greeting(),
            Ok(Resolution::Target(target)) => target,
            Err(e) => return error_response(&e),
        };

        match self.forward(req, &target).await {
            Ok(upstream) => {
                debug!(
                    upstream_status = upstream.status().as_u16(),
                    path = %target.path_and_query(),
                    "Upstream responded"
                );
                self.wrapper.wrap(upstream, &target)
            }
            Err(e) => error_response(&e),
        }
    }

    /// Forward the request to the target
    async fn forward<B>(&self, req: Request<B>, target: &TargetUrl) -> Result<reqwest::Response>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let headers = self.filter.filter(&parts.headers, target);

        let body = if carries_body(&parts.method) && !body.is_end_stream() {
            Some(reqwest::Body::wrap_stream(body.into_data_stream()))
        } else {
            None
        };

        debug!(
            target_url = %target.href(),
            header_count = headers.len(),
            has_body = body.is_some(),
            "Forwarding request"
        );

        self.transport
            .dispatch(parts.method, target, headers, body)
            .await
    }
}

/// Log a failure at the level its status warrants and render it
fn error_response(err: &RelayError) -> Response<ProxyBody> {
    if err.is_server_error() {
        error!(error = %err, kind = err.kind(), "Request failed");
    } else if err.is_client_error() {
        warn!(error = %err, kind = err.kind(), "Request rejected");
    }
    ResponseWrapper::error(err)
}

/// Check if the method may carry a request body upstream
pub fn carries_body(method: &Method) -> bool {
    method != Method::GET && method != Method::HEAD
}
