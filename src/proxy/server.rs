//! Proxy server implementation using hyper
//!
//! Accepts connections and hands every request to the proxy handler.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::ProxyServerConfig;
use crate::error::Result;
use crate::proxy::handler::ProxyHandler;

/// Proxy server
pub struct ProxyServer {
    config: ProxyServerConfig,
    handler: Arc<ProxyHandler>,
}

impl ProxyServer {
    /// Create a new proxy server
    pub fn new(config: ProxyServerConfig) -> Result<Self> {
        let handler = Arc::new(ProxyHandler::new(&config)?);
        Ok(Self { config, handler })
    }

    /// Bind the configured address and run until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Proxy server listening on {}", listener.local_addr()?);

        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, client_addr, handler).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    ///
    /// Dropping the connection drops the in-flight handler future, which
    /// releases the upstream request with it.
    #[instrument(skip(stream, handler), fields(client = %client_addr))]
    async fn handle_connection(
        stream: TcpStream,
        client_addr: SocketAddr,
        handler: Arc<ProxyHandler>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        http1::Builder::new().serve_connection(io, service).await?;

        Ok(())
    }
}
