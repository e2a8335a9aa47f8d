//! # HTTP Server
//!
//! Hyper/Tokio host for a [`RequestHandler`].
//! Implements graceful shutdown with signal handling.
//!
//! The server is the host side of the handler contract: it builds the
//! request, lets the handler write the response, and logs any failure the
//! handler reports after answering.

use crate::error::{Error, Result};
use crate::handler::RequestHandler;
use crate::request::Request;
use crate::response::ResponseHandle;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// HTTP server driving one request handler
pub struct Server {
    config: ServerConfig,
    handler: RequestHandler,
}

impl Server {
    /// Create a new Server instance with default configuration
    #[must_use]
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            config: ServerConfig::default(),
            handler,
        }
    }

    /// Bind the server to an address
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the server, stopping on Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound, or an IO
    /// error if accepting connections fails.
    pub async fn serve(&self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Start the server, stopping when `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound, or an IO
    /// error if accepting connections fails.
    pub async fn serve_with_shutdown(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let addr = self.config.address;
        let listener = bind(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve connections from an already bound `listener` until `shutdown`
    /// completes
    ///
    /// The configured address is ignored; everything else applies.
    ///
    /// # Errors
    ///
    /// Returns an IO error if accepting connections fails.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Server listening on http://{}", addr);

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let handler = self.handler.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);

                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service_fn(move |req| {
                                let handler = handler.clone();
                                async move {
                                    let method = req.method().clone();
                                    let path = req.uri().path().to_string();
                                    let version = format!("{:?}", req.version());

                                    let response = handle_request(
                                        req,
                                        &handler,
                                        remote_addr,
                                        max_body_size,
                                    )
                                    .await;
                                    info!("    {} - \"{} {} {}\" {}",
                                        remote_addr,
                                        method,
                                        path,
                                        version,
                                        response.status()
                                    );
                                    Ok::<_, hyper::Error>(response)
                                }
                            }))
                            .await
                        {
                            error!("Error serving connection: {:?}", err);
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        Ok(())
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run `handler` for one request and log any failure it reports
///
/// Network agnostic: the hyper path and tests both go through here.
pub async fn run_handler(handler: &RequestHandler, request: Request) -> crate::response::Response {
    let method = request.method().to_string();
    let path = request.path().to_string();
    let res = ResponseHandle::new();

    if let Err(err) = handler(Arc::new(request), res.clone()).await {
        error!(method = %method, path = %path, error = %err, "Request handler failed");
        if !res.is_finished() {
            res.send_empty(500);
        }
    }
    res.snapshot()
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    handler: &RequestHandler,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    let mut request = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(r) => r,
        Err(e) => return reject(&e),
    };

    request.set_header("x-client-ip", &remote_addr.ip().to_string());
    run_handler(handler, request).await.into_hyper()
}

fn reject(err: &Error) -> Response<Full<Bytes>> {
    let status = if let Error::PayloadTooLarge { .. } = err {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        error!("Failed to parse request: {}", err);
        StatusCode::BAD_REQUEST
    };
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
