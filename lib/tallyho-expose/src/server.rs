use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    task::{ready, Context, Poll},
};

use anyhow::Context as _;
use http::{header, Method, Request, Response, StatusCode};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
};
use tallyho_aggregate::Registry;
use tokio::{net::TcpListener, select, sync::oneshot};
use tracing::{debug, error, info};

use crate::render::{render_registry, CONTENT_TYPE};

/// An HTTP server that answers Prometheus scrapes with the current state of a registry.
///
/// The payload is rendered at scrape time, so every response reflects live registry state.
///
/// ## Missing
///
/// - Graceful shutdown (shutdown of the server itself can be triggered, but not individual connections)
pub struct ScrapeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Registry,
}

impl ScrapeServer {
    /// Binds the scrape endpoint to the given address.
    ///
    /// Binding to port zero picks an ephemeral port, which can be queried afterwards via
    /// [`local_addr`][Self::local_addr].
    ///
    /// # Errors
    ///
    /// If the listener cannot be bound, an error is returned.
    pub async fn bind(listen_addr: SocketAddr, registry: Registry) -> Result<Self, anyhow::Error> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind scrape listener to {}", listen_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to query local listener address")?;

        Ok(Self {
            listener,
            local_addr,
            registry,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving scrapes.
    ///
    /// Returns a handle for triggering shutdown of the server, and a handle that resolves if the
    /// server stops due to an error.
    pub fn listen(self) -> (ShutdownHandle, ErrorHandle) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();

        let Self {
            listener,
            local_addr,
            registry,
        } = self;

        let conn_builder = Builder::new(TokioExecutor::new());
        let service = service_fn(move |request: Request<Incoming>| {
            let registry = registry.clone();
            async move { handle_scrape(&registry, &request) }
        });

        tokio::spawn(async move {
            info!(listen_addr = %local_addr, "Scrape server started.");

            loop {
                select! {
                    result = listener.accept() => match result {
                        Ok((stream, _)) => {
                            let service = service.clone();
                            let conn_builder = conn_builder.clone();

                            tokio::spawn(async move {
                                if let Err(e) = conn_builder.serve_connection(TokioIo::new(stream), service).await {
                                    error!(%local_addr, error = %e, "Failed to serve HTTP connection.");
                                }
                            });
                        },
                        Err(e) => {
                            let _ = error_tx.send(anyhow::Error::new(e).context("failed to accept connection"));
                            break;
                        }
                    },

                    _ = &mut shutdown_rx => {
                        debug!(listen_addr = %local_addr, "Received shutdown signal.");
                        break;
                    }
                }
            }

            info!(listen_addr = %local_addr, "Scrape server stopped.");
        });

        (ShutdownHandle(shutdown_tx), ErrorHandle(error_rx))
    }
}

fn handle_scrape(registry: &Registry, request: &Request<Incoming>) -> Result<Response<String>, http::Error> {
    if request.method() == Method::GET && request.uri().path() == "/metrics" {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(render_registry(registry))
    } else {
        Response::builder().status(StatusCode::NOT_FOUND).body(String::new())
    }
}

/// Handle for triggering shutdown of a running [`ScrapeServer`].
pub struct ShutdownHandle(oneshot::Sender<()>);

impl ShutdownHandle {
    /// Signals the server to stop accepting connections and shut down.
    pub fn shutdown(self) {
        let _ = self.0.send(());
    }
}

/// Handle that resolves if a running [`ScrapeServer`] stops due to an error.
pub struct ErrorHandle(oneshot::Receiver<anyhow::Error>);

impl Future for ErrorHandle {
    type Output = Option<anyhow::Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.0).poll(cx)) {
            Ok(err) => Poll::Ready(Some(err)),
            Err(_) => Poll::Ready(None),
        }
    }
}
