//! TCP accept loop and per-connection HTTP serving

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::connection_pool::{ConnectionGuard, ConnectionLimiter};
use super::shutdown::ShutdownListener;
use super::SHUTDOWN_TIMEOUT_MS;
use crate::app::App;
use crate::sweeper;
use crate::Result;

/// Bound listener serving one `App`
pub struct Server {
    listener: TcpListener,
    app: Arc<App>,
    limiter: ConnectionLimiter,
}

impl Server {
    /// Bind the configured listen address
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or cannot be bound
    pub async fn bind(app: Arc<App>) -> Result<Self> {
        let addr = app.config().socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let limiter = ConnectionLimiter::new(app.config().limits.max_connections);

        Ok(Self {
            listener,
            app,
            limiter,
        })
    }

    /// Address actually bound (resolves port 0)
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Application served by this listener
    #[must_use]
    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Serve until SIGINT or the application's shutdown signal
    ///
    /// # Errors
    ///
    /// Returns error only if the server cannot start
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Listening on {}", addr);

        let shutdown = self.app.shutdown().clone();
        let mut shutdown_rx = shutdown.listener();
        let sweeper = tokio::spawn(sweeper::run_sweeper(
            Arc::clone(&self.app),
            shutdown.listener(),
        ));

        let header_timeout = Duration::from_secs(self.app.config().limits.header_read_timeout_secs);
        let mut connections = JoinSet::new();

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let Some(guard) = self.limiter.try_acquire() else {
                            warn!("Connection limit reached, rejecting {}", peer);
                            drop(stream);
                            continue;
                        };

                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            Arc::clone(&self.app),
                            guard,
                            header_timeout,
                            shutdown.listener(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                () = shutdown_rx.wait() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Stop accepting, then release every live viewer
        drop(self.listener);
        shutdown.trigger();
        let closed = self.app.registry().close_everything();
        if closed > 0 {
            info!("Closed {} live viewers", closed);
        }

        let drained = tokio::time::timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS), async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "{} connections still open after shutdown timeout",
                connections.len()
            );
            connections.abort_all();
        }

        if let Err(e) = sweeper.await {
            warn!("Sweeper task failed: {}", e);
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Arc<App>,
    _guard: ConnectionGuard,
    header_timeout: Duration,
    mut shutdown: ShutdownListener,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request| {
        let app = Arc::clone(&app);
        async move { Ok::<_, Infallible>(app.handle(request, peer).await) }
    });

    let connection = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(header_timeout)
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        debug!("Connection from {} ended with error: {}", peer, e);
    }
}
