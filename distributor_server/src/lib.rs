//! Distributor node server implementation
//!
//! Serves cached payloads over HTTP, downloading them from storage nodes on a miss, and runs the
//! periodic maintenance that keeps metadata and cache in sync.

mod all_paths;
pub mod background;
mod body;
pub mod builder;
mod http;
pub mod range;
pub mod service;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder as ConnectionBuilder, graceful::GracefulShutdown},
};
use iox_time::Time;
use observability_deps::tracing::{error, info, trace, warn};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::http::{HttpApi, route_request};

pub use background::{BackgroundTasks, MaintenanceConfig};
pub use builder::ServerBuilder;
pub use range::{ByteRange, RangeRequest};
pub use service::{Asset, AssetService, CacheStatus, HeadStatus, NotFoundReason, ServeError};

/// How long open connections get to finish once shutdown starts
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct CommonServerState {
    metrics: Arc<metric::Registry>,
    node_id: Arc<str>,
    started_at: Time,
}

impl CommonServerState {
    pub fn new(
        metrics: Arc<metric::Registry>,
        node_id: impl Into<Arc<str>>,
        started_at: Time,
    ) -> Self {
        Self {
            metrics,
            node_id: node_id.into(),
            started_at,
        }
    }

    pub fn metric_registry(&self) -> Arc<metric::Registry> {
        Arc::clone(&self.metrics)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[derive(Debug)]
pub struct Server {
    common_state: CommonServerState,
    http: Arc<HttpApi>,
    listener: TcpListener,
}

impl Server {
    pub fn common_state(&self) -> &CommonServerState {
        &self.common_state
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Accept connections until `shutdown` is cancelled, then wait for open connections to finish
pub async fn serve(server: Server, shutdown: CancellationToken) -> Result<()> {
    let http_api = Arc::clone(&server.http);
    let graceful = GracefulShutdown::new();
    info!(
        address = %server.listener.local_addr()?,
        node_id = server.common_state.node_id(),
        "distributor node listening"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            res = server.listener.accept() => {
                let (stream, _) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(err = %e, "failed to accept connection");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(err = %e, "cannot set TCP_NODELAY on the incoming socket");
                }
                let http_api = Arc::clone(&http_api);
                let graceful_watcher = graceful.watcher();

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| route_request(Arc::clone(&http_api), req));

                    let conn = ConnectionBuilder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .into_owned();
                    let conn = graceful_watcher.watch(conn);

                    if let Err(e) = conn.await {
                        error!("Error serving connection: {:?}", e);
                    }
                });
            }
        }
    }

    trace!("Starting graceful shutdown, waiting for connections to close");
    tokio::select! {
        _ = graceful.shutdown() => {
            info!("All connections closed gracefully");
        }
        _ = tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT) => {
            info!("Graceful shutdown timed out after 30 seconds");
        }
    }

    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received SIGINT");
    Ok(())
}
