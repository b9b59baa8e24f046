use scuffle_rtmp::session::server::ServerSession;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{StreamError, StreamResult};
use crate::registry::StreamRegistry;
use crate::rtmp::{finish_ingest, IngestSessionHandler};
use crate::segmenter::Segmenter;

/// RTMP accept loop; one task per broadcaster connection
pub struct IngestServer {
    listener: TcpListener,
    registry: Arc<StreamRegistry>,
    segmenter: Arc<dyn Segmenter>,
    connections: TaskTracker,
}

impl IngestServer {
    /// Bind the ingest port. Failure here is fatal for the process.
    pub async fn bind(
        addr: &str,
        registry: Arc<StreamRegistry>,
        segmenter: Arc<dyn Segmenter>,
    ) -> StreamResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StreamError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            registry,
            segmenter,
            connections: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> StreamResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Tracker of the per-connection tasks
    #[must_use]
    pub fn connections(&self) -> TaskTracker {
        self.connections.clone()
    }

    /// Accept until `shutdown` fires. Connections still open at that point
    /// are cancelled through the same token, and `run` returns once each has
    /// flushed its segmenter or `drain_timeout` has passed.
    pub async fn run(self, shutdown: CancellationToken, drain_timeout: Duration) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("RTMP ingest listening on rtmp://{}", addr);
        }

        let connections = self.connections.clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("RTMP ingest shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let registry = Arc::clone(&self.registry);
                        let segmenter = Arc::clone(&self.segmenter);
                        let shutdown = shutdown.clone();
                        connections.spawn(async move {
                            handle_connection(stream, remote_addr, registry, segmenter, shutdown).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept ingest connection"),
                }
            }
        }

        connections.close();
        let open = connections.len();
        if tokio::time::timeout(drain_timeout, connections.wait()).await.is_err() {
            warn!(open, "Ingest connections did not finish in time");
        } else {
            debug!(open, "Ingest connections drained");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    registry: Arc<StreamRegistry>,
    segmenter: Arc<dyn Segmenter>,
    shutdown: CancellationToken,
) {
    let connection = registry.new_connection();
    debug!(%remote_addr, connection_id = connection.id, "Ingest connection accepted");

    let handler = IngestSessionHandler::new(
        Arc::clone(&registry),
        segmenter,
        connection.clone(),
        remote_addr,
    );
    let state = handler.state();
    let session = ServerSession::new(stream, handler);

    tokio::select! {
        result = session.run() => match result {
            Ok(_) => debug!(%remote_addr, "Ingest session ended"),
            Err(e) => warn!(%remote_addr, error = %e, "Ingest session failed"),
        },
        () = connection.cancel.cancelled() => {
            debug!(%remote_addr, connection_id = connection.id, "Ingest connection closed");
        }
        () = shutdown.cancelled() => {}
    }

    finish_ingest(&state, &registry, &connection).await;
}
