// Per-connection RTMP session handling.
//
// The publish command carries `<app>/<stream_key>`; the first one on a
// connection decides its fate. A match against the registry attaches the
// connection and starts the segmenter, anything else cancels the connection.
// Media messages are reframed as FLV tags and piped to the segmenter.
//
// Rejection goes through the connection's cancellation token rather than a
// session error so the accept loop owns every socket teardown.

use scuffle_rtmp::session::server::{ServerSessionError, SessionData, SessionHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::flv::{self, TagType};
use crate::registry::{ConnectionHandle, StreamRegistry};
use crate::segmenter::{Segmenter, SegmenterSink};

struct ActiveIngest {
    uuid: Uuid,
    sink: Box<dyn SegmenterSink>,
}

#[derive(Default)]
pub struct IngestState {
    /// Set by the first publish; later publishes on the connection are ignored
    started: bool,
    active: Option<ActiveIngest>,
}

impl IngestState {
    #[must_use]
    pub fn active_stream(&self) -> Option<Uuid> {
        self.active.as_ref().map(|active| active.uuid)
    }
}

pub type SharedIngestState = Arc<Mutex<IngestState>>;

pub struct IngestSessionHandler {
    registry: Arc<StreamRegistry>,
    segmenter: Arc<dyn Segmenter>,
    connection: ConnectionHandle,
    remote_addr: SocketAddr,
    state: SharedIngestState,
}

impl IngestSessionHandler {
    #[must_use]
    pub fn new(
        registry: Arc<StreamRegistry>,
        segmenter: Arc<dyn Segmenter>,
        connection: ConnectionHandle,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            registry,
            segmenter,
            connection,
            remote_addr,
            state: Arc::new(Mutex::new(IngestState::default())),
        }
    }

    /// State shared with the accept loop, which finishes the ingest once the
    /// session is gone
    #[must_use]
    pub fn state(&self) -> SharedIngestState {
        Arc::clone(&self.state)
    }

    fn reject(&self) {
        self.connection.cancel.cancel();
    }

    async fn publish(&self, app: &str, stream_key: &str) {
        let mut state = self.state.lock().await;
        if state.started {
            debug!(remote_addr = %self.remote_addr, "Ignoring repeated publish");
            return;
        }
        state.started = true;

        let Some(stream) = self.registry.authorize(app, stream_key) else {
            warn!(
                remote_addr = %self.remote_addr,
                app,
                "Unauthorized ingest attempt, closing connection"
            );
            self.reject();
            return;
        };

        if let Err(e) = self.registry.attach(stream.uuid, &self.connection) {
            warn!(
                stream_uuid = %stream.uuid,
                remote_addr = %self.remote_addr,
                error = %e,
                "Rejecting ingest connection"
            );
            self.reject();
            return;
        }

        let mut sink = match self.segmenter.start(&stream.output_dir, stream.archive).await {
            Ok(sink) => sink,
            Err(e) => {
                error!(stream_uuid = %stream.uuid, error = %e, "Failed to start segmenter");
                self.registry.detach(stream.uuid, self.connection.id);
                self.reject();
                return;
            }
        };

        if let Err(e) = sink.write(flv::header()).await {
            error!(stream_uuid = %stream.uuid, error = %e, "Failed to write FLV header");
            if let Err(e) = sink.finish().await {
                warn!(stream_uuid = %stream.uuid, error = %e, "Segmenter did not finish cleanly");
            }
            self.registry.detach(stream.uuid, self.connection.id);
            self.reject();
            return;
        }

        info!(
            stream_uuid = %stream.uuid,
            name = %stream.name,
            remote_addr = %self.remote_addr,
            connection_id = self.connection.id,
            archive = stream.archive,
            "Ingest started"
        );
        state.active = Some(ActiveIngest {
            uuid: stream.uuid,
            sink,
        });
    }

    async fn write_tag(&self, tag_type: TagType, timestamp: u32, payload: &[u8]) {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            return;
        };

        let Some(tag) = flv::tag(tag_type, timestamp, payload) else {
            warn!(
                stream_uuid = %active.uuid,
                size = payload.len(),
                "Dropping media message too large for an FLV tag"
            );
            return;
        };

        if let Err(e) = active.sink.write(tag).await {
            error!(stream_uuid = %active.uuid, error = %e, "Segmenter write failed, closing connection");
            self.reject();
        }
    }

    async fn unpublish(&self) {
        stop_active(&self.state, &self.registry, self.connection.id).await;
    }
}

async fn stop_active(state: &SharedIngestState, registry: &StreamRegistry, connection_id: u64) {
    let active = state.lock().await.active.take();
    let Some(active) = active else {
        return;
    };

    if let Err(e) = active.sink.finish().await {
        warn!(stream_uuid = %active.uuid, error = %e, "Segmenter did not finish cleanly");
    }
    registry.detach(active.uuid, connection_id);
    info!(stream_uuid = %active.uuid, connection_id, "Ingest stopped");
}

/// Flush the segmenter, release the stream and mark the connection finished
pub async fn finish_ingest(
    state: &SharedIngestState,
    registry: &StreamRegistry,
    connection: &ConnectionHandle,
) {
    stop_active(state, registry, connection.id).await;
    connection.finished.cancel();
}

impl SessionHandler for IngestSessionHandler {
    async fn on_publish(
        &mut self,
        stream_id: u32,
        app_name: &str,
        stream_key: &str,
    ) -> Result<(), ServerSessionError> {
        debug!(stream_id, app_name, remote_addr = %self.remote_addr, "RTMP publish");
        self.publish(app_name, stream_key).await;
        Ok(())
    }

    async fn on_unpublish(&mut self, stream_id: u32) -> Result<(), ServerSessionError> {
        debug!(stream_id, remote_addr = %self.remote_addr, "RTMP unpublish");
        self.unpublish().await;
        Ok(())
    }

    async fn on_data(&mut self, _stream_id: u32, data: SessionData) -> Result<(), ServerSessionError> {
        let (tag_type, timestamp, payload) = match data {
            SessionData::Video { timestamp, data } => (TagType::Video, timestamp, data),
            SessionData::Audio { timestamp, data } => (TagType::Audio, timestamp, data),
            SessionData::Amf0 { timestamp, data } => (TagType::ScriptData, timestamp, data),
        };
        self.write_tag(tag_type, timestamp, &payload).await;
        Ok(())
    }
}
