//! Registered streams and the ingest connection bound to each.
//!
//! The session map is read by every publish attempt and written only by
//! open/close, so it sits behind a reader/writer lock. A session holds at
//! most one live connection; closing a stream cancels that connection and
//! waits for it to wind down before the output directory is removed.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use streamlite_core::config::LivestreamConfig;
use streamlite_core::service::StreamService;
use streamlite_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on waiting for a cancelled connection to release its output
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Control handle of one inbound connection.
///
/// `cancel` asks the connection to stop; the connection task cancels
/// `finished` once its segmenter is flushed and the socket is gone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    pub cancel: CancellationToken,
    pub finished: CancellationToken,
}

impl ConnectionHandle {
    fn is_live(&self) -> bool {
        !self.finished.is_cancelled()
    }
}

/// What a connection needs to start ingesting after a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedStream {
    pub uuid: Uuid,
    pub name: String,
    pub archive: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
struct StreamSession {
    name: String,
    secret: String,
    archive: bool,
    connection: Option<ConnectionHandle>,
}

#[derive(Debug)]
pub struct StreamRegistry {
    sessions: RwLock<HashMap<Uuid, StreamSession>>,
    output_root: PathBuf,
    next_connection_id: AtomicU64,
    close_timeout: Duration,
}

/// True when `secret` is one whole `/`-separated component of the publish
/// path. Query strings on the stream key are ignored.
#[must_use]
pub fn path_matches_secret(path: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let path = path.split('?').next().unwrap_or(path);
    path.split('/').any(|component| component == secret)
}

impl StreamRegistry {
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            output_root: output_root.into(),
            next_connection_id: AtomicU64::new(1),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn from_config(config: &LivestreamConfig) -> Self {
        Self::new(&config.output_dir)
    }

    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn output_dir(&self, uuid: Uuid) -> PathBuf {
        self.output_root.join(uuid.to_string())
    }

    /// Fresh handle for an accepted socket
    pub fn new_connection(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    /// Find the stream whose secret appears as a component of
    /// `<app>/<stream_key>`. Never mutates the registry.
    #[must_use]
    pub fn authorize(&self, app: &str, stream_key: &str) -> Option<AuthorizedStream> {
        let path = format!("{app}/{stream_key}");
        let sessions = self.sessions.read();

        sessions
            .iter()
            .find(|(_, session)| path_matches_secret(&path, &session.secret))
            .map(|(uuid, session)| AuthorizedStream {
                uuid: *uuid,
                name: session.name.clone(),
                archive: session.archive,
                output_dir: self.output_dir(*uuid),
            })
    }

    /// Bind `connection` to the stream. Fails if the stream is gone or
    /// another connection is still live on it.
    pub fn attach(&self, uuid: Uuid, connection: &ConnectionHandle) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&uuid)
            .ok_or_else(|| Error::NotFound(format!("stream {uuid} is not open")))?;

        if let Some(existing) = &session.connection {
            if existing.id != connection.id && existing.is_live() {
                return Err(Error::Conflict(format!(
                    "stream {uuid} already has connection {}",
                    existing.id
                )));
            }
        }

        session.connection = Some(connection.clone());
        Ok(())
    }

    /// Unbind `connection_id` if it is still the attached connection
    pub fn detach(&self, uuid: Uuid, connection_id: u64) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&uuid) {
            if session
                .connection
                .as_ref()
                .is_some_and(|conn| conn.id == connection_id)
            {
                session.connection = None;
            }
        }
    }

    #[must_use]
    pub fn attached_connection(&self, uuid: Uuid) -> Option<u64> {
        self.sessions
            .read()
            .get(&uuid)
            .and_then(|session| session.connection.as_ref())
            .filter(|conn| conn.is_live())
            .map(|conn| conn.id)
    }

    async fn stop_connection(&self, uuid: Uuid, connection: ConnectionHandle) {
        connection.cancel.cancel();
        if tokio::time::timeout(self.close_timeout, connection.finished.cancelled())
            .await
            .is_err()
        {
            warn!(
                stream_uuid = %uuid,
                connection_id = connection.id,
                "Ingest connection did not stop in time"
            );
        }
    }
}

#[async_trait]
impl StreamService for StreamRegistry {
    fn open_stream(&self, name: &str, uuid: Uuid, secret: &str, archive: bool) -> Result<()> {
        let session = StreamSession {
            name: name.to_string(),
            secret: secret.to_string(),
            archive,
            connection: None,
        };

        let replaced = self.sessions.write().insert(uuid, session);
        if let Some(connection) = replaced.and_then(|old| old.connection) {
            connection.cancel.cancel();
        }

        info!(stream_uuid = %uuid, name, archive, "Stream opened");
        Ok(())
    }

    async fn close_stream(&self, uuid: Uuid) -> Result<()> {
        let removed = self.sessions.write().remove(&uuid);
        let Some(session) = removed else {
            warn!(stream_uuid = %uuid, "Close requested for unknown stream");
            return Ok(());
        };

        if let Some(connection) = session.connection {
            self.stop_connection(uuid, connection).await;
        }

        let dir = self.output_dir(uuid);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "Removed stream output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        info!(stream_uuid = %uuid, name = %session.name, "Stream closed");
        Ok(())
    }

    fn is_stream_open(&self, uuid: Uuid) -> bool {
        self.sessions.read().contains_key(&uuid)
    }

    fn open_streams(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn registry(root: &Path) -> StreamRegistry {
        StreamRegistry::new(root).with_close_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_exact_component_match() {
        assert!(path_matches_secret("live/abc123", "abc123"));
        assert!(path_matches_secret("abc123/", "abc123"));
        assert!(path_matches_secret("live/abc123?token=x", "abc123"));
        assert!(!path_matches_secret("live/abc1234", "abc123"));
        assert!(!path_matches_secret("live/xabc123", "abc123"));
        assert!(!path_matches_secret("live/", ""));
    }

    #[test]
    fn test_authorize_finds_only_matching_stream() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.open_stream("a", a, "secret", false).unwrap();
        registry.open_stream("b", b, "secret-two", true).unwrap();

        let found = registry.authorize("live", "secret-two").unwrap();
        assert_eq!(found.uuid, b);
        assert!(found.archive);
        assert_eq!(found.output_dir, dir.path().join(b.to_string()));

        assert_eq!(registry.authorize("secret", "").unwrap().uuid, a);
        assert!(registry.authorize("live", "secre").is_none());
    }

    #[test]
    fn test_single_live_connection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let uuid = Uuid::new_v4();
        registry.open_stream("s", uuid, "key", false).unwrap();

        let first = registry.new_connection();
        let second = registry.new_connection();
        assert_ne!(first.id, second.id);

        registry.attach(uuid, &first).unwrap();
        registry.attach(uuid, &first).unwrap();
        assert!(matches!(
            registry.attach(uuid, &second),
            Err(Error::Conflict(_))
        ));
        assert_eq!(registry.attached_connection(uuid), Some(first.id));

        // a stale detach from the rejected connection leaves the owner bound
        registry.detach(uuid, second.id);
        assert_eq!(registry.attached_connection(uuid), Some(first.id));

        first.finished.cancel();
        registry.attach(uuid, &second).unwrap();
        assert_eq!(registry.attached_connection(uuid), Some(second.id));
    }

    #[test]
    fn test_attach_to_unknown_stream() {
        let registry = StreamRegistry::new("/tmp/unused");
        let conn = registry.new_connection();
        assert!(matches!(
            registry.attach(Uuid::new_v4(), &conn),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let uuid = Uuid::new_v4();

        registry.close_stream(Uuid::new_v4()).await.unwrap();
        assert!(registry.open_streams().is_empty());

        registry.open_stream("s", uuid, "key", false).unwrap();
        assert!(registry.is_stream_open(uuid));

        registry.close_stream(uuid).await.unwrap();
        registry.close_stream(uuid).await.unwrap();
        assert!(!registry.is_stream_open(uuid));
        assert!(registry.authorize("live", "key").is_none());
    }

    #[tokio::test]
    async fn test_close_stops_connection_before_removing_output() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let uuid = Uuid::new_v4();
        registry.open_stream("s", uuid, "key", false).unwrap();

        let output = registry.output_dir(uuid);
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("playlist.m3u8"), b"#EXTM3U").unwrap();

        let conn = registry.new_connection();
        registry.attach(uuid, &conn).unwrap();

        let worker = conn.clone();
        let dir_seen_at_stop = output.clone();
        let observer = tokio::spawn(async move {
            worker.cancel.cancelled().await;
            let still_there = dir_seen_at_stop.exists();
            worker.finished.cancel();
            still_there
        });

        registry.close_stream(uuid).await.unwrap();

        assert!(observer.await.unwrap(), "output removed before connection stopped");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_close_gives_up_on_stuck_connection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let uuid = Uuid::new_v4();
        registry.open_stream("s", uuid, "key", false).unwrap();

        let conn = registry.new_connection();
        registry.attach(uuid, &conn).unwrap();

        registry.close_stream(uuid).await.unwrap();
        assert!(conn.cancel.is_cancelled());
        assert!(!registry.is_stream_open(uuid));
    }
}
