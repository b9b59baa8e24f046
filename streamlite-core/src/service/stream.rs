use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;

/// Ingest-side lifecycle of registered streams
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Register a stream so broadcasters presenting `secret` are accepted
    fn open_stream(&self, name: &str, uuid: Uuid, secret: &str, archive: bool) -> Result<()>;

    /// Drop the broadcaster, delete the stream's output, forget the stream.
    /// Unknown ids are not an error.
    async fn close_stream(&self, uuid: Uuid) -> Result<()>;

    fn is_stream_open(&self, uuid: Uuid) -> bool;

    fn open_streams(&self) -> Vec<Uuid>;
}
