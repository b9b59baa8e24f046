//! RTMP ingest for StreamLite.
//!
//! The [`StreamRegistry`] owns every registered stream and the connection
//! attached to it. [`IngestServer`] accepts broadcaster connections, checks
//! the secret embedded in the publish path against the registry and feeds
//! the media to a [`Segmenter`] that writes the HLS output.

pub mod error;
pub mod flv;
pub mod registry;
pub mod rtmp;
pub mod segmenter;
pub mod server;

pub use error::{StreamError, StreamResult};
pub use registry::{AuthorizedStream, ConnectionHandle, StreamRegistry};
pub use rtmp::IngestSessionHandler;
pub use segmenter::{FfmpegSegmenter, Segmenter, SegmenterSink};
pub use server::IngestServer;
