use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind ingest listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Segmenter error: {0}")]
    Segmenter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;

impl From<StreamError> for streamlite_core::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Bind { .. } => Self::ConnectionClosed(err.to_string()),
            StreamError::Segmenter(msg) => Self::Internal(msg),
            StreamError::Io(e) => Self::Io(e),
        }
    }
}
