use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User is muted: {0}")]
    Muted(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Disk reads that fail on a cache miss surface as `NotFound` to callers.
    pub fn not_found_from_io(err: &std::io::Error, path: &str) -> Self {
        Self::NotFound(format!("{path}: {err}"))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::not_found_from_io(&io, "/hls/abc/playlist.m3u8");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/hls/abc/playlist.m3u8"));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::Muted("discord-42".to_string()).to_string(),
            "User is muted: discord-42"
        );
        assert_eq!(
            Error::Conflict("livestream already exists".to_string()).to_string(),
            "Conflict: livestream already exists"
        );
    }
}
