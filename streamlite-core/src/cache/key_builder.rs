//! Redis key layout for the chat and presence backends.
//!
//! Every key carries the configured prefix so several deployments can share
//! one Redis instance.

use crate::Config;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.clone())
    }

    /// Chat log for a stream
    ///
    /// Type: Stream
    /// Fields: `user_id`, `user_name`, avatar, message
    #[must_use]
    pub fn chat(&self, stream: &Uuid) -> String {
        format!("{}chat_{}", self.prefix, stream)
    }

    /// Ids deleted from a stream's chat log, oldest first
    ///
    /// Type: List
    #[must_use]
    pub fn chat_tombstones(&self, stream: &Uuid) -> String {
        format!("{}chat_delete_{}", self.prefix, stream)
    }

    /// Viewers currently watching a stream
    ///
    /// Type: Sorted Set
    /// Member: viewer id
    /// Score: last ping, unix seconds
    #[must_use]
    pub fn viewers(&self, stream: &Uuid) -> String {
        format!("{}viewer_count_{}", self.prefix, stream)
    }
}
