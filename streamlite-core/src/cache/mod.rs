pub mod chat_log;
pub mod key_builder;
pub mod presence;
pub mod segment_cache;
pub mod segment_name;

pub use chat_log::{ChatLog, MemoryChatLog, RedisChatLog};
pub use key_builder::KeyBuilder;
pub use presence::{MemoryPresence, PresenceTracker, RedisPresence};
pub use segment_cache::{SegmentCache, SegmentCacheEntry};
pub use segment_name::{is_playlist, segment_timestamp_millis, PLAYLIST_FILE, RECORD_PLAYLIST_FILE};
