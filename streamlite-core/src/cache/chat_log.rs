//! Per-stream chat log with moderation tombstones.
//!
//! Two backends share one contract:
//! - [`MemoryChatLog`]: process-local, used when no Redis URL is configured
//! - [`RedisChatLog`]: Redis stream per livestream plus a tombstone list
//!
//! Ids are ordered-log ids (`<millis>-<seq>`) assigned by the backend, so page
//! order is append order.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamRangeReply};
use redis::AsyncCommands;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use uuid::Uuid;

use super::key_builder::KeyBuilder;
use super::segment_cache::current_millis;
use crate::models::{ChatCursor, ChatId, ChatMessage, NewChatMessage};
use crate::{Error, Result};

#[async_trait]
pub trait ChatLog: Send + Sync {
    /// Append at the tail and return the id the log assigned
    async fn append(&self, stream: Uuid, message: NewChatMessage) -> Result<ChatId>;

    /// Up to `count` messages in ascending id order.
    ///
    /// [`ChatCursor::Newest`] selects the most recent `count` messages;
    /// [`ChatCursor::After`] selects messages with an id strictly greater.
    async fn page(&self, stream: Uuid, cursor: ChatCursor, count: usize)
        -> Result<Vec<ChatMessage>>;

    /// Remove from the live log and record a tombstone in one step
    async fn delete(&self, stream: Uuid, id: ChatId) -> Result<()>;

    /// Every deleted id, oldest first
    async fn tombstones(&self, stream: Uuid) -> Result<Vec<ChatId>>;

    /// Drop the log and tombstones of a deleted stream
    async fn clear(&self, stream: Uuid) -> Result<()>;
}

#[derive(Default)]
struct StreamLog {
    messages: BTreeMap<ChatId, ChatMessage>,
    tombstones: Vec<ChatId>,
    last_id: Option<ChatId>,
}

#[derive(Clone, Default)]
pub struct MemoryChatLog {
    streams: Arc<DashMap<Uuid, StreamLog>>,
}

impl MemoryChatLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn append_at(&self, stream: Uuid, message: NewChatMessage, now_millis: u64) -> ChatId {
        let mut log = self.streams.entry(stream).or_default();
        let id = ChatId::next_after(log.last_id, now_millis);
        log.last_id = Some(id);
        log.messages.insert(id, message.with_id(id));
        id
    }
}

#[async_trait]
impl ChatLog for MemoryChatLog {
    async fn append(&self, stream: Uuid, message: NewChatMessage) -> Result<ChatId> {
        Ok(self.append_at(stream, message, current_millis()))
    }

    async fn page(
        &self,
        stream: Uuid,
        cursor: ChatCursor,
        count: usize,
    ) -> Result<Vec<ChatMessage>> {
        let Some(log) = self.streams.get(&stream) else {
            return Ok(Vec::new());
        };

        let page = match cursor {
            ChatCursor::Newest => {
                let mut newest: Vec<ChatMessage> =
                    log.messages.values().rev().take(count).cloned().collect();
                newest.reverse();
                newest
            }
            ChatCursor::After(after) => log
                .messages
                .range((Bound::Excluded(after), Bound::Unbounded))
                .take(count)
                .map(|(_, message)| message.clone())
                .collect(),
        };

        Ok(page)
    }

    async fn delete(&self, stream: Uuid, id: ChatId) -> Result<()> {
        let mut log = self.streams.entry(stream).or_default();
        log.messages.remove(&id);
        log.tombstones.push(id);
        Ok(())
    }

    async fn tombstones(&self, stream: Uuid) -> Result<Vec<ChatId>> {
        Ok(self
            .streams
            .get(&stream)
            .map(|log| log.tombstones.clone())
            .unwrap_or_default())
    }

    async fn clear(&self, stream: Uuid) -> Result<()> {
        self.streams.remove(&stream);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisChatLog {
    conn: ConnectionManager,
    keys: KeyBuilder,
}

impl RedisChatLog {
    #[must_use]
    pub const fn new(conn: ConnectionManager, keys: KeyBuilder) -> Self {
        Self { conn, keys }
    }

    fn decode(entry: &StreamId) -> Result<ChatMessage> {
        let id = entry
            .id
            .parse::<ChatId>()
            .map_err(|e| Error::Internal(format!("Malformed chat stream entry: {e}")))?;

        Ok(ChatMessage {
            id,
            user_id: entry.get("user_id").unwrap_or_default(),
            user_name: entry.get("user_name").unwrap_or_default(),
            avatar: entry.get("avatar").unwrap_or_default(),
            message: entry.get("message").unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChatLog for RedisChatLog {
    async fn append(&self, stream: Uuid, message: NewChatMessage) -> Result<ChatId> {
        let mut conn = self.conn.clone();
        let key = self.keys.chat(&stream);

        let id: String = conn
            .xadd(
                &key,
                "*",
                &[
                    ("user_id", message.user_id.as_str()),
                    ("user_name", message.user_name.as_str()),
                    ("avatar", message.avatar.as_str()),
                    ("message", message.message.as_str()),
                ],
            )
            .await?;

        id.parse()
            .map_err(|e| Error::Internal(format!("Redis returned an unexpected stream id: {e}")))
    }

    async fn page(
        &self,
        stream: Uuid,
        cursor: ChatCursor,
        count: usize,
    ) -> Result<Vec<ChatMessage>> {
        let mut conn = self.conn.clone();
        let key = self.keys.chat(&stream);

        let entries = match cursor {
            ChatCursor::Newest => {
                let reply: StreamRangeReply = conn.xrevrange_count(&key, "+", "-", count).await?;
                let mut ids = reply.ids;
                ids.reverse();
                ids
            }
            ChatCursor::After(after) => {
                let reply: StreamRangeReply = conn
                    .xrange_count(&key, format!("({after}"), "+", count)
                    .await?;
                reply.ids
            }
        };

        entries.iter().map(Self::decode).collect()
    }

    async fn delete(&self, stream: Uuid, id: ChatId) -> Result<()> {
        let mut conn = self.conn.clone();
        let id = id.to_string();

        redis::pipe()
            .atomic()
            .xdel(self.keys.chat(&stream), &[id.as_str()])
            .ignore()
            .rpush(self.keys.chat_tombstones(&stream), id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn tombstones(&self, stream: Uuid) -> Result<Vec<ChatId>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .lrange(self.keys.chat_tombstones(&stream), 0, -1)
            .await?;

        Ok(ids
            .iter()
            .filter_map(|id| match id.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(stream_uuid = %stream, error = %e, "Skipping malformed tombstone");
                    None
                }
            })
            .collect())
    }

    async fn clear(&self, stream: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[self.keys.chat(&stream), self.keys.chat_tombstones(&stream)])
            .await?;
        Ok(())
    }
}
