//! Sliding-window viewer presence.
//!
//! One entry per distinct viewer per stream holding the last ping time in
//! unix seconds. Pruning is driven from outside (see the background tasks)
//! and removes entries whose ping is at least `max_age` seconds old.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::key_builder::KeyBuilder;
use crate::Result;

#[async_trait]
pub trait PresenceTracker: Send + Sync {
    /// Record that `viewer` is watching now; re-pinging replaces the timestamp
    async fn ping(&self, stream: Uuid, viewer: &str) -> Result<()>;

    /// Distinct viewers currently tracked, without pruning
    async fn count(&self, stream: Uuid) -> Result<usize>;

    /// Drop viewers whose last ping is `max_age_seconds` or more in the past
    /// and return the remaining count
    async fn prune(&self, stream: Uuid, max_age_seconds: u64) -> Result<usize>;

    /// Forget every viewer of a stream
    async fn clear(&self, stream: Uuid) -> Result<()>;
}

fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn cutoff(now_seconds: i64, max_age_seconds: u64) -> i64 {
    now_seconds.saturating_sub(i64::try_from(max_age_seconds).unwrap_or(i64::MAX))
}

#[derive(Clone, Default)]
pub struct MemoryPresence {
    streams: Arc<DashMap<Uuid, HashMap<String, i64>>>,
}

impl MemoryPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_at(&self, stream: Uuid, viewer: &str, now_seconds: i64) {
        self.streams
            .entry(stream)
            .or_default()
            .insert(viewer.to_string(), now_seconds);
    }

    pub fn prune_at(&self, stream: Uuid, max_age_seconds: u64, now_seconds: i64) -> usize {
        let cutoff = cutoff(now_seconds, max_age_seconds);

        let remaining = match self.streams.get_mut(&stream) {
            Some(mut viewers) => {
                viewers.retain(|_, last_ping| *last_ping > cutoff);
                viewers.len()
            }
            None => return 0,
        };

        if remaining == 0 {
            self.streams.remove_if(&stream, |_, viewers| viewers.is_empty());
        }
        remaining
    }

    fn count_now(&self, stream: Uuid) -> usize {
        self.streams.get(&stream).map_or(0, |viewers| viewers.len())
    }
}

#[async_trait]
impl PresenceTracker for MemoryPresence {
    async fn ping(&self, stream: Uuid, viewer: &str) -> Result<()> {
        self.ping_at(stream, viewer, now_seconds());
        Ok(())
    }

    async fn count(&self, stream: Uuid) -> Result<usize> {
        Ok(self.count_now(stream))
    }

    async fn prune(&self, stream: Uuid, max_age_seconds: u64) -> Result<usize> {
        Ok(self.prune_at(stream, max_age_seconds, now_seconds()))
    }

    async fn clear(&self, stream: Uuid) -> Result<()> {
        self.streams.remove(&stream);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
    keys: KeyBuilder,
}

impl RedisPresence {
    #[must_use]
    pub const fn new(conn: ConnectionManager, keys: KeyBuilder) -> Self {
        Self { conn, keys }
    }

    pub async fn prune_at(
        &self,
        stream: Uuid,
        max_age_seconds: u64,
        now_seconds: i64,
    ) -> Result<usize> {
        let mut conn = self.conn.clone();
        let key = self.keys.viewers(&stream);
        let cutoff = cutoff(now_seconds, max_age_seconds);

        // ZREMRANGEBYSCORE is inclusive, matching the in-memory backend
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrembyscore(&key, "-inf", cutoff)
            .ignore()
            .zcard(&key);

        let results: Vec<usize> = pipe.query_async(&mut conn).await?;
        Ok(results.first().copied().unwrap_or(0))
    }
}

#[async_trait]
impl PresenceTracker for RedisPresence {
    async fn ping(&self, stream: Uuid, viewer: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(self.keys.viewers(&stream), viewer, now_seconds())
            .await?;
        Ok(())
    }

    async fn count(&self, stream: Uuid) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(self.keys.viewers(&stream)).await?;
        Ok(count)
    }

    async fn prune(&self, stream: Uuid, max_age_seconds: u64) -> Result<usize> {
        self.prune_at(stream, max_age_seconds, now_seconds()).await
    }

    async fn clear(&self, stream: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.keys.viewers(&stream)).await?;
        Ok(())
    }
}
