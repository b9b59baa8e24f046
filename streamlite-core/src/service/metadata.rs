//! Persistent livestream metadata.
//!
//! The platform runs a single livestream at a time, so `get_one` returns
//! whichever record exists.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::Livestream;
use crate::{Error, Result};

#[async_trait]
pub trait StreamMetadataStore: Send + Sync {
    async fn get_by_id(&self, uuid: Uuid) -> Result<Livestream>;

    async fn get_by_owner(&self, owner_user_id: &str) -> Result<Livestream>;

    /// Any existing livestream; `NotFound` when there is none
    async fn get_one(&self) -> Result<Livestream>;

    async fn create(&self, livestream: Livestream) -> Result<()>;

    async fn update(&self, livestream: Livestream) -> Result<()>;

    async fn delete(&self, uuid: Uuid) -> Result<()>;

    /// Add `"<identity_provider>-<user_id>"` to the mute list once
    async fn mute_user(&self, identity_provider: &str, uuid: Uuid, user_id: &str) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryStreamMetadataStore {
    streams: Arc<RwLock<HashMap<Uuid, Livestream>>>,
}

impl MemoryStreamMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(uuid: Uuid) -> Error {
    Error::NotFound(format!("livestream {uuid}"))
}

#[async_trait]
impl StreamMetadataStore for MemoryStreamMetadataStore {
    async fn get_by_id(&self, uuid: Uuid) -> Result<Livestream> {
        self.streams
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| not_found(uuid))
    }

    async fn get_by_owner(&self, owner_user_id: &str) -> Result<Livestream> {
        self.streams
            .read()
            .values()
            .find(|stream| stream.owner_user_id == owner_user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("livestream owned by {owner_user_id}")))
    }

    async fn get_one(&self) -> Result<Livestream> {
        self.streams
            .read()
            .values()
            .next()
            .cloned()
            .ok_or_else(|| Error::NotFound("no livestream".to_string()))
    }

    async fn create(&self, livestream: Livestream) -> Result<()> {
        let mut streams = self.streams.write();
        if streams.contains_key(&livestream.uuid) {
            return Err(Error::Conflict(format!("livestream {}", livestream.uuid)));
        }
        streams.insert(livestream.uuid, livestream);
        Ok(())
    }

    async fn update(&self, livestream: Livestream) -> Result<()> {
        let mut streams = self.streams.write();
        let existing = streams
            .get_mut(&livestream.uuid)
            .ok_or_else(|| not_found(livestream.uuid))?;
        *existing = livestream;
        Ok(())
    }

    async fn delete(&self, uuid: Uuid) -> Result<()> {
        self.streams
            .write()
            .remove(&uuid)
            .map(|_| ())
            .ok_or_else(|| not_found(uuid))
    }

    async fn mute_user(&self, identity_provider: &str, uuid: Uuid, user_id: &str) -> Result<()> {
        let mut streams = self.streams.write();
        let stream = streams.get_mut(&uuid).ok_or_else(|| not_found(uuid))?;
        let key = Livestream::mute_key(identity_provider, user_id);
        if !stream.mute_list.contains(&key) {
            stream.mute_list.push(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateLivestreamRequest;

    fn livestream(owner: &str) -> Livestream {
        Livestream::new(
            owner.to_string(),
            "secret".to_string(),
            CreateLivestreamRequest::default(),
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryStreamMetadataStore::new();
        assert!(store.get_one().await.unwrap_err().is_not_found());

        let mut stream = livestream("owner");
        store.create(stream.clone()).await.unwrap();
        assert!(matches!(
            store.create(stream.clone()).await,
            Err(Error::Conflict(_))
        ));

        assert_eq!(store.get_one().await.unwrap(), stream);
        assert_eq!(store.get_by_owner("owner").await.unwrap().uuid, stream.uuid);
        assert!(store.get_by_owner("nobody").await.is_err());

        stream.title = "updated".to_string();
        store.update(stream.clone()).await.unwrap();
        assert_eq!(store.get_by_id(stream.uuid).await.unwrap().title, "updated");

        store.delete(stream.uuid).await.unwrap();
        assert!(store.get_by_id(stream.uuid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mute_user_is_a_set() {
        let store = MemoryStreamMetadataStore::new();
        let stream = livestream("owner");
        store.create(stream.clone()).await.unwrap();

        store.mute_user("discord", stream.uuid, "7").await.unwrap();
        store.mute_user("discord", stream.uuid, "7").await.unwrap();

        let stored = store.get_by_id(stream.uuid).await.unwrap();
        assert_eq!(stored.mute_list, vec!["discord-7".to_string()]);
        assert!(stored.is_muted("discord", "7"));
    }
}
