//! Livestream use cases: stream administration, chat, presence, and file
//! delivery, each gated by the caller's role.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::archive::{find_archive, ArchiveConverter};
use super::conversion_guard::ConversionGuard;
use super::metadata::StreamMetadataStore;
use super::stream::StreamService;
use super::tasks::BackgroundTasks;
use crate::cache::segment_cache::current_millis;
use crate::cache::{is_playlist, ChatLog, PresenceTracker, SegmentCache, RECORD_PLAYLIST_FILE};
use crate::models::{
    AddChatRequest, ChatCursor, ChatId, ChatMessage, CreateLivestreamRequest,
    CreateLivestreamResponse, Identity, Livestream, LivestreamDetail, LivestreamSummary,
    MuteUserRequest, NewChatMessage, Role, UpdateLivestreamRequest,
};
use crate::{Config, Error, Result};

/// Length of generated stream secrets
const SECRET_LENGTH: usize = 24;

/// External collaborators the service is built on
#[derive(Clone)]
pub struct LivestreamBackends {
    pub metadata: Arc<dyn StreamMetadataStore>,
    pub streams: Arc<dyn StreamService>,
    pub chat: Arc<dyn ChatLog>,
    pub presence: Arc<dyn PresenceTracker>,
    pub converter: Arc<dyn ArchiveConverter>,
}

#[derive(Clone)]
pub struct LivestreamService {
    config: Arc<Config>,
    metadata: Arc<dyn StreamMetadataStore>,
    streams: Arc<dyn StreamService>,
    chat: Arc<dyn ChatLog>,
    presence: Arc<dyn PresenceTracker>,
    converter: Arc<dyn ArchiveConverter>,
    segments: SegmentCache,
    conversion: ConversionGuard,
    /// Serializes playlist reads against playlist refreshes
    playlist_lock: Arc<Mutex<()>>,
    /// One refresh task per playlist path
    refreshing: Arc<DashMap<PathBuf, CancellationToken>>,
    tasks: BackgroundTasks,
}

impl std::fmt::Debug for LivestreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivestreamService")
            .field("cached_files", &self.segments.len())
            .field("refreshing_playlists", &self.refreshing.len())
            .finish_non_exhaustive()
    }
}

fn require(identity: &Identity, required: Role, operation: &'static str) -> Result<()> {
    if identity.can(required) {
        return Ok(());
    }
    warn!(
        user_id = %identity.user_id,
        role = %identity.role,
        required = %required,
        operation,
        "Unauthorized access"
    );
    Err(Error::Unauthorized(format!("{operation} requires {required}")))
}

impl LivestreamService {
    #[must_use]
    pub fn new(config: Arc<Config>, backends: LivestreamBackends) -> Self {
        let segments = SegmentCache::with_max_entries(config.cache.max_entries);
        Self {
            config,
            metadata: backends.metadata,
            streams: backends.streams,
            chat: backends.chat,
            presence: backends.presence,
            converter: backends.converter,
            segments,
            conversion: ConversionGuard::new(),
            playlist_lock: Arc::new(Mutex::new(())),
            refreshing: Arc::new(DashMap::new()),
            tasks: BackgroundTasks::new(),
        }
    }

    #[must_use]
    pub const fn segments(&self) -> &SegmentCache {
        &self.segments
    }

    #[must_use]
    pub const fn conversion_guard(&self) -> &ConversionGuard {
        &self.conversion
    }

    #[must_use]
    pub fn stream_dir(&self, uuid: Uuid) -> PathBuf {
        self.config.livestream.output_dir.join(uuid.to_string())
    }

    fn push_url(&self, secret: &str) -> String {
        format!(
            "rtmp://{}:{}/{}",
            self.config.server.domain, self.config.livestream.rtmp_port, secret
        )
    }

    fn playlist_url(&self, uuid: Uuid) -> String {
        let server = &self.config.server;
        let (scheme, port) = if server.https {
            ("https", String::new())
        } else {
            ("http", format!(":{}", server.http_port))
        };
        format!(
            "{scheme}://{}{port}/livestream/{uuid}/playlist.m3u8",
            server.domain
        )
    }

    fn detail(&self, livestream: Livestream) -> LivestreamDetail {
        LivestreamDetail {
            uuid: livestream.uuid,
            stream_push_url: self.push_url(&livestream.secret),
            name: livestream.name,
            visibility: livestream.visibility,
            title: livestream.title,
            information: livestream.information,
            ban_list: livestream.ban_list,
            mute_list: livestream.mute_list,
            is_archived: livestream.is_archived,
        }
    }

    // ==================== Lifecycle ====================

    /// Re-register the persisted livestream with the ingest registry so a
    /// restart keeps accepting its broadcaster.
    pub async fn reopen_existing(&self) -> Result<Option<Uuid>> {
        match self.metadata.get_one().await {
            Ok(livestream) => {
                self.streams.open_stream(
                    &livestream.name,
                    livestream.uuid,
                    &livestream.secret,
                    livestream.is_archived,
                )?;
                info!(stream_uuid = %livestream.uuid, "Reopened existing livestream");
                Ok(Some(livestream.uuid))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start segment eviction and presence pruning
    pub fn start_maintenance(&self) {
        let segments = self.segments.clone();
        let max_age = self.config.cache.eviction_max_age_ms;
        self.tasks.spawn_periodic(
            "segment-eviction",
            self.config.eviction_interval(),
            self.tasks.token().clone(),
            move || {
                let segments = segments.clone();
                async move {
                    let evicted = segments.scan_and_evict(current_millis(), max_age);
                    if evicted > 0 {
                        info!(evicted, remaining = segments.len(), "Segment cache cleanup");
                    }
                }
            },
        );

        let service = self.clone();
        let window = self.config.presence.window_seconds;
        self.tasks.spawn_periodic(
            "presence-prune",
            self.config.prune_interval(),
            self.tasks.token().clone(),
            move || {
                let service = service.clone();
                async move {
                    service.prune_all_viewers(window).await;
                }
            },
        );
    }

    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tasks.shutdown(timeout).await
    }

    async fn prune_all_viewers(&self, max_age_seconds: u64) {
        for uuid in self.streams.open_streams() {
            match self.presence.prune(uuid, max_age_seconds).await {
                Ok(remaining) => debug!(stream_uuid = %uuid, remaining, "Pruned viewers"),
                Err(e) => warn!(stream_uuid = %uuid, error = %e, "Failed to prune viewers"),
            }
        }
    }

    // ==================== Stream administration ====================

    pub async fn create_livestream(
        &self,
        identity: &Identity,
        request: CreateLivestreamRequest,
    ) -> Result<CreateLivestreamResponse> {
        require(identity, Role::Admin, "create livestream")?;

        match self.metadata.get_one().await {
            Ok(existing) => {
                return Err(Error::Conflict(format!(
                    "livestream {} already exists",
                    existing.uuid
                )))
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let secret = nanoid::nanoid!(SECRET_LENGTH);
        let livestream = Livestream::new(identity.user_id.clone(), secret, request);
        let uuid = livestream.uuid;
        let stream_push_url = self.push_url(&livestream.secret);

        self.metadata.create(livestream.clone()).await?;
        self.streams.open_stream(
            &livestream.name,
            uuid,
            &livestream.secret,
            livestream.is_archived,
        )?;

        info!(stream_uuid = %uuid, owner = %identity.user_id, "Livestream created");
        Ok(CreateLivestreamResponse {
            uuid,
            stream_push_url,
        })
    }

    pub async fn get_by_id(&self, identity: &Identity, uuid: Uuid) -> Result<LivestreamDetail> {
        require(identity, Role::Admin, "get livestream by id")?;
        let livestream = self.metadata.get_by_id(uuid).await?;
        Ok(self.detail(livestream))
    }

    pub async fn get_by_owner(
        &self,
        identity: &Identity,
        owner_user_id: &str,
    ) -> Result<LivestreamDetail> {
        require(identity, Role::Admin, "get livestream by owner")?;
        let livestream = self.metadata.get_by_owner(owner_user_id).await?;
        Ok(self.detail(livestream))
    }

    pub async fn get_one(&self, identity: &Identity) -> Result<LivestreamSummary> {
        require(identity, Role::User, "get livestream")?;
        let livestream = self.metadata.get_one().await?;
        Ok(LivestreamSummary {
            uuid: livestream.uuid,
            stream_url: self.playlist_url(livestream.uuid),
            name: livestream.name,
            title: livestream.title,
            information: livestream.information,
        })
    }

    pub async fn update_livestream(
        &self,
        identity: &Identity,
        uuid: Uuid,
        patch: UpdateLivestreamRequest,
    ) -> Result<()> {
        require(identity, Role::Admin, "update livestream")?;
        let mut livestream = self.metadata.get_by_id(uuid).await?;
        livestream.apply(patch);
        self.metadata.update(livestream).await
    }

    pub async fn delete_livestream(&self, identity: &Identity, uuid: Uuid) -> Result<()> {
        require(identity, Role::Admin, "delete livestream")?;
        self.metadata.delete(uuid).await?;

        let dir = self.stream_dir(uuid);
        self.refreshing.retain(|path, token| {
            let keep = !path.starts_with(&dir);
            if !keep {
                token.cancel();
            }
            keep
        });
        let closed = self.streams.close_stream(uuid).await;
        let dropped = {
            let _guard = self.playlist_lock.lock().await;
            self.segments.delete_dir(&dir)
        };

        if let Err(e) = self.presence.clear(uuid).await {
            warn!(stream_uuid = %uuid, error = %e, "Failed to clear viewers");
        }
        if let Err(e) = self.chat.clear(uuid).await {
            warn!(stream_uuid = %uuid, error = %e, "Failed to clear chat");
        }
        closed?;

        info!(stream_uuid = %uuid, dropped_cache_entries = dropped, "Livestream deleted");
        Ok(())
    }

    // ==================== Presence ====================

    pub async fn ping_viewer(&self, identity: &Identity, uuid: Uuid) -> Result<usize> {
        require(identity, Role::User, "ping viewer count")?;
        if !self.streams.is_stream_open(uuid) {
            return Err(Error::NotFound(format!("livestream {uuid} is not live")));
        }
        self.presence.ping(uuid, &identity.user_id).await?;
        self.presence.count(uuid).await
    }

    pub async fn prune_viewers(&self, uuid: Uuid, max_age_seconds: u64) -> Result<usize> {
        self.presence.prune(uuid, max_age_seconds).await
    }

    // ==================== Chat ====================

    pub async fn get_chat(
        &self,
        identity: &Identity,
        uuid: Uuid,
        cursor: ChatCursor,
    ) -> Result<Vec<ChatMessage>> {
        require(identity, Role::User, "get chat")?;
        self.chat.page(uuid, cursor, self.config.chat.page_size).await
    }

    pub async fn add_chat(&self, identity: &Identity, request: AddChatRequest) -> Result<ChatId> {
        require(identity, Role::User, "add chat")?;

        let max_chars = self.config.chat.max_message_chars;
        if request.message.chars().count() > max_chars {
            return Err(Error::InvalidInput(format!(
                "chat message exceeds {max_chars} characters"
            )));
        }

        let livestream = self.metadata.get_by_id(request.stream_uuid).await?;
        if livestream.is_muted(&identity.identity_provider, &identity.user_id) {
            return Err(Error::Muted(Livestream::mute_key(
                &identity.identity_provider,
                &identity.user_id,
            )));
        }

        let message = NewChatMessage {
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
            avatar: identity.avatar.clone(),
            message: request.message,
        };
        self.chat.append(request.stream_uuid, message).await
    }

    pub async fn delete_chat(&self, identity: &Identity, uuid: Uuid, id: ChatId) -> Result<()> {
        require(identity, Role::Editor, "delete chat")?;
        self.chat.delete(uuid, id).await?;
        info!(stream_uuid = %uuid, chat_id = %id, moderator = %identity.user_id, "Chat message deleted");
        Ok(())
    }

    pub async fn tombstones(&self, identity: &Identity, uuid: Uuid) -> Result<Vec<ChatId>> {
        require(identity, Role::User, "get deleted chat ids")?;
        self.chat.tombstones(uuid).await
    }

    /// Mute a user; the entry is keyed by the moderator's identity provider
    pub async fn mute_user(&self, identity: &Identity, request: MuteUserRequest) -> Result<()> {
        require(identity, Role::Editor, "mute user")?;
        self.metadata
            .mute_user(
                &identity.identity_provider,
                request.stream_uuid,
                &request.user_id,
            )
            .await?;
        info!(
            stream_uuid = %request.stream_uuid,
            user_id = %request.user_id,
            moderator = %identity.user_id,
            "User muted"
        );
        Ok(())
    }

    // ==================== Files ====================

    /// Bytes of a live output file, served from cache when possible.
    ///
    /// Converted archives and the archive playlist are never served here.
    pub async fn get_file(&self, identity: &Identity, uuid: Uuid, filename: &str) -> Result<Bytes> {
        require(identity, Role::User, "get file")?;

        if !is_plain_file_name(filename) {
            return Err(Error::NotFound(filename.to_string()));
        }
        let path = self.stream_dir(uuid).join(filename);
        if path.extension().is_some_and(|ext| ext == "mp4") || filename == RECORD_PLAYLIST_FILE {
            debug!(path = %path.display(), "Refusing to serve archive file");
            return Err(Error::NotFound(filename.to_string()));
        }

        let playlist = is_playlist(&path);
        let _guard = if playlist {
            Some(self.playlist_lock.lock().await)
        } else {
            None
        };

        if let Some(bytes) = self.segments.get(&path) {
            return Ok(bytes);
        }

        let bytes = read_file(&path).await?;
        self.segments.put(path.clone(), bytes.clone());

        if playlist {
            self.schedule_playlist_refresh(path);
        }

        Ok(bytes)
    }

    fn schedule_playlist_refresh(&self, path: PathBuf) {
        let token = self.tasks.token().child_token();
        match self.refreshing.entry(path.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        debug!(path = %path.display(), "Scheduling playlist refresh");
        let segments = self.segments.clone();
        let lock = Arc::clone(&self.playlist_lock);
        let stopped = token.clone();
        self.tasks.spawn_periodic(
            "playlist-refresh",
            self.config.playlist_refresh_interval(),
            token,
            move || {
                let segments = segments.clone();
                let lock = Arc::clone(&lock);
                let path = path.clone();
                let stopped = stopped.clone();
                async move {
                    let _guard = lock.lock().await;
                    // the stream may have been deleted while this tick waited
                    if stopped.is_cancelled() {
                        return;
                    }
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => segments.put(path, Bytes::from(bytes)),
                        Err(e) => debug!(path = %path.display(), error = %e, "Playlist refresh skipped"),
                    }
                }
            },
        );
    }

    /// Path of the converted archive, starting a conversion when none exists.
    ///
    /// Answers `NotFound` while the archive is not ready, including when
    /// another conversion already holds the slot.
    pub async fn get_archive(&self, identity: &Identity, uuid: Uuid) -> Result<PathBuf> {
        require(identity, Role::Admin, "get archive")?;

        if self.conversion.is_running() {
            return Err(Error::NotFound("archive is being prepared".to_string()));
        }

        let dir = self.stream_dir(uuid);
        if let Some(archive) = find_archive(&dir).await {
            return Ok(archive);
        }

        let source = dir.join(RECORD_PLAYLIST_FILE);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(Error::NotFound(format!("no archive recorded for {uuid}")));
        }

        let Some(permit) = self.conversion.try_acquire() else {
            debug!(stream_uuid = %uuid, "Archive conversion already running");
            return Err(Error::NotFound("archive is being prepared".to_string()));
        };

        let metadata = Arc::clone(&self.metadata);
        let converter = Arc::clone(&self.converter);
        self.tasks.spawn(async move {
            let _permit = permit;
            let title = match metadata.get_by_id(uuid).await {
                Ok(livestream) => livestream.title,
                Err(e) => {
                    error!(stream_uuid = %uuid, error = %e, "Cannot convert archive of unknown livestream");
                    return;
                }
            };
            match converter.convert(&source, &title).await {
                Ok(target) => info!(stream_uuid = %uuid, target = %target.display(), "Archive converted"),
                Err(e) => error!(stream_uuid = %uuid, error = %e, "Archive conversion failed"),
            }
        });

        Err(Error::NotFound("archive is being prepared".to_string()))
    }
}

/// A single path component that cannot leave the stream directory
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

async fn read_file(path: &Path) -> Result<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| Error::not_found_from_io(&e, &path.display().to_string()))
}
