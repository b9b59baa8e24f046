//! Use-case tests against in-memory backends.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use streamlite_core::cache::{MemoryChatLog, MemoryPresence};
use streamlite_core::models::{
    AddChatRequest, ChatCursor, CreateLivestreamRequest, Identity, MuteUserRequest, Role,
    UpdateLivestreamRequest,
};
use streamlite_core::service::{
    ArchiveConverter, LivestreamBackends, LivestreamService, MemoryStreamMetadataStore,
    StreamMetadataStore, StreamService,
};
use streamlite_core::{Config, Error, Result};

#[derive(Default)]
struct RecordingStreams {
    open: Mutex<HashSet<Uuid>>,
    closed: Mutex<Vec<Uuid>>,
    fail_close: AtomicBool,
}

#[async_trait]
impl StreamService for RecordingStreams {
    fn open_stream(&self, _name: &str, uuid: Uuid, _secret: &str, _archive: bool) -> Result<()> {
        self.open.lock().insert(uuid);
        Ok(())
    }

    async fn close_stream(&self, uuid: Uuid) -> Result<()> {
        self.open.lock().remove(&uuid);
        self.closed.lock().push(uuid);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("output directory is busy")));
        }
        Ok(())
    }

    fn is_stream_open(&self, uuid: Uuid) -> bool {
        self.open.lock().contains(&uuid)
    }

    fn open_streams(&self) -> Vec<Uuid> {
        self.open.lock().iter().copied().collect()
    }
}

/// Writes a truncated `<title>.mp4` straight away and completes it once
/// released
#[derive(Default)]
struct GatedConverter {
    calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl ArchiveConverter for GatedConverter {
    async fn convert(&self, source_playlist: &Path, target_name: &str) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = source_playlist
            .parent()
            .unwrap()
            .join(format!("{target_name}.mp4"));
        tokio::fs::write(&target, b"mp").await?;
        self.release.notified().await;
        tokio::fs::write(&target, b"mp4").await?;
        Ok(target)
    }
}

struct Harness {
    service: LivestreamService,
    metadata: Arc<MemoryStreamMetadataStore>,
    streams: Arc<RecordingStreams>,
    converter: Arc<GatedConverter>,
    _root: tempfile::TempDir,
}

fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.server.domain = "live.example.com".to_string();
    config.livestream.output_dir = root.path().to_path_buf();
    configure(&mut config);

    let metadata = Arc::new(MemoryStreamMetadataStore::new());
    let streams = Arc::new(RecordingStreams::default());
    let converter = Arc::new(GatedConverter::default());

    let service = LivestreamService::new(
        Arc::new(config),
        LivestreamBackends {
            metadata: metadata.clone(),
            streams: streams.clone(),
            chat: Arc::new(MemoryChatLog::new()),
            presence: Arc::new(MemoryPresence::new()),
            converter: converter.clone(),
        },
    );

    Harness {
        service,
        metadata,
        streams,
        converter,
        _root: root,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn identity(role: Role, user_id: &str) -> Identity {
    Identity {
        user_id: user_id.to_string(),
        user_name: format!("name-{user_id}"),
        avatar: String::new(),
        role,
        identity_provider: "discord".to_string(),
    }
}

async fn create(h: &Harness, archive: bool) -> Uuid {
    h.service
        .create_livestream(
            &identity(Role::Admin, "admin"),
            CreateLivestreamRequest {
                name: "main".to_string(),
                title: "Friday".to_string(),
                is_archived: archive,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .uuid
}

#[tokio::test]
async fn test_create_is_admin_only_and_single() {
    let h = harness();

    let denied = h
        .service
        .create_livestream(&identity(Role::Streamer, "s"), CreateLivestreamRequest::default())
        .await;
    assert!(matches!(denied, Err(Error::Unauthorized(_))));
    assert!(h.metadata.get_one().await.is_err());

    let created = h
        .service
        .create_livestream(&identity(Role::Admin, "admin"), CreateLivestreamRequest::default())
        .await
        .unwrap();
    let stored = h.metadata.get_one().await.unwrap();
    assert_eq!(
        created.stream_push_url,
        format!("rtmp://live.example.com:1935/{}", stored.secret)
    );
    assert!(h.streams.is_stream_open(created.uuid));

    let again = h
        .service
        .create_livestream(&identity(Role::Admin, "admin"), CreateLivestreamRequest::default())
        .await;
    assert!(matches!(again, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_generated_secret_is_path_safe() {
    let h = harness();
    create(&h, false).await;

    let secret = h.metadata.get_one().await.unwrap().secret;
    assert_eq!(secret.len(), 24);
    assert!(secret
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
}

#[tokio::test]
async fn test_playlist_url_scheme() {
    let h = harness();
    let uuid = create(&h, false).await;

    let summary = h.service.get_one(&identity(Role::User, "u")).await.unwrap();
    assert_eq!(
        summary.stream_url,
        format!("http://live.example.com:8080/livestream/{uuid}/playlist.m3u8")
    );
    assert!(matches!(
        h.service.get_one(&identity(Role::Guest, "g")).await,
        Err(Error::Unauthorized(_))
    ));

    let https = harness_with(|config| config.server.https = true);
    let uuid = create(&https, false).await;
    let summary = https.service.get_one(&identity(Role::User, "u")).await.unwrap();
    assert_eq!(
        summary.stream_url,
        format!("https://live.example.com/livestream/{uuid}/playlist.m3u8")
    );
}

#[tokio::test]
async fn test_update_and_delete() {
    let h = harness();
    let uuid = create(&h, false).await;
    let admin = identity(Role::Admin, "admin");

    h.service
        .update_livestream(
            &admin,
            uuid,
            UpdateLivestreamRequest {
                title: Some("Saturday".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let detail = h.service.get_by_id(&admin, uuid).await.unwrap();
    assert_eq!(detail.title, "Saturday");
    assert_eq!(h.service.get_by_owner(&admin, "admin").await.unwrap().uuid, uuid);

    h.service.delete_livestream(&admin, uuid).await.unwrap();
    assert_eq!(*h.streams.closed.lock(), vec![uuid]);
    assert!(!h.streams.is_stream_open(uuid));
    assert!(h.service.get_by_id(&admin, uuid).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_chat_flow() {
    let h = harness();
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");
    let editor = identity(Role::Editor, "e1");

    let m1 = h
        .service
        .add_chat(
            &viewer,
            AddChatRequest {
                stream_uuid: uuid,
                message: "hello".to_string(),
            },
        )
        .await
        .unwrap();
    let m2 = h
        .service
        .add_chat(
            &viewer,
            AddChatRequest {
                stream_uuid: uuid,
                message: "world".to_string(),
            },
        )
        .await
        .unwrap();

    let page = h.service.get_chat(&viewer, uuid, ChatCursor::Newest).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].user_name, "name-v1");

    assert!(matches!(
        h.service.delete_chat(&viewer, uuid, m1).await,
        Err(Error::Unauthorized(_))
    ));
    h.service.delete_chat(&editor, uuid, m1).await.unwrap();

    let page = h.service.get_chat(&viewer, uuid, ChatCursor::Newest).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, m2);
    assert_eq!(h.service.tombstones(&viewer, uuid).await.unwrap(), vec![m1]);
}

#[tokio::test]
async fn test_chat_length_limit_counts_characters() {
    let h = harness();
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");

    let exactly_100 = "é".repeat(100);
    assert!(h
        .service
        .add_chat(
            &viewer,
            AddChatRequest {
                stream_uuid: uuid,
                message: exactly_100,
            },
        )
        .await
        .is_ok());

    let too_long = "a".repeat(101);
    assert!(matches!(
        h.service
            .add_chat(
                &viewer,
                AddChatRequest {
                    stream_uuid: uuid,
                    message: too_long,
                },
            )
            .await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_muted_user_cannot_chat() {
    let h = harness();
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");
    let editor = identity(Role::Editor, "e1");

    h.service
        .mute_user(
            &editor,
            MuteUserRequest {
                stream_uuid: uuid,
                user_id: "v1".to_string(),
            },
        )
        .await
        .unwrap();

    let result = h
        .service
        .add_chat(
            &viewer,
            AddChatRequest {
                stream_uuid: uuid,
                message: "let me talk".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Muted(key)) if key == "discord-v1"));

    let page = h.service.get_chat(&viewer, uuid, ChatCursor::Newest).await.unwrap();
    assert!(page.is_empty());
}

#[tokio::test]
async fn test_ping_counts_distinct_viewers() {
    let h = harness();
    let uuid = create(&h, false).await;

    assert_eq!(h.service.ping_viewer(&identity(Role::User, "a"), uuid).await.unwrap(), 1);
    assert_eq!(h.service.ping_viewer(&identity(Role::User, "a"), uuid).await.unwrap(), 1);
    assert_eq!(h.service.ping_viewer(&identity(Role::Admin, "b"), uuid).await.unwrap(), 2);

    assert_eq!(h.service.prune_viewers(uuid, 60).await.unwrap(), 2);
    assert_eq!(h.service.prune_viewers(uuid, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_ping_requires_live_stream() {
    let h = harness();
    let viewer = identity(Role::User, "a");

    let unknown = Uuid::new_v4();
    assert!(h.service.ping_viewer(&viewer, unknown).await.unwrap_err().is_not_found());
    assert_eq!(h.service.prune_viewers(unknown, 60).await.unwrap(), 0);

    let uuid = create(&h, false).await;
    assert_eq!(h.service.ping_viewer(&viewer, uuid).await.unwrap(), 1);

    h.service
        .delete_livestream(&identity(Role::Admin, "admin"), uuid)
        .await
        .unwrap();
    assert!(h.service.ping_viewer(&viewer, uuid).await.unwrap_err().is_not_found());
    assert_eq!(h.service.prune_viewers(uuid, 60).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_drops_chat_and_viewers() {
    let h = harness();
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");

    h.service.ping_viewer(&viewer, uuid).await.unwrap();
    let id = h
        .service
        .add_chat(
            &viewer,
            AddChatRequest {
                stream_uuid: uuid,
                message: "bye".to_string(),
            },
        )
        .await
        .unwrap();
    h.service
        .delete_chat(&identity(Role::Editor, "e1"), uuid, id)
        .await
        .unwrap();

    h.service
        .delete_livestream(&identity(Role::Admin, "admin"), uuid)
        .await
        .unwrap();

    assert!(h.service.get_chat(&viewer, uuid, ChatCursor::Newest).await.unwrap().is_empty());
    assert!(h.service.tombstones(&viewer, uuid).await.unwrap().is_empty());
    assert_eq!(h.service.prune_viewers(uuid, 60).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_close_still_releases_cached_state() {
    let h = harness_with(|config| config.cache.playlist_refresh_interval_ms = 50);
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");
    let dir = h.service.stream_dir(uuid);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("playlist.m3u8"), b"#EXTM3U").unwrap();
    h.service.get_file(&viewer, uuid, "playlist.m3u8").await.unwrap();
    assert_eq!(h.service.segments().len(), 1);

    h.streams.fail_close.store(true, Ordering::SeqCst);
    let result = h
        .service
        .delete_livestream(&identity(Role::Admin, "admin"), uuid)
        .await;
    assert!(matches!(result, Err(Error::Io(_))));
    assert!(h.service.segments().is_empty());

    // a cancelled refresh never repopulates the cache
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.service.segments().is_empty());
    assert!(h.service.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_get_file_serves_and_hides_archives() {
    let h = harness();
    let uuid = create(&h, true).await;
    let viewer = identity(Role::User, "v1");
    let dir = h.service.stream_dir(uuid);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("seg-1700000000000-0.ts"), b"ts-bytes").unwrap();
    std::fs::write(dir.join("record.m3u8"), b"#EXTM3U").unwrap();
    std::fs::write(dir.join("Friday.mp4"), b"mp4").unwrap();

    let bytes = h
        .service
        .get_file(&viewer, uuid, "seg-1700000000000-0.ts")
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ts-bytes");

    // Served from cache once read
    std::fs::remove_file(dir.join("seg-1700000000000-0.ts")).unwrap();
    assert!(h
        .service
        .get_file(&viewer, uuid, "seg-1700000000000-0.ts")
        .await
        .is_ok());

    for hidden in ["record.m3u8", "Friday.mp4", "../other.ts", "missing.ts"] {
        let result = h.service.get_file(&viewer, uuid, hidden).await;
        assert!(result.unwrap_err().is_not_found(), "{hidden} should be hidden");
    }
}

#[tokio::test]
async fn test_playlist_is_refreshed_in_background() {
    let h = harness_with(|config| config.cache.playlist_refresh_interval_ms = 50);
    let uuid = create(&h, false).await;
    let viewer = identity(Role::User, "v1");
    let dir = h.service.stream_dir(uuid);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("playlist.m3u8"), b"#EXTM3U\n#v1").unwrap();

    let first = h.service.get_file(&viewer, uuid, "playlist.m3u8").await.unwrap();
    assert_eq!(&first[..], b"#EXTM3U\n#v1");

    std::fs::write(dir.join("playlist.m3u8"), b"#EXTM3U\n#v2").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let refreshed = h.service.get_file(&viewer, uuid, "playlist.m3u8").await.unwrap();
    assert_eq!(&refreshed[..], b"#EXTM3U\n#v2");

    assert!(h.service.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_archive_conversion_is_single_flight() {
    let h = harness();
    let uuid = create(&h, true).await;
    let admin = identity(Role::Admin, "admin");
    let dir = h.service.stream_dir(uuid);
    std::fs::create_dir_all(&dir).unwrap();

    // Nothing recorded yet
    assert!(h.service.get_archive(&admin, uuid).await.unwrap_err().is_not_found());
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 0);

    std::fs::write(dir.join("record.m3u8"), b"#EXTM3U").unwrap();

    assert!(h.service.get_archive(&admin, uuid).await.unwrap_err().is_not_found());
    assert!(h.service.get_archive(&admin, uuid).await.unwrap_err().is_not_found());
    tokio::task::yield_now().await;
    assert!(h.service.conversion_guard().is_running());

    // the truncated file is on disk but the conversion still holds the slot
    for _ in 0..50 {
        if dir.join("Friday.mp4").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dir.join("Friday.mp4").exists());
    assert!(h.service.get_archive(&admin, uuid).await.unwrap_err().is_not_found());

    h.converter.release.notify_one();
    for _ in 0..50 {
        if !h.service.conversion_guard().is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.converter.calls.load(Ordering::SeqCst), 1);

    let archive = h.service.get_archive(&admin, uuid).await.unwrap();
    assert_eq!(archive, dir.join("Friday.mp4"));
    assert_eq!(std::fs::read(&archive).unwrap(), b"mp4");

    assert!(matches!(
        h.service.get_archive(&identity(Role::Editor, "e"), uuid).await,
        Err(Error::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_reopen_existing_registers_stream() {
    let h = harness();
    assert_eq!(h.service.reopen_existing().await.unwrap(), None);

    let uuid = create(&h, false).await;
    h.streams.open.lock().clear();

    assert_eq!(h.service.reopen_existing().await.unwrap(), Some(uuid));
    assert!(h.streams.is_stream_open(uuid));
}
