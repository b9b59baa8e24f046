use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use streamlite_api::{create_router, AppState};
use streamlite_core::cache::{
    ChatLog, KeyBuilder, MemoryChatLog, MemoryPresence, PresenceTracker, RedisChatLog,
    RedisPresence,
};
use streamlite_core::service::{
    FfmpegArchiveConverter, JwtAuthorizer, LivestreamBackends, LivestreamService,
    MemoryStreamMetadataStore,
};
use streamlite_core::Config;
use streamlite_livestream::{FfmpegSegmenter, IngestServer, StreamRegistry};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Time open ingest connections get to flush their segmenters; stays below
/// `SHUTDOWN_TIMEOUT`
const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(8);

pub struct Services {
    pub livestream: LivestreamService,
    pub registry: Arc<StreamRegistry>,
    pub segmenter: Arc<FfmpegSegmenter>,
    pub authorizer: Arc<JwtAuthorizer>,
}

/// Build every backend from configuration. An empty Redis URL selects the
/// in-memory chat and presence backends.
pub async fn init_services(config: Arc<Config>) -> Result<Services> {
    let registry = Arc::new(StreamRegistry::from_config(&config.livestream));
    let segmenter = Arc::new(FfmpegSegmenter::from_config(&config.livestream));

    let (chat, presence): (Arc<dyn ChatLog>, Arc<dyn PresenceTracker>) =
        if config.redis.url.is_empty() {
            info!("Redis not configured, using in-memory chat and presence");
            (Arc::new(MemoryChatLog::new()), Arc::new(MemoryPresence::new()))
        } else {
            let client =
                redis::Client::open(config.redis.url.as_str()).context("Invalid Redis URL")?;
            let conn = redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            let keys = KeyBuilder::from_config(&config);
            info!("Chat and presence backed by Redis");
            (
                Arc::new(RedisChatLog::new(conn.clone(), keys.clone())),
                Arc::new(RedisPresence::new(conn, keys)),
            )
        };

    let livestream = LivestreamService::new(
        Arc::clone(&config),
        LivestreamBackends {
            metadata: Arc::new(MemoryStreamMetadataStore::new()),
            streams: registry.clone(),
            chat,
            presence,
            converter: Arc::new(FfmpegArchiveConverter::new(
                config.livestream.ffmpeg_path.clone(),
            )),
        },
    );

    Ok(Services {
        livestream,
        registry,
        segmenter,
        authorizer: Arc::new(JwtAuthorizer::new(config.jwt.secret.as_bytes())),
    })
}

pub struct StreamLiteServer {
    config: Arc<Config>,
    services: Services,
}

impl StreamLiteServer {
    pub const fn new(config: Arc<Config>, services: Services) -> Self {
        Self { config, services }
    }

    pub async fn run(self) -> Result<()> {
        let Self { config, services } = self;
        let shutdown = CancellationToken::new();

        tokio::fs::create_dir_all(&config.livestream.output_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory {}",
                    config.livestream.output_dir.display()
                )
            })?;

        // 1. Ingest listener; a bind failure is fatal
        let ingest = IngestServer::bind(
            &config.rtmp_address(),
            Arc::clone(&services.registry),
            services.segmenter.clone(),
        )
        .await
        .map_err(streamlite_core::Error::from)?;

        // 2. Re-register the persisted stream and start periodic maintenance
        match services.livestream.reopen_existing().await {
            Ok(Some(uuid)) => info!(stream_uuid = %uuid, "Existing livestream accepting broadcasts"),
            Ok(None) => info!("No livestream configured yet"),
            Err(e) => warn!(error = %e, "Failed to reopen existing livestream"),
        }
        services.livestream.start_maintenance();

        let mut ingest_handle = tokio::spawn(ingest.run(shutdown.clone(), INGEST_DRAIN_TIMEOUT));

        // 3. HTTP server
        let http_address = config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_address}"))?;
        info!("HTTP server listening on {}", http_address);

        let router = create_router(AppState::new(
            services.livestream.clone(),
            services.authorizer.clone(),
        ));
        let graceful = shutdown.clone().cancelled_owned();
        let mut http_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        info!("All servers started successfully");

        tokio::select! {
            _ = &mut ingest_handle => error!("RTMP ingest stopped unexpectedly"),
            _ = &mut http_handle => error!("HTTP server stopped unexpectedly"),
            () = shutdown_signal() => info!("Shutdown signal received, starting graceful shutdown..."),
        }

        // Signal all components to shut down
        shutdown.cancel();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            let _ = (&mut http_handle).await;
            let _ = (&mut ingest_handle).await;
        })
        .await
        .is_err()
        {
            warn!("Servers did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }

        if !services.livestream.shutdown(SHUTDOWN_TIMEOUT).await {
            warn!("Background tasks did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }

        info!("StreamLite stopped");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
