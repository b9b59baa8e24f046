use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub livestream: LivestreamConfig,
    pub cache: CacheConfig,
    pub presence: PresenceConfig,
    pub chat: ChatConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Public domain used when building push and playlist URLs
    pub domain: String,
    /// When true, playlist URLs use https and omit the port
    pub https: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            domain: "localhost".to_string(),
            https: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamConfig {
    pub rtmp_host: String,
    pub rtmp_port: u16,
    /// Root of the per-stream output directories
    pub output_dir: PathBuf,
    pub fragment_duration_ms: u64,
    /// Number of fragments kept in the live playlist
    pub fragment_count: u32,
    pub ffmpeg_path: String,
}

impl Default for LivestreamConfig {
    fn default() -> Self {
        Self {
            rtmp_host: "0.0.0.0".to_string(),
            rtmp_port: 1935,
            output_dir: PathBuf::from("./hls"),
            fragment_duration_ms: 500,
            fragment_count: 5,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub playlist_refresh_interval_ms: u64,
    pub eviction_interval_seconds: u64,
    pub eviction_max_age_ms: u64,
    /// Upper bound on cached files; 0 disables the cap
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            playlist_refresh_interval_ms: 1000,
            eviction_interval_seconds: 10,
            eviction_max_age_ms: 30_000,
            max_entries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub prune_interval_seconds: u64,
    pub window_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            prune_interval_seconds: 10,
            window_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub page_size: usize,
    pub max_message_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_message_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Empty selects the in-memory chat and presence backends
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: "streamlite:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STREAMLITE_SERVER__HTTP_PORT, STREAMLITE_LIVESTREAM__RTMP_PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("STREAMLITE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Returns every problem found; an empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server.domain.is_empty() {
            errors.push("server.domain must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.livestream.rtmp_port == 0 {
            errors.push("livestream.rtmp_port must be non-zero".to_string());
        }
        if self.livestream.fragment_duration_ms == 0 {
            errors.push("livestream.fragment_duration_ms must be non-zero".to_string());
        }
        if self.livestream.fragment_count == 0 {
            errors.push("livestream.fragment_count must be non-zero".to_string());
        }
        if self.cache.playlist_refresh_interval_ms == 0 {
            errors.push("cache.playlist_refresh_interval_ms must be non-zero".to_string());
        }
        if self.cache.eviction_interval_seconds == 0 {
            errors.push("cache.eviction_interval_seconds must be non-zero".to_string());
        }
        if self.presence.prune_interval_seconds == 0 {
            errors.push("presence.prune_interval_seconds must be non-zero".to_string());
        }
        if self.chat.page_size == 0 {
            errors.push("chat.page_size must be non-zero".to_string());
        }
        if self.jwt.secret.len() < 16 {
            errors.push("jwt.secret must be at least 16 bytes".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        errors
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn rtmp_address(&self) -> String {
        format!("{}:{}", self.livestream.rtmp_host, self.livestream.rtmp_port)
    }

    #[must_use]
    pub const fn playlist_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.cache.playlist_refresh_interval_ms)
    }

    #[must_use]
    pub const fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.cache.eviction_interval_seconds)
    }

    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.presence.prune_interval_seconds)
    }
}
