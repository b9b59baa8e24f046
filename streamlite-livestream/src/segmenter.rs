//! HLS segmenting of an FLV byte stream.
//!
//! [`FfmpegSegmenter`] runs one ffmpeg child per publishing connection and
//! writes the FLV it receives on stdin into a live playlist plus segments,
//! and for archived streams a second, never-pruned recording playlist.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use streamlite_core::cache::segment_name::{
    segment_filename_pattern, PLAYLIST_FILE, RECORD_PLAYLIST_FILE, RECORD_SEGMENT_PREFIX,
    SEGMENT_PREFIX,
};
use streamlite_core::config::LivestreamConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::error::{StreamError, StreamResult};

/// How long a finished segmenter may take to flush before it is killed
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Start a pipeline writing into `output_dir`, creating it if needed
    async fn start(&self, output_dir: &Path, archive: bool) -> StreamResult<Box<dyn SegmenterSink>>;
}

#[async_trait]
pub trait SegmenterSink: Send {
    async fn write(&mut self, chunk: Bytes) -> StreamResult<()>;

    /// Flush and stop the pipeline
    async fn finish(self: Box<Self>) -> StreamResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegSegmenter {
    ffmpeg_path: PathBuf,
    fragment_duration_ms: u64,
    fragment_count: u32,
}

impl FfmpegSegmenter {
    #[must_use]
    pub fn new(ffmpeg_path: impl Into<PathBuf>, fragment_duration_ms: u64, fragment_count: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            fragment_duration_ms,
            fragment_count,
        }
    }

    #[must_use]
    pub fn from_config(config: &LivestreamConfig) -> Self {
        Self::new(
            &config.ffmpeg_path,
            config.fragment_duration_ms,
            config.fragment_count,
        )
    }

    /// Command line for one pipeline, without the program name
    #[must_use]
    pub fn ffmpeg_args(&self, output_dir: &Path, archive: bool) -> Vec<String> {
        let hls_time = format!("{}", self.fragment_duration_ms as f64 / 1000.0);
        let in_dir = |name: &str| output_dir.join(name).to_string_lossy().into_owned();

        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "flv",
            "-i",
            "pipe:0",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        args.extend([
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            hls_time.clone(),
            "-hls_list_size".to_string(),
            self.fragment_count.to_string(),
            "-strftime".to_string(),
            "1".to_string(),
            "-hls_flags".to_string(),
            "delete_segments+second_level_segment_index".to_string(),
            "-hls_segment_filename".to_string(),
            in_dir(&segment_filename_pattern(SEGMENT_PREFIX)),
            in_dir(PLAYLIST_FILE),
        ]);

        if archive {
            args.extend([
                "-map".to_string(),
                "0".to_string(),
                "-c".to_string(),
                "copy".to_string(),
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                hls_time,
                "-hls_list_size".to_string(),
                "0".to_string(),
                "-hls_playlist_type".to_string(),
                "event".to_string(),
                "-strftime".to_string(),
                "1".to_string(),
                "-hls_flags".to_string(),
                "second_level_segment_index".to_string(),
                "-hls_segment_filename".to_string(),
                in_dir(&segment_filename_pattern(RECORD_SEGMENT_PREFIX)),
                in_dir(RECORD_PLAYLIST_FILE),
            ]);
        }

        args
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    async fn start(&self, output_dir: &Path, archive: bool) -> StreamResult<Box<dyn SegmenterSink>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.ffmpeg_args(output_dir, archive))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StreamError::Segmenter(format!(
                    "failed to spawn {}: {e}",
                    self.ffmpeg_path.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StreamError::Segmenter("ffmpeg stdin unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let dir = output_dir.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(output_dir = %dir, "ffmpeg: {}", line);
                }
            });
        }

        debug!(output_dir = %output_dir.display(), archive, "Segmenter started");
        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
        }))
    }
}

struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl SegmenterSink for FfmpegSink {
    async fn write(&mut self, chunk: Bytes) -> StreamResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| StreamError::Segmenter("segmenter already finished".to_string()))?;
        stdin
            .write_all(&chunk)
            .await
            .map_err(|e| StreamError::Segmenter(format!("ffmpeg pipe broken: {e}")))
    }

    async fn finish(mut self: Box<Self>) -> StreamResult<()> {
        // EOF on stdin lets ffmpeg finalize the playlists
        drop(self.stdin.take());

        match tokio::time::timeout(FINISH_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Segmenter exited");
                Ok(())
            }
            Ok(Err(e)) => Err(StreamError::Io(e)),
            Err(_) => {
                warn!("Segmenter did not exit in time, killing it");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}
