//! Archive-to-file conversion.
//!
//! Archived streams keep an unbounded `record.m3u8` next to the live output.
//! Conversion remuxes it into a single `.mp4` in the same directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{Error, Result};

#[async_trait]
pub trait ArchiveConverter: Send + Sync {
    /// Convert `source_playlist` into `<target_name>.mp4` beside it
    async fn convert(&self, source_playlist: &Path, target_name: &str) -> Result<PathBuf>;
}

/// Suffix of the file ffmpeg writes before it is renamed into place
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct FfmpegArchiveConverter {
    ffmpeg_path: String,
}

impl FfmpegArchiveConverter {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

#[async_trait]
impl ArchiveConverter for FfmpegArchiveConverter {
    async fn convert(&self, source_playlist: &Path, target_name: &str) -> Result<PathBuf> {
        let dir = source_playlist
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no parent", source_playlist.display())))?;
        let source = source_playlist
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("{} has no file name", source_playlist.display())))?;
        let target = format!("{}.mp4", archive_file_stem(target_name));
        let partial = format!("{target}{PARTIAL_SUFFIX}");

        info!(
            source = %source_playlist.display(),
            target = %target,
            "Converting archive to mp4"
        );

        // the muxer is named explicitly since the partial name hides the extension
        let output = Command::new(&self.ffmpeg_path)
            .current_dir(dir)
            .arg("-y")
            .arg("-i")
            .arg(source)
            .args(["-c", "copy", "-bsf:a", "aac_adtstoasc", "-f", "mp4"])
            .arg(&partial)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let partial_path = dir.join(&partial);
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                discard_partial(&partial_path).await;
                return Err(e.into());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "ffmpeg conversion failed");
            discard_partial(&partial_path).await;
            return Err(Error::Internal(format!(
                "ffmpeg exited with {}",
                output.status
            )));
        }

        let target_path = dir.join(target);
        if let Err(e) = tokio::fs::rename(&partial_path, &target_path).await {
            discard_partial(&partial_path).await;
            return Err(e.into());
        }
        Ok(target_path)
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial archive"),
    }
}

/// File stem for a converted archive; path separators and control
/// characters are replaced so the title cannot escape the stream directory.
#[must_use]
pub fn archive_file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match stem.trim_matches('.') {
        "" => "record".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// First `.mp4` file in `dir`, if any
pub async fn find_archive(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "mp4") {
            return Some(path);
        }
    }
    None
}
