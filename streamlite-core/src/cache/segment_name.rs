//! File naming shared by the segmenter and the segment cache.
//!
//! Segment files embed their creation time in milliseconds as the second
//! `-`-delimited token of the file name, e.g. `seg-1700000000000-3.ts`.
//! Eviction reads that token and nothing else, so a different naming scheme
//! only needs a new [`segment_timestamp_millis`].

use std::path::Path;

/// Live playlist rewritten by the segmenter
pub const PLAYLIST_FILE: &str = "playlist.m3u8";

/// Archive playlist; only read by the archive converter
pub const RECORD_PLAYLIST_FILE: &str = "record.m3u8";

/// Prefix of live segment files
pub const SEGMENT_PREFIX: &str = "seg";

/// Prefix of archive segment files
pub const RECORD_SEGMENT_PREFIX: &str = "record";

/// Millisecond timestamp embedded in a segment file name.
///
/// Returns `None` for names with fewer than three `-`-delimited tokens or a
/// non-numeric second token; such files are never evicted by age.
#[must_use]
pub fn segment_timestamp_millis(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('-');
    let _prefix = parts.next()?;
    let timestamp = parts.next()?;
    parts.next()?;
    timestamp.parse().ok()
}

#[must_use]
pub fn is_playlist(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "m3u8")
}

/// `ffmpeg -hls_segment_filename` pattern producing names that
/// [`segment_timestamp_millis`] understands.
///
/// `%s` is expanded by strftime to epoch seconds; the trailing `000` turns it
/// into milliseconds. `%%d` becomes the segment index.
#[must_use]
pub fn segment_filename_pattern(prefix: &str) -> String {
    format!("{prefix}-%s000-%%d.ts")
}
