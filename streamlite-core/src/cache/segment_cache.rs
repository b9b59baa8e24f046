// Read-through cache over the segmenter's output files.
//
// Entries are keyed by absolute path and shared by every reader of that path.
// Age-based eviction relies on the timestamp embedded in segment file names;
// names without one (playlists) are only ever replaced, never aged out.
//
// An optional entry cap drops the oldest insertion when a new path would
// exceed it, bounding growth between eviction passes.

use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::segment_name::segment_timestamp_millis;

#[derive(Debug, Clone)]
pub struct SegmentCacheEntry {
    pub path: PathBuf,
    pub bytes: Bytes,
    pub inserted_at_millis: u64,
}

#[derive(Clone, Default)]
pub struct SegmentCache {
    entries: Arc<DashMap<PathBuf, Arc<SegmentCacheEntry>>>,
    /// 0 means unbounded
    max_entries: usize,
}

impl SegmentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Bytes> {
        self.entries.get(path).map(|entry| entry.bytes.clone())
    }

    /// Unconditional upsert
    pub fn put(&self, path: impl Into<PathBuf>, bytes: Bytes) {
        self.put_at(path, bytes, current_millis());
    }

    pub fn put_at(&self, path: impl Into<PathBuf>, bytes: Bytes, now_millis: u64) {
        let path = path.into();

        if self.max_entries > 0 && !self.entries.contains_key(&path) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        let entry = SegmentCacheEntry {
            path: path.clone(),
            bytes,
            inserted_at_millis: now_millis,
        };
        self.entries.insert(path, Arc::new(entry));
    }

    pub fn delete(&self, path: &Path) {
        self.entries.remove(path);
    }

    /// Remove every entry whose embedded timestamp is more than
    /// `max_age_millis` older than `now_millis`. Returns the number removed.
    pub fn scan_and_evict(&self, now_millis: u64, max_age_millis: u64) -> usize {
        let before = self.entries.len();

        self.entries.retain(|path, _| match segment_timestamp_millis(path) {
            Some(timestamp) => now_millis.saturating_sub(timestamp) <= max_age_millis,
            None => true,
        });

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "Evicted stale segments");
        }
        evicted
    }

    /// Drop every entry under `dir`, used when a stream's output is deleted.
    pub fn delete_dir(&self, dir: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| !path.starts_with(dir));
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted_at_millis)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(path) => self.entries.remove(&path).is_some(),
            None => false,
        }
    }
}

pub(crate) fn current_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
