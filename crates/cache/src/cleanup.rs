//! Size-bounded LRU eviction.
//!
//! When the cache grows past its configured maximum, least-recently-accessed
//! entries are removed until it is back under 80% of that maximum. Runs are
//! serialized across processes by an exclusive lock file in the cache
//! directory. Every failure here is logged and swallowed.

use crate::metadata::{CacheMetadata, MetadataStore};
use std::fs::OpenOptions;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, instrument, warn};

pub(crate) const LOCK_FILE: &str = ".cleanup.lock";
/// A lock older than this is assumed to belong to a crashed run.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Outcome of one eviction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Another run held the lock, so nothing was examined.
    pub skipped: bool,
    pub files_removed: usize,
    pub bytes_removed: u64,
    pub size_before: u64,
    pub size_after: u64,
}

/// The size eviction shrinks the cache down to.
pub(crate) fn target_size(max_size_bytes: u64) -> u64 {
    (u128::from(max_size_bytes) * 4 / 5) as u64
}

/// Evict least-recently-accessed entries if the cache exceeds `max_size_bytes`.
///
/// A `max_size_bytes` of zero disables eviction.
#[instrument(skip(store), fields(dir = %store.dir().display()))]
pub async fn run(store: &MetadataStore, max_size_bytes: u64) -> CleanupStats {
    if max_size_bytes == 0 {
        return CleanupStats::default();
    }
    let entries = match store.list_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = ?e, "could not list cache entries");
            return CleanupStats::default();
        },
    };
    let size: u64 = entries.iter().map(|e| e.file_size).sum();
    if size <= max_size_bytes {
        return CleanupStats { size_before: size, size_after: size, ..Default::default() };
    }

    let Some(_lock) = CleanupLock::acquire(store.dir()) else {
        debug!("another cleanup is running");
        return CleanupStats { skipped: true, size_before: size, size_after: size, ..Default::default() };
    };
    // Whoever held the lock before us may already have done the work.
    let entries = match store.list_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = ?e, "could not list cache entries");
            return CleanupStats { size_before: size, size_after: size, ..Default::default() };
        },
    };
    let stats = evict(store, entries, target_size(max_size_bytes)).await;
    if stats.files_removed > 0 {
        info!(
            files_removed = stats.files_removed,
            bytes_removed = stats.bytes_removed,
            size_after = stats.size_after,
            "evicted cache entries"
        );
    }
    stats
}

async fn evict(store: &MetadataStore, mut entries: Vec<CacheMetadata>, target: u64) -> CleanupStats {
    let size_before: u64 = entries.iter().map(|e| e.file_size).sum();
    let mut stats = CleanupStats { size_before, size_after: size_before, ..Default::default() };
    if size_before <= target {
        return stats;
    }
    entries.sort_by(|a, b| {
        a.last_accessed_at
            .cmp(&b.last_accessed_at)
            .then_with(|| a.generated_at.cmp(&b.generated_at))
            .then_with(|| a.file_id.cmp(&b.file_id))
            .then_with(|| a.format.cmp(&b.format))
    });
    for entry in entries {
        if stats.size_after <= target {
            break;
        }
        match store.delete_entry(&entry).await {
            Ok(()) => {
                debug!(file_id = entry.file_id, format = %entry.format, size = entry.file_size, "evicted");
                stats.files_removed += 1;
                stats.bytes_removed += entry.file_size;
                stats.size_after = stats.size_after.saturating_sub(entry.file_size);
            },
            Err(e) => warn!(file_id = entry.file_id, format = %entry.format, error = ?e, "could not evict cache entry"),
        }
    }
    stats
}

/// Exclusive, cross-process eviction lock. Released on drop.
#[derive(Debug)]
struct CleanupLock {
    path: PathBuf,
}
impl CleanupLock {
    /// Try once to take the lock, clearing a stale one and retrying at most once.
    fn acquire(dir: &Path) -> Option<Self> {
        let path = dir.join(LOCK_FILE);
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Some(Self { path }),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists && attempt == 0 => {
                    if !is_stale(&path) {
                        return None;
                    }
                    warn!(path = %path.display(), "removing stale cleanup lock");
                    if let Err(e) = std::fs::remove_file(&path)
                        && e.kind() != IoErrorKind::NotFound
                    {
                        warn!(path = %path.display(), error = %e, "could not remove stale cleanup lock");
                        return None;
                    }
                },
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => return None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not create cleanup lock");
                    return None;
                },
            }
        }
        None
    }
}
impl Drop for CleanupLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != IoErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "could not release cleanup lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}
