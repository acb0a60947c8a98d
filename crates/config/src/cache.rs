use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 5 GiB
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Settings for the download cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding generated artifacts and their sidecars. Must be absolute.
    pub dir: PathBuf,
    /// Upper bound on the total size of cached artifacts. `0` disables eviction.
    pub max_size_bytes: u64,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

/// Platform cache directory (XDG on Linux, `Library/Caches` on macOS), falling
/// back to the system temp directory when no home directory can be found.
fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "shelf")
        .map(|dirs| dirs.cache_dir().join("downloads"))
        .unwrap_or_else(|| std::env::temp_dir().join("shelf").join("downloads"))
}
