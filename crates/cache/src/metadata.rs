//! JSON sidecars recording what each cached artifact was generated from.

use crate::error::{ErrorKind, Result};
use crate::format::{CacheFormat, SIDECAR_SUFFIX};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use shelf_models::FileId;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// The persisted record for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub file_id: FileId,
    pub format: CacheFormat,
    /// Hash of the [`Fingerprint`](crate::Fingerprint) the artifact was generated from
    pub fingerprint_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,
    /// Artifact size in bytes
    pub file_size: u64,
    /// Artifact file name, relative to the cache directory
    pub artifact: String,
}

/// Reads and writes [`CacheMetadata`] sidecars in a single flat directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}
impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sidecar_path(&self, file_id: FileId, format: &CacheFormat) -> PathBuf {
        self.dir.join(format.sidecar_name(file_id))
    }

    pub fn artifact_path(&self, metadata: &CacheMetadata) -> PathBuf {
        self.dir.join(&metadata.artifact)
    }

    /// Read the sidecar for an entry. A missing sidecar is `Ok(None)`; an
    /// unparseable one is [`ErrorKind::InvalidData`].
    pub async fn read(&self, file_id: FileId, format: &CacheFormat) -> Result<Option<CacheMetadata>> {
        let path = self.sidecar_path(file_id, format);
        match fs::read(&path).await {
            Ok(bytes) => Self::parse(&path, &bytes).map(Some),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).or_raise(|| ErrorKind::Io(path)),
        }
    }

    /// Persist a sidecar. The JSON is written to a temporary file in the same
    /// directory and renamed into place, so readers never see a partial record.
    #[instrument(skip_all, fields(file_id = metadata.file_id, format = %metadata.format))]
    pub async fn write(&self, metadata: &CacheMetadata) -> Result<()> {
        let path = self.sidecar_path(metadata.file_id, &metadata.format);
        let json = serde_json::to_vec_pretty(metadata).or_raise(|| ErrorKind::InvalidData(path.clone()))?;
        let dir = self.dir.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new().prefix(".meta-").suffix(".tmp").tempfile_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .or_raise(|| ErrorKind::Io(path.clone()))?
        .or_raise(|| ErrorKind::Io(path))
    }

    /// Bump `last_accessed_at` to now.
    ///
    /// Touching an entry that has no sidecar is a caller error and fails with
    /// [`ErrorKind::NotFound`].
    pub async fn update_last_accessed(&self, file_id: FileId, format: &CacheFormat) -> Result<CacheMetadata> {
        let Some(mut metadata) = self.read(file_id, format).await? else {
            exn::bail!(ErrorKind::NotFound(self.sidecar_path(file_id, format)));
        };
        metadata.last_accessed_at = OffsetDateTime::now_utc();
        self.write(&metadata).await?;
        Ok(metadata)
    }

    /// Remove an entry's sidecar and artifact. Missing files are not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, file_id: FileId, format: &CacheFormat) -> Result<()> {
        let mut artifacts = format.artifact_candidates(file_id);
        // The sidecar knows the exact artifact; a corrupt one is still deleted.
        if let Ok(Some(metadata)) = self.read(file_id, format).await
            && !artifacts.contains(&metadata.artifact)
        {
            artifacts.push(metadata.artifact);
        }
        for artifact in artifacts {
            remove_if_exists(&self.dir.join(artifact)).await?;
        }
        remove_if_exists(&self.sidecar_path(file_id, format)).await
    }

    /// Remove exactly the files a listed entry refers to.
    pub async fn delete_entry(&self, metadata: &CacheMetadata) -> Result<()> {
        remove_if_exists(&self.artifact_path(metadata)).await?;
        remove_if_exists(&self.sidecar_path(metadata.file_id, &metadata.format)).await
    }

    /// Remove every cached format of a file, e.g. after the file record is deleted.
    pub async fn delete_all_for_file(&self, file_id: FileId) -> Result<usize> {
        let entries = self.list_entries().await?;
        let mut removed = 0;
        for entry in entries.iter().filter(|e| e.file_id == file_id) {
            self.delete_entry(entry).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// All parseable sidecars in the cache directory.
    ///
    /// Sidecars that fail to parse are skipped with a warning rather than
    /// failing the listing. A missing cache directory lists as empty.
    pub async fn list_entries(&self) -> Result<Vec<CacheMetadata>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(self.dir.clone())),
        };
        let mut entries = vec![];
        while let Some(entry) = dir.next_entry().await.or_raise(|| ErrorKind::Io(self.dir.clone()))? {
            let path = entry.path();
            let is_sidecar = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX) && !n.starts_with('.'));
            if !is_sidecar {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Deleted between listing and reading (eviction, invalidation).
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable cache sidecar");
                    continue;
                },
            };
            match Self::parse(&path, &bytes) {
                Ok(metadata) => entries.push(metadata),
                Err(e) => warn!(path = %path.display(), error = ?e, "skipping corrupt cache sidecar"),
            }
        }
        Ok(entries)
    }

    /// Sum of `file_size` over all listed entries.
    pub async fn total_size(&self) -> Result<u64> {
        Ok(self.list_entries().await?.iter().map(|e| e.file_size).sum())
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<CacheMetadata> {
        let metadata: CacheMetadata = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidData(path.to_path_buf()))?;
        // The artifact name is trusted for deletion, so it must not point
        // outside the cache directory.
        let mut components = Path::new(&metadata.artifact).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(metadata),
            _ => exn::bail!(ErrorKind::InvalidData(path.to_path_buf())),
        }
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed cache file");
            Ok(())
        },
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).or_raise(|| ErrorKind::Io(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn metadata(file_id: FileId, format: CacheFormat, artifact: &str) -> CacheMetadata {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        CacheMetadata {
            file_id,
            format,
            fingerprint_hash: "ab".repeat(32),
            generated_at: now,
            last_accessed_at: now,
            file_size: 4,
            artifact: artifact.to_string(),
        }
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        assert!(store.read(1, &CacheFormat::Original).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let record = metadata(1, CacheFormat::Kepub, "1.kepub.epub");
        store.write(&record).await.unwrap();
        assert!(dir.path().join("1.kepub.meta.json").is_file());
        assert_eq!(store.read(1, &CacheFormat::Kepub).await.unwrap(), Some(record));
        // No temporary files left behind.
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let mut record = metadata(1, CacheFormat::Original, "1.epub");
        store.write(&record).await.unwrap();
        record.fingerprint_hash = "cd".repeat(32);
        store.write(&record).await.unwrap();
        assert_eq!(store.read(1, &CacheFormat::Original).await.unwrap().unwrap().fingerprint_hash, "cd".repeat(32));
    }

    #[tokio::test]
    async fn test_read_corrupt_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(dir.path().join("1.meta.json"), b"{not json").unwrap();
        let err = store.read(1, &CacheFormat::Original).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_rejects_artifact_outside_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let json = serde_json::to_vec(&metadata(1, CacheFormat::Original, "../../etc/passwd")).unwrap();
        std::fs::write(dir.path().join("1.meta.json"), json).unwrap();
        assert!(store.read(1, &CacheFormat::Original).await.is_err());
        assert!(store.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_last_accessed() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let record = metadata(1, CacheFormat::Original, "1.epub");
        store.write(&record).await.unwrap();
        let updated = store.update_last_accessed(1, &CacheFormat::Original).await.unwrap();
        assert!(updated.last_accessed_at > record.last_accessed_at + Duration::days(1));
        assert_eq!(updated.generated_at, record.generated_at);
        assert_eq!(store.read(1, &CacheFormat::Original).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_update_last_accessed_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let err = store.update_last_accessed(1, &CacheFormat::Original).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_both_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(dir.path().join("1.cbz"), b"data").unwrap();
        store.write(&metadata(1, CacheFormat::Original, "1.cbz")).await.unwrap();
        store.delete(1, &CacheFormat::Original).await.unwrap();
        assert!(!dir.path().join("1.cbz").exists());
        assert!(!dir.path().join("1.meta.json").exists());
        store.delete(1, &CacheFormat::Original).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_sidecar_removes_orphaned_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(dir.path().join("3.plugin.mobi"), b"data").unwrap();
        store.delete(3, &CacheFormat::plugin("mobi").unwrap()).await.unwrap();
        assert!(!dir.path().join("3.plugin.mobi").exists());
    }

    #[tokio::test]
    async fn test_delete_leaves_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(dir.path().join("1.epub"), b"data").unwrap();
        std::fs::write(dir.path().join("1.kepub.epub"), b"data").unwrap();
        store.write(&metadata(1, CacheFormat::Original, "1.epub")).await.unwrap();
        store.write(&metadata(1, CacheFormat::Kepub, "1.kepub.epub")).await.unwrap();
        store.delete(1, &CacheFormat::Kepub).await.unwrap();
        assert!(dir.path().join("1.epub").exists());
        assert!(store.read(1, &CacheFormat::Original).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write(&metadata(1, CacheFormat::Original, "1.epub")).await.unwrap();
        store.write(&metadata(2, CacheFormat::plugin("mobi").unwrap(), "2.plugin.mobi")).await.unwrap();
        std::fs::write(dir.path().join("3.meta.json"), b"garbage").unwrap();
        std::fs::write(dir.path().join("1.epub"), b"data").unwrap();
        std::fs::write(dir.path().join(".cleanup.lock"), b"").unwrap();

        let mut entries = store.list_entries().await.unwrap();
        entries.sort_by_key(|e| e.file_id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].format, CacheFormat::plugin("mobi").unwrap());
        assert_eq!(store.total_size().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("nope"));
        assert!(store.list_entries().await.unwrap().is_empty());
        assert_eq!(store.total_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_all_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        store.write(&metadata(1, CacheFormat::Original, "1.epub")).await.unwrap();
        store.write(&metadata(1, CacheFormat::Kepub, "1.kepub.epub")).await.unwrap();
        store.write(&metadata(2, CacheFormat::Original, "2.epub")).await.unwrap();
        assert_eq!(store.delete_all_for_file(1).await.unwrap(), 2);
        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_id, 2);
    }
}
