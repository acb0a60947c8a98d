//! The serve-or-generate entry point.

use crate::cleanup::{self, CleanupStats};
use crate::error::{ErrorKind, Result};
use crate::filename::download_filename;
use crate::fingerprint::Fingerprint;
use crate::format::CacheFormat;
use crate::generator::{Generator, GeneratorRegistry, PluginGenerator, TargetFormat};
use crate::inflight::InFlight;
use crate::metadata::{CacheMetadata, MetadataStore, remove_if_exists};
use exn::ResultExt;
use shelf_models::{Book, File, FileId};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A ready-to-serve artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Absolute path of the cached artifact
    pub path: PathBuf,
    /// Name to offer the client, derived from current metadata
    pub filename: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
}

/// Where the generator for a miss comes from.
enum Source<'a> {
    Registry(TargetFormat),
    Plugin(&'a dyn PluginGenerator),
}

/// Fingerprint-validated download cache over one directory.
///
/// Cheap to clone; clones share the in-flight registry.
///
/// # Examples
///
/// ```no_run
/// use shelf_cache::{CacheManager, GeneratorRegistry};
/// use shelf_models::{Book, File, FileType};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = CacheManager::new("/var/cache/shelf", 5 << 30, GeneratorRegistry::with_passthrough())?;
/// let book = Book::new(1, "The Way of Kings");
/// let file = File::new(1, 1, FileType::Epub, "/library/way-of-kings.epub");
/// let download = cache.get_or_generate(&CancellationToken::new(), &book, &file).await?;
/// println!("{} as {}", download.path.display(), download.filename);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    store: MetadataStore,
    registry: GeneratorRegistry,
    max_size_bytes: u64,
    in_flight: InFlight,
}

impl CacheManager {
    /// Create a manager over `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidDirectory`] if `dir` is relative or exists
    /// but is not a directory.
    pub fn new(dir: impl AsRef<Path>, max_size_bytes: u64, registry: GeneratorRegistry) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_absolute() {
            exn::bail!(ErrorKind::InvalidDirectory(dir));
        }
        if dir.exists() {
            if !dir.is_dir() {
                exn::bail!(ErrorKind::InvalidDirectory(dir));
            }
        } else {
            // Only happens once at startup; not worth an async constructor.
            sync_create_dir(&dir).or_raise(|| ErrorKind::Io(dir.clone()))?;
        }
        let inner = Inner {
            store: MetadataStore::new(dir),
            registry,
            max_size_bytes,
            in_flight: InFlight::default(),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn dir(&self) -> &Path {
        self.inner.store.dir()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size_bytes
    }

    /// The file in its source format, with current metadata.
    #[instrument(skip_all, fields(file_id = file.id))]
    pub async fn get_or_generate(&self, cancel: &CancellationToken, book: &Book, file: &File) -> Result<Download> {
        let source = Source::Registry(TargetFormat::Original);
        self.serve(cancel, book, file, CacheFormat::Original, None, source).await
    }

    /// The file as a Kobo-optimized EPUB.
    #[instrument(skip_all, fields(file_id = file.id))]
    pub async fn get_or_generate_kepub(&self, cancel: &CancellationToken, book: &Book, file: &File) -> Result<Download> {
        let source = Source::Registry(TargetFormat::Kepub);
        self.serve(cancel, book, file, CacheFormat::Kepub, None, source).await
    }

    /// The file in a plugin-provided format.
    ///
    /// The generator's own fingerprint is folded into the cache key, so a
    /// plugin upgrade or settings change invalidates its entries.
    #[instrument(skip_all, fields(file_id = file.id, format = generator.supported_type()))]
    pub async fn get_or_generate_plugin(
        &self,
        cancel: &CancellationToken,
        book: &Book,
        file: &File,
        generator: &dyn PluginGenerator,
    ) -> Result<Download> {
        let format = CacheFormat::plugin(generator.supported_type())?;
        let plugin_fingerprint = generator.fingerprint(book, file).await.or_raise(|| ErrorKind::Generate)?;
        self.serve(cancel, book, file, format, Some(plugin_fingerprint), Source::Plugin(generator)).await
    }

    async fn serve(
        &self,
        cancel: &CancellationToken,
        book: &Book,
        file: &File,
        format: CacheFormat,
        plugin_fingerprint: Option<String>,
        source: Source<'_>,
    ) -> Result<Download> {
        let hash = Fingerprint::compute(book, file, format.clone(), plugin_fingerprint).await.hash()?;
        let filename = download_filename(book, file, &format);
        if let Some(path) = self.lookup(file.id, &format, &hash).await {
            return Ok(Download { path, filename });
        }

        let _in_flight = self.inner.in_flight.acquire(file.id, &format).await;
        // Someone else may have generated it while we waited.
        if let Some(path) = self.lookup(file.id, &format, &hash).await {
            return Ok(Download { path, filename });
        }
        let path = self.generate(cancel, book, file, &format, hash, source).await?;
        self.spawn_cleanup();
        Ok(Download { path, filename })
    }

    /// Path of a valid entry: the hash matches and the artifact is on disk.
    async fn lookup(&self, file_id: FileId, format: &CacheFormat, hash: &str) -> Option<PathBuf> {
        let store = &self.inner.store;
        let metadata = match store.read(file_id, format).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = ?e, "unreadable cache metadata, regenerating");
                return None;
            },
        };
        if metadata.fingerprint_hash != hash {
            debug!("fingerprint changed");
            return None;
        }
        let path = store.artifact_path(&metadata);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "cached artifact missing");
            return None;
        }
        if !self.touch(&metadata).await {
            return None;
        }
        debug!(path = %path.display(), "cache hit");
        Some(path)
    }

    /// Record a hit. Failing to record it is logged and ignored.
    ///
    /// Eviction does not take the in-flight lock, so it can remove the entry
    /// between the lookup and the touch. Returns `false` when that happened,
    /// after removing any sidecar the touch re-created.
    async fn touch(&self, metadata: &CacheMetadata) -> bool {
        let store = &self.inner.store;
        match store.update_last_accessed(metadata.file_id, &metadata.format).await {
            Ok(_) => {},
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => return false,
            Err(e) => warn!(error = ?e, "could not record cache access"),
        }
        if fs::try_exists(store.artifact_path(metadata)).await.unwrap_or(false) {
            return true;
        }
        debug!("cache entry evicted while being accessed");
        if let Err(e) = store.delete_entry(metadata).await {
            warn!(error = ?e, "could not remove orphaned cache metadata");
        }
        false
    }

    async fn generate(
        &self,
        cancel: &CancellationToken,
        book: &Book,
        file: &File,
        format: &CacheFormat,
        fingerprint_hash: String,
        source: Source<'_>,
    ) -> Result<PathBuf> {
        let registered;
        let generator: &dyn Generator = match source {
            Source::Registry(target) => {
                registered = self.inner.registry.get(file.file_type, target)?;
                registered.as_ref()
            },
            Source::Plugin(plugin) => plugin,
        };
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }

        let artifact = format.artifact_name(file.id, file.file_type);
        let dest = self.dir().join(&artifact);
        // Generate into a private directory and rename into place, so readers
        // never see a partial artifact and failures leave nothing behind.
        let staging = tempfile::Builder::new()
            .prefix(".generating-")
            .tempdir_in(self.dir())
            .or_raise(|| ErrorKind::Io(self.dir().to_path_buf()))?;
        let staged = staging.path().join(&artifact);

        info!(format = %format, source = %file.path.display(), "generating artifact");
        if let Err(e) = generator.generate(cancel, &file.path, &staged, book, file).await {
            if matches!(&*e, ErrorKind::Cancelled) {
                return Err(e);
            }
            return Err(e).or_raise(|| ErrorKind::Generate);
        }
        let file_size = fs::metadata(&staged).await.or_raise(|| ErrorKind::Generate)?.len();
        fs::rename(&staged, &dest).await.or_raise(|| ErrorKind::Io(dest.clone()))?;

        let now = OffsetDateTime::now_utc();
        let metadata = CacheMetadata {
            file_id: file.id,
            format: format.clone(),
            fingerprint_hash,
            generated_at: now,
            last_accessed_at: now,
            file_size,
            artifact,
        };
        if let Err(e) = self.inner.store.write(&metadata).await {
            // An artifact without metadata would never be served or evicted.
            if let Err(cleanup) = remove_if_exists(&dest).await {
                warn!(error = ?cleanup, "could not remove artifact after metadata failure");
            }
            return Err(e);
        }
        debug!(path = %dest.display(), size = file_size, "artifact cached");
        Ok(dest)
    }

    fn spawn_cleanup(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            cleanup::run(&inner.store, inner.max_size_bytes).await;
        });
    }

    /// Drop the cached original of `file`.
    pub async fn invalidate(&self, file: &File) -> Result<()> {
        self.invalidate_format(file.id, &CacheFormat::Original).await
    }

    pub async fn invalidate_kepub(&self, file_id: FileId) -> Result<()> {
        self.invalidate_format(file_id, &CacheFormat::Kepub).await
    }

    pub async fn invalidate_plugin(&self, file_id: FileId, format_id: &str) -> Result<()> {
        self.invalidate_format(file_id, &CacheFormat::plugin(format_id)?).await
    }

    /// Remove one entry. Waits for an in-progress generation of the same entry.
    #[instrument(skip(self))]
    pub async fn invalidate_format(&self, file_id: FileId, format: &CacheFormat) -> Result<()> {
        let _in_flight = self.inner.in_flight.acquire(file_id, format).await;
        self.inner.store.delete(file_id, format).await
    }

    /// Remove every cached format of a file. Returns how many entries were removed.
    #[instrument(skip(self))]
    pub async fn invalidate_file(&self, file_id: FileId) -> Result<usize> {
        self.inner.store.delete_all_for_file(file_id).await
    }

    /// Run an eviction sweep now and wait for it.
    pub async fn trigger_cleanup(&self) -> CleanupStats {
        cleanup::run(&self.inner.store, self.inner.max_size_bytes).await
    }

    pub async fn entries(&self) -> Result<Vec<CacheMetadata>> {
        self.inner.store.list_entries().await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries().await?;
        Ok(CacheStats { entries: entries.len(), total_size: entries.iter().map(|e| e.file_size).sum() })
    }
}
