//! Format generators: the seam between the cache and whatever produces files.
//!
//! The cache never transcodes anything itself. It asks a [`Generator`] to
//! write an artifact at a path it chooses, and records what it was generated
//! from. Built-in formats are looked up in a [`GeneratorRegistry`]; plugin
//! formats bring their own [`PluginGenerator`].

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use shelf_models::{Book, File, FileType};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Built-in output formats served from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Original,
    Kepub,
}
impl Display for TargetFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Original => f.write_str("original"),
            Self::Kepub => f.write_str("kepub"),
        }
    }
}

/// Produces one artifact from a source file.
///
/// Implementations write to `dest` only; the caller owns the final location
/// and removes `dest` if this returns an error. Long-running work should
/// watch `cancel` and bail with [`ErrorKind::Cancelled`].
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, cancel: &CancellationToken, source: &Path, dest: &Path, book: &Book, file: &File) -> Result<()>;
}

/// A generator for a format the library does not know natively.
#[async_trait]
pub trait PluginGenerator: Generator {
    /// Identifier of the output format, e.g. `mobi`. Used in cache file names.
    fn supported_type(&self) -> &str;

    /// Opaque string that changes whenever this generator's output for the
    /// given inputs would change (plugin version, settings, ...).
    async fn fingerprint(&self, book: &Book, file: &File) -> Result<String>;
}

/// Built-in generators keyed by source type and target format.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<(FileType, TargetFormat), Arc<dyn Generator>>,
}
impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that serves every source type in its original format by copying it.
    pub fn with_passthrough() -> Self {
        let mut registry = Self::new();
        let passthrough: Arc<dyn Generator> = Arc::new(PassthroughGenerator);
        for file_type in [FileType::Epub, FileType::Cbz, FileType::M4b, FileType::Pdf] {
            registry.register(file_type, TargetFormat::Original, Arc::clone(&passthrough));
        }
        registry
    }

    /// Register (or replace) the generator for a combination.
    pub fn register(&mut self, source: FileType, target: TargetFormat, generator: Arc<dyn Generator>) -> &mut Self {
        self.generators.insert((source, target), generator);
        self
    }

    /// Look up the generator for a combination, failing with
    /// [`ErrorKind::Unsupported`] when none is registered.
    pub fn get(&self, source: FileType, target: TargetFormat) -> Result<Arc<dyn Generator>> {
        match self.generators.get(&(source, target)) {
            Some(generator) => Ok(Arc::clone(generator)),
            None => exn::bail!(ErrorKind::Unsupported { file_type: source, format: target.to_string() }),
        }
    }
}
impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut keys: Vec<_> = self.generators.keys().map(|(s, t)| format!("{s}->{t}")).collect();
        keys.sort();
        f.debug_struct("GeneratorRegistry").field("generators", &keys).finish()
    }
}

/// Copies the source file unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughGenerator;

#[async_trait]
impl Generator for PassthroughGenerator {
    async fn generate(&self, cancel: &CancellationToken, source: &Path, dest: &Path, _: &Book, _: &File) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            copied = tokio::fs::copy(source, dest) => {
                copied.or_raise(|| ErrorKind::Io(source.to_path_buf()))?;
                Ok(())
            },
        }
    }
}
