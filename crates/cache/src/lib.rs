//! Fingerprint-validated download cache.
//!
//! Sits between "a book's current metadata" and "a file ready to send". A
//! cached artifact is valid exactly as long as the metadata it was generated
//! from is unchanged; nothing needs to signal an invalidation.
//!
//! # Architecture
//! - [`Fingerprint`]: canonical snapshot of every metadata field that ends up
//!   in an artifact, hashed with SHA-256.
//! - [`MetadataStore`]: one JSON sidecar per (file, format) recording that
//!   hash, timestamps and size, next to the artifact in a flat directory.
//! - [`CacheManager`]: compares hashes, serves hits, and drives a
//!   [`Generator`] on a miss.
//! - [`cleanup`]: best-effort LRU eviction back under 80% of the size limit,
//!   run in the background after each generation.
//! - [`download_filename`]: the human-readable name offered to clients.

pub mod cleanup;
pub mod error;
mod filename;
mod fingerprint;
mod format;
mod generator;
mod inflight;
mod manager;
mod metadata;

pub use crate::cleanup::CleanupStats;
pub use crate::filename::download_filename;
pub use crate::fingerprint::{
    Fingerprint, FingerprintAuthor, FingerprintChapter, FingerprintCover, FingerprintIdentifier, FingerprintNarrator,
    FingerprintSeries,
};
pub use crate::format::{CacheFormat, FormatId};
pub use crate::generator::{Generator, GeneratorRegistry, PassthroughGenerator, PluginGenerator, TargetFormat};
pub use crate::manager::{CacheManager, CacheStats, Download};
pub use crate::metadata::{CacheMetadata, MetadataStore};
