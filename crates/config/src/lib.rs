//! Layered configuration for shelf.
//!
//! Sources are merged lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. An optional configuration file (TOML, YAML or JSON, chosen by extension)
//! 3. Environment variables prefixed with `SHELF_`, nested with `__`
//!    (e.g. `SHELF_CACHE__MAX_SIZE_BYTES=1073741824`)

mod cache;
pub mod error;

pub use crate::cache::{CacheConfig, DEFAULT_MAX_SIZE_BYTES};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::instrument;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "SHELF_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
}
impl Config {
    /// Load and validate the configuration.
    ///
    /// When `path` is given the file must exist; its format is chosen from
    /// the extension.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()
    }

    /// Build the merged [`Figment`] without extracting it.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn validate(self) -> Result<Self> {
        if !self.cache.dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "cache.dir must be an absolute path, got `{}`",
                self.cache.dir.display()
            )));
        }
        if self.cache.max_size_bytes == 0 {
            tracing::warn!("cache.max_size_bytes is 0, download cache eviction is disabled");
        }
        Ok(self)
    }
}
