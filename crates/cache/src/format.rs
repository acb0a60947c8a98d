//! Output format discriminator and the cache directory naming scheme.
//!
//! | Format        | Artifact                    | Sidecar                               |
//! |---------------|-----------------------------|---------------------------------------|
//! | `original`    | `<id>.<ext>`                | `<id>.meta.json`                      |
//! | `kepub`       | `<id>.kepub.epub`           | `<id>.kepub.meta.json`                |
//! | `plugin:<fmt>`| `<id>.plugin.<fmt>`         | `<id>.plugin.<fmt>.meta.json`         |

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shelf_models::{FileId, FileType};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

pub(crate) const SIDECAR_SUFFIX: &str = ".meta.json";
const PLUGIN_PREFIX: &str = "plugin:";

/// Identifier declared by a plugin generator for its output format.
///
/// Restricted to ASCII alphanumerics plus `-`, `_` and `.` so it can be
/// embedded in cache file names without escaping the cache directory, and
/// never ends in the sidecar suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(String);
impl FormatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl FromStr for FormatId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s != "."
            && s != ".."
            && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            // `<id>.plugin.mobi.meta.json` would be both an artifact and a sidecar.
            && !s.to_ascii_lowercase().ends_with(SIDECAR_SUFFIX);
        if !valid {
            exn::bail!(ErrorKind::InvalidFormat(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}
impl Display for FormatId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Which variant of a file the cache holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheFormat {
    /// The source format with current metadata embedded.
    Original,
    /// Kobo-optimized EPUB.
    Kepub,
    /// Output of a plugin generator.
    Plugin(FormatId),
}
impl CacheFormat {
    /// Convenience constructor validating a plugin format identifier.
    pub fn plugin(id: impl AsRef<str>) -> Result<Self> {
        Ok(Self::Plugin(id.as_ref().parse()?))
    }

    /// Everything between the file ID and `.meta.json` in the sidecar name.
    fn infix(&self) -> String {
        match self {
            Self::Original => String::new(),
            Self::Kepub => ".kepub".to_string(),
            Self::Plugin(id) => format!(".plugin.{id}"),
        }
    }

    pub fn sidecar_name(&self, file_id: FileId) -> String {
        format!("{file_id}{}{SIDECAR_SUFFIX}", self.infix())
    }

    pub fn artifact_name(&self, file_id: FileId, source: FileType) -> String {
        match self {
            Self::Original => format!("{file_id}.{}", source.extension()),
            Self::Kepub => format!("{file_id}.kepub.epub"),
            Self::Plugin(id) => format!("{file_id}.plugin.{id}"),
        }
    }

    /// Every artifact name this format could have produced for `file_id`.
    ///
    /// Only [`Original`](Self::Original) depends on the source type, so it
    /// yields one candidate per known [`FileType`].
    pub(crate) fn artifact_candidates(&self, file_id: FileId) -> Vec<String> {
        match self {
            Self::Original => [FileType::Epub, FileType::Cbz, FileType::M4b, FileType::Pdf]
                .into_iter()
                .map(|t| self.artifact_name(file_id, t))
                .collect(),
            _ => vec![self.artifact_name(file_id, FileType::Epub)],
        }
    }
}
impl Display for CacheFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Original => f.write_str("original"),
            Self::Kepub => f.write_str("kepub"),
            Self::Plugin(id) => write!(f, "{PLUGIN_PREFIX}{id}"),
        }
    }
}
impl FromStr for CacheFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(Self::Original),
            "kepub" => Ok(Self::Kepub),
            _ => match s.strip_prefix(PLUGIN_PREFIX) {
                Some(id) => Self::plugin(id),
                None => exn::bail!(ErrorKind::InvalidFormat(s.to_string())),
            },
        }
    }
}
impl Serialize for CacheFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
impl<'de> Deserialize<'de> for CacheFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: Error| serde::de::Error::custom(&*e))
    }
}
