//! Download filenames derived from current metadata.
//!
//! The generic layout is:
//!
//! ```text
//! [Author] Series #Number - Title {Narrator}.ext
//! ```
//!
//! with every segment omitted when its source data is absent. Three variants
//! share the derivation but differ in escaping:
//!
//! - **original**: strips only characters the common filesystems reserve.
//! - **kepub**: Kobo firmware chokes on brackets and most punctuation, so
//!   segments are joined with ` - ` and only alphanumerics, spaces and
//!   `- _ . , ( ) '` survive.
//! - **plugin**: the generic layout, with the plugin's format identifier as
//!   the extension.
//!
//! A volume marker already present in the title (`v1`, `vol. 2`, `Vol 10`,
//! `V3`) replaces the series segment and is rewritten as `v001` so that
//! volumes sort lexicographically.

use crate::format::CacheFormat;
use regex::Regex;
use shelf_models::{Book, File};
use std::sync::LazyLock;

/// Longest filename we hand out, in bytes (extension included). Leaves
/// headroom below the usual 255-byte limit for browser/OS suffixes like ` (1)`.
const MAX_FILENAME_BYTES: usize = 240;
const FALLBACK_STEM: &str = "download";
const KEPUB_EXTENSION: &str = "kepub.epub";

static VOLUME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    // Infallible: the pattern is a compile-time constant.
    Regex::new(r"(?i)\b(?:volume|vol\.?|v)\s*(\d+)\s*$").unwrap()
});

/// Filename for the given format, ready for a `Content-Disposition` header.
pub fn download_filename(book: &Book, file: &File, format: &CacheFormat) -> String {
    let parts = Parts::new(book, file);
    match format {
        CacheFormat::Original => finish(parts.generic(), file.file_type.extension()),
        CacheFormat::Kepub => finish(parts.kepub(), KEPUB_EXTENSION),
        CacheFormat::Plugin(id) => finish(parts.generic(), id.as_str()),
    }
}

/// The semantic pieces of a filename, before any escaping.
struct Parts<'a> {
    author: Option<&'a str>,
    /// Series name and formatted number; `None` when the title carries a volume.
    series: Option<(&'a str, Option<String>)>,
    title: String,
    narrator: Option<&'a str>,
}
impl<'a> Parts<'a> {
    fn new(book: &'a Book, file: &'a File) -> Self {
        let (title, has_volume) = normalize_volume(file.display_title(book));
        let series = match has_volume {
            true => None,
            false => book.primary_series().map(|s| (s.name.as_str(), s.number.filter(|n| n.is_finite()).map(|n| format!("{n}")))),
        };
        Self {
            author: book.primary_author().map(|a| a.name.as_str()),
            series,
            title,
            narrator: file.primary_narrator().map(|n| n.name.as_str()),
        }
    }

    fn generic(&self) -> String {
        let clean = |s: &str| collapse_whitespace(&strip_reserved(s));
        let mut name = String::new();
        if let Some(author) = self.author.map(clean).filter(|a| !a.is_empty()) {
            name.push_str(&format!("[{author}] "));
        }
        if let Some((series, number)) = &self.series {
            let series = clean(series);
            if !series.is_empty() {
                name.push_str(&series);
                if let Some(number) = number {
                    name.push_str(&format!(" #{number}"));
                }
                name.push_str(" - ");
            }
        }
        name.push_str(&clean(&self.title));
        if let Some(narrator) = self.narrator.map(clean).filter(|n| !n.is_empty()) {
            name.push_str(&format!(" {{{narrator}}}"));
        }
        name
    }

    fn kepub(&self) -> String {
        let clean = |s: &str| collapse_whitespace(&keep_device_safe(s));
        let mut segments = Vec::with_capacity(4);
        if let Some(author) = self.author {
            segments.push(clean(author));
        }
        if let Some((series, number)) = &self.series {
            segments.push(match number {
                Some(number) => clean(&format!("{series} {number}")),
                None => clean(series),
            });
        }
        segments.push(clean(&self.title));
        if let Some(narrator) = self.narrator {
            segments.push(clean(narrator));
        }
        segments.retain(|s| !s.is_empty());
        segments.join(" - ")
    }
}

/// Rewrite a trailing volume marker as `v` + at least three digits.
///
/// Returns the (possibly rewritten) title and whether a marker was found.
fn normalize_volume(title: &str) -> (String, bool) {
    let Some(captures) = VOLUME_MARKER.captures(title) else {
        return (title.to_string(), false);
    };
    let (Some(marker), Some(digits)) = (captures.get(0), captures.get(1)) else {
        return (title.to_string(), false);
    };
    let digits = match digits.as_str().trim_start_matches('0') {
        "" => "0",
        d => d,
    };
    (format!("{}v{digits:0>3}", &title[..marker.start()]), true)
}

/// Remove characters reserved by Windows/macOS/Linux filesystems.
fn strip_reserved(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect()
}

/// Keep only characters e-reader firmware handles reliably.
fn keep_device_safe(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ',' | '(' | ')' | '\''))
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim, truncate to [`MAX_FILENAME_BYTES`] and append the extension.
fn finish(stem: String, extension: &str) -> String {
    let extension = extension.trim().trim_matches('.');
    let budget = MAX_FILENAME_BYTES.saturating_sub(extension.len() + 1);
    let stem = stem.trim();
    // Cutting at a character boundary keeps the name valid UTF-8.
    let stem = stem[..stem.floor_char_boundary(budget)].trim_end_matches(['.', ' ']);
    let stem = match stem.is_empty() {
        true => FALLBACK_STEM,
        false => stem,
    };
    format!("{stem}.{extension}")
}
