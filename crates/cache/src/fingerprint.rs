//! Canonical metadata snapshots.
//!
//! A [`Fingerprint`] captures every metadata field that influences the bytes
//! of a generated artifact. Its SHA-256 hash is the *only* validity signal the
//! cache uses: if the hash recorded beside an artifact differs from the hash of
//! the current metadata, the artifact is stale.
//!
//! Equal metadata must always serialize to byte-identical JSON, so every list
//! is sorted by an explicit key before serialization and nothing depends on the
//! order relations were loaded from the database.

use crate::error::{ErrorKind, Result};
use crate::format::CacheFormat;
use exn::ResultExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shelf_models::{Book, Chapter, ChapterPosition, File};
use std::cmp::Ordering;
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintAuthor {
    pub name: String,
    pub role: Option<String>,
    pub sort_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FingerprintNarrator {
    pub sort_order: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintSeries {
    pub name: String,
    pub number: Option<f64>,
    pub sort_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FingerprintIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FingerprintCover {
    pub path: String,
    pub mime_type: String,
    /// Filesystem modification time; the Unix epoch when the cover is unreadable.
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FingerprintChapter {
    pub title: String,
    pub sort_order: u32,
    pub start_page: Option<u32>,
    pub start_timestamp_ms: Option<u64>,
    pub href: Option<String>,
    pub children: Vec<FingerprintChapter>,
}
impl FingerprintChapter {
    fn from_chapter(chapter: &Chapter) -> Self {
        let (start_page, start_timestamp_ms, href) = match &chapter.position {
            Some(ChapterPosition::Page(page)) => (Some(*page), None, None),
            Some(ChapterPosition::Timestamp(ms)) => (None, Some(*ms), None),
            Some(ChapterPosition::Anchor(href)) => (None, None, Some(href.clone())),
            None => (None, None, None),
        };
        Self {
            title: chapter.title.clone(),
            sort_order: chapter.sort_order,
            start_page,
            start_timestamp_ms,
            href,
            children: sorted_chapters(&chapter.children),
        }
    }

    /// Sibling ordering: position first, then the (already canonical)
    /// children, so siblings that differ only below the top level still get
    /// a total order.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        (self.sort_order, self.start_page, self.start_timestamp_ms, &self.href, &self.title)
            .cmp(&(other.sort_order, other.start_page, other.start_timestamp_ms, &other.href, &other.title))
            .then_with(|| self.children.cmp(&other.children))
    }
}

fn sorted_chapters(chapters: &[Chapter]) -> Vec<FingerprintChapter> {
    let mut chapters: Vec<_> = chapters.iter().map(FingerprintChapter::from_chapter).collect();
    chapters.sort_by(FingerprintChapter::canonical_cmp);
    chapters
}

/// Snapshot of everything that affects a generated artifact.
///
/// Field order is the serialization order; do not reorder fields without
/// accepting that every cached artifact becomes stale.
#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<FingerprintAuthor>,
    pub narrators: Vec<FingerprintNarrator>,
    pub series: Vec<FingerprintSeries>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub identifiers: Vec<FingerprintIdentifier>,
    pub publisher: Option<String>,
    pub imprint: Option<String>,
    pub release_date: Option<String>,
    pub url: Option<String>,
    pub cover: Option<FingerprintCover>,
    pub cover_page: Option<u32>,
    pub chapters: Vec<FingerprintChapter>,
    pub format: CacheFormat,
    /// Edition name of the file
    pub name: Option<String>,
    /// Opaque value supplied by a plugin generator
    pub plugin_fingerprint: Option<String>,
}
impl Fingerprint {
    /// Snapshot `book` and `file` for `format`, reading the cover's current
    /// modification time from disk.
    ///
    /// Never fails: an unreadable cover contributes the Unix epoch as its
    /// modification time rather than aborting the whole computation.
    #[instrument(skip_all, fields(file_id = file.id, format = %format))]
    pub async fn compute(book: &Book, file: &File, format: CacheFormat, plugin_fingerprint: Option<String>) -> Self {
        let cover_modified = match &file.cover {
            Some(cover) => modified_or_epoch(&cover.path).await,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        Self::from_parts(book, file, format, plugin_fingerprint, cover_modified)
    }

    /// Pure construction with an explicitly supplied cover modification time.
    pub fn from_parts(
        book: &Book,
        file: &File,
        format: CacheFormat,
        plugin_fingerprint: Option<String>,
        cover_modified: OffsetDateTime,
    ) -> Self {
        let mut authors: Vec<_> = book
            .authors
            .iter()
            .map(|a| FingerprintAuthor { name: a.name.clone(), role: a.role.clone(), sort_order: a.sort_order })
            .collect();
        authors.sort_by(|a, b| {
            a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)).then_with(|| a.role.cmp(&b.role))
        });

        let mut narrators: Vec<_> = file
            .narrators
            .iter()
            .map(|n| FingerprintNarrator { sort_order: n.sort_order, name: n.name.clone() })
            .collect();
        narrators.sort();

        let mut series: Vec<_> = book
            .series
            .iter()
            .map(|s| FingerprintSeries {
                name: s.name.clone(),
                // serde_json writes NaN as null, which would collide with `None`.
                number: s.number.filter(|n| n.is_finite()),
                sort_order: s.sort_order,
            })
            .collect();
        series.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| cmp_number(a.number, b.number))
        });

        let mut genres = book.genres.clone();
        genres.sort();
        let mut tags = book.tags.clone();
        tags.sort();

        let mut identifiers: Vec<_> = file
            .identifiers
            .iter()
            .map(|i| FingerprintIdentifier { kind: i.kind.clone(), value: i.value.clone() })
            .collect();
        identifiers.sort();

        Self {
            title: book.title.clone(),
            subtitle: book.subtitle.clone(),
            description: book.description.clone(),
            authors,
            narrators,
            series,
            genres,
            tags,
            identifiers,
            publisher: file.publisher.clone(),
            imprint: file.imprint.clone(),
            release_date: file.release_date.map(|d| d.to_string()),
            url: file.url.clone(),
            cover: file.cover.as_ref().map(|cover| FingerprintCover {
                path: cover.path.to_string_lossy().into_owned(),
                mime_type: cover.mime_type.clone(),
                modified: cover_modified,
            }),
            // Only page-image sources take their cover from a page.
            cover_page: file.cover_page.filter(|_| file.file_type.is_paged()),
            chapters: sorted_chapters(&file.chapters),
            format,
            name: file.name.clone(),
            plugin_fingerprint,
        }
    }

    /// Canonical JSON serialization.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).or_raise(|| ErrorKind::Serialization)
    }

    /// Lower-case hex SHA-256 of the canonical JSON (64 characters).
    pub fn hash(&self) -> Result<String> {
        Ok(format!("{:x}", Sha256::digest(self.to_canonical_json()?)))
    }
}
impl PartialEq for Fingerprint {
    /// Fingerprints are equal iff their hashes are. A fingerprint that cannot
    /// be hashed equals nothing.
    ///
    /// `Option<Fingerprint>` inherits the expected semantics: two `None`s are
    /// equal and `None` never equals `Some`.
    fn eq(&self, other: &Self) -> bool {
        match (self.hash(), other.hash()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Total order over optional series numbers (`None` first, then IEEE total order).
fn cmp_number(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

async fn modified_or_epoch(path: &Path) -> OffsetDateTime {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified.into(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "cover unreadable, fingerprinting without mtime");
            OffsetDateTime::UNIX_EPOCH
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shelf_models::{Author, BookSeries, Cover, FileType, Identifier, Narrator};
    use time::{Date, Month};

    fn epoch() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    fn sample() -> (Book, File) {
        let mut book = Book::new(1, "The Way of Kings");
        book.subtitle = Some("Book One".to_string());
        book.authors = vec![Author::new("Brandon Sanderson", 0), Author::new("Isaac Stewart", 1).with_role("illustrator")];
        book.series = vec![BookSeries::new("The Stormlight Archive", 1.0, 0), BookSeries::new("Cosmere", None, 1)];
        book.genres = vec!["Fantasy".to_string(), "Epic".to_string()];
        book.tags = vec!["favourite".to_string(), "doorstopper".to_string()];

        let mut file = File::new(10, 1, FileType::M4b, "/library/kings.m4b");
        file.narrators = vec![Narrator::new("Michael Kramer", 0), Narrator::new("Kate Reading", 1)];
        file.identifiers = vec![Identifier::new("isbn_13", "9780765326355"), Identifier::new("asin", "B003P2WO5E")];
        file.publisher = Some("Tor".to_string());
        file.release_date = Some(Date::from_calendar_date(2010, Month::August, 31).unwrap());
        file.chapters = vec![
            Chapter::new("Prelude", 0).at(ChapterPosition::Timestamp(0)),
            Chapter::new("Part One", 1).at(ChapterPosition::Timestamp(60_000)).with_children([
                Chapter::new("Chapter 1", 0).at(ChapterPosition::Timestamp(61_000)),
                Chapter::new("Chapter 2", 1).at(ChapterPosition::Timestamp(900_000)),
            ]),
        ];
        (book, file)
    }

    fn hash(book: &Book, file: &File) -> String {
        Fingerprint::from_parts(book, file, CacheFormat::Original, None, epoch()).hash().unwrap()
    }

    #[test]
    fn test_hash_is_64_hex_chars() {
        let (book, file) = sample();
        let hash = hash(&book, &file);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_is_stable_across_calls() {
        let (book, file) = sample();
        assert_eq!(hash(&book, &file), hash(&book, &file));
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let (book, file) = sample();
        let (mut shuffled_book, mut shuffled_file) = sample();
        shuffled_book.authors.reverse();
        shuffled_book.series.reverse();
        shuffled_book.genres.reverse();
        shuffled_book.tags.reverse();
        shuffled_file.narrators.reverse();
        shuffled_file.identifiers.reverse();
        shuffled_file.chapters.reverse();
        shuffled_file.chapters[0].children.reverse();
        assert_eq!(hash(&book, &file), hash(&shuffled_book, &shuffled_file));
        let a = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch());
        let b = Fingerprint::from_parts(&shuffled_book, &shuffled_file, CacheFormat::Original, None, epoch());
        assert_eq!(a.to_canonical_json().unwrap(), b.to_canonical_json().unwrap());
    }

    #[test]
    fn test_siblings_differing_only_in_children_are_ordered() {
        let part = |child: &str| Chapter::new("Part", 0).with_children([Chapter::new(child, 0)]);
        let book = Book::new(1, "Anthology");
        let mut forward = File::new(1, 1, FileType::Epub, "/library/anthology.epub");
        forward.chapters = vec![part("A"), part("B")];
        let mut backward = forward.clone();
        backward.chapters.reverse();
        assert_eq!(hash(&book, &forward), hash(&book, &backward));

        let fingerprint = Fingerprint::from_parts(&book, &backward, CacheFormat::Original, None, epoch());
        assert_eq!(fingerprint.chapters[0].children[0].title, "A");
    }

    #[test]
    fn test_non_finite_series_number_is_absent() {
        let (mut book, file) = sample();
        book.series[0].number = None;
        let absent = hash(&book, &file);
        book.series[0].number = Some(f64::NAN);
        assert_eq!(hash(&book, &file), absent);
        book.series[0].number = Some(f64::INFINITY);
        assert_eq!(hash(&book, &file), absent);
    }

    #[rstest]
    #[case(FileType::Cbz, true)]
    #[case(FileType::Pdf, true)]
    #[case(FileType::Epub, false)]
    #[case(FileType::M4b, false)]
    fn test_cover_page_only_counts_for_paged_sources(#[case] file_type: FileType, #[case] counts: bool) {
        let book = Book::new(1, "Comic");
        let mut file = File::new(1, 1, file_type, "/library/source");
        let without = hash(&book, &file);
        file.cover_page = Some(2);
        assert_eq!(hash(&book, &file) != without, counts);
    }

    #[test]
    fn test_lists_are_sorted_in_json() {
        let (book, file) = sample();
        let fingerprint = Fingerprint::from_parts(&book, &file, CacheFormat::Kepub, None, epoch());
        assert_eq!(fingerprint.genres, vec!["Epic", "Fantasy"]);
        assert_eq!(fingerprint.tags, vec!["doorstopper", "favourite"]);
        assert_eq!(fingerprint.identifiers[0].kind, "asin");
        assert_eq!(fingerprint.narrators[0].name, "Michael Kramer");
        let json = String::from_utf8(fingerprint.to_canonical_json().unwrap()).unwrap();
        assert!(json.contains(r#""format":"kepub""#));
        assert!(json.contains(r#""type":"asin""#));
    }

    #[test]
    fn test_sensitive_to_fingerprinted_fields() {
        let (book, file) = sample();
        let base = hash(&book, &file);

        let mut changed = book.clone();
        changed.title.push('!');
        assert_ne!(base, hash(&changed, &file), "title");

        let mut changed = book.clone();
        changed.authors[0].name = "B. Sanderson".to_string();
        assert_ne!(base, hash(&changed, &file), "author name");

        let mut changed = book.clone();
        changed.authors[0].sort_order = 2;
        assert_ne!(base, hash(&changed, &file), "author sort order");

        let mut changed = book.clone();
        changed.series[0].number = Some(2.0);
        assert_ne!(base, hash(&changed, &file), "series number");

        let mut changed = file.clone();
        changed.chapters[1].children[0].title = "Chapter One".to_string();
        assert_ne!(base, hash(&book, &changed), "nested chapter title");

        let mut changed = file.clone();
        changed.name = Some("Unabridged".to_string());
        assert_ne!(base, hash(&book, &changed), "edition name");
    }

    #[test]
    fn test_insensitive_to_unfingerprinted_fields() {
        let (book, file) = sample();
        let base = hash(&book, &file);

        let mut changed = book.clone();
        changed.id = 999;
        assert_eq!(base, hash(&changed, &file), "book id");

        let mut changed = file.clone();
        changed.path = "/elsewhere/kings.m4b".into();
        changed.book_id = 999;
        assert_eq!(base, hash(&book, &changed), "source location");
    }

    #[test]
    fn test_sensitive_to_cover_mtime() {
        let (book, mut file) = sample();
        file.cover = Some(Cover::new("/library/kings.jpg", "image/jpeg"));
        let a = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch());
        let b = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch() + time::Duration::seconds(1));
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_sensitive_to_format_and_plugin_fingerprint() {
        let (book, file) = sample();
        let original = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch());
        let kepub = Fingerprint::from_parts(&book, &file, CacheFormat::Kepub, None, epoch());
        assert_ne!(original, kepub);

        let mobi = CacheFormat::plugin("mobi").unwrap();
        let v1 = Fingerprint::from_parts(&book, &file, mobi.clone(), Some("v1".to_string()), epoch());
        let v2 = Fingerprint::from_parts(&book, &file, mobi, Some("v2".to_string()), epoch());
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_absent_relations_degrade_gracefully() {
        let book = Book::new(1, "Bare");
        let file = File::new(2, 1, FileType::Pdf, "/library/bare.pdf");
        let fingerprint = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch());
        assert!(fingerprint.authors.is_empty());
        assert!(fingerprint.series.is_empty());
        assert!(fingerprint.cover.is_none());
        assert!(fingerprint.hash().is_ok());
    }

    #[test]
    fn test_option_equality_semantics() {
        let (book, file) = sample();
        let a = Fingerprint::from_parts(&book, &file, CacheFormat::Original, None, epoch());
        let b = a.clone();
        assert_eq!(None::<Fingerprint>, None::<Fingerprint>);
        assert_ne!(Some(a.clone()), None);
        assert_eq!(Some(a), Some(b));
    }

    #[tokio::test]
    async fn test_compute_reads_cover_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, b"jpeg").unwrap();
        filetime::set_file_mtime(&cover, filetime::FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

        let (book, mut file) = sample();
        file.cover = Some(Cover::new(&cover, "image/jpeg"));
        let fingerprint = Fingerprint::compute(&book, &file, CacheFormat::Original, None).await;
        let modified = fingerprint.cover.as_ref().unwrap().modified;
        assert_eq!(modified.unix_timestamp(), 1_700_000_000);

        filetime::set_file_mtime(&cover, filetime::FileTime::from_unix_time(1_700_000_060, 0)).unwrap();
        let touched = Fingerprint::compute(&book, &file, CacheFormat::Original, None).await;
        assert_ne!(fingerprint, touched);
    }

    #[tokio::test]
    async fn test_compute_with_missing_cover() {
        let (book, mut file) = sample();
        file.cover = Some(Cover::new("/definitely/not/here.jpg", "image/jpeg"));
        let fingerprint = Fingerprint::compute(&book, &file, CacheFormat::Original, None).await;
        assert_eq!(fingerprint.cover.as_ref().unwrap().modified, OffsetDateTime::UNIX_EPOCH);
        // Still stable.
        let again = Fingerprint::compute(&book, &file, CacheFormat::Original, None).await;
        assert_eq!(fingerprint.hash().unwrap(), again.hash().unwrap());
    }
}
