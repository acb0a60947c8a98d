use crate::{BookId, Chapter, FileId, FileType};
use std::path::{Path, PathBuf};
use time::Date;

/// A person credited as narrator on an audiobook file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Narrator {
    pub name: String,
    /// Explicit position in the credits (lowest first)
    pub sort_order: u32,
}
impl Narrator {
    pub fn new(name: impl Into<String>, sort_order: u32) -> Self {
        Self { name: name.into(), sort_order }
    }
}

/// An external identifier attached to a file (ISBN, ASIN, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// Identifier scheme, e.g. `isbn_13`, `asin`, `goodreads`
    pub kind: String,
    pub value: String,
}
impl Identifier {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }
}

/// Cover image stored alongside a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cover {
    /// Location of the image on disk
    pub path: PathBuf,
    pub mime_type: String,
}
impl Cover {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self { path: path.into(), mime_type: mime_type.into() }
    }
}

/// A single cataloged file belonging to a [`Book`](crate::Book).
///
/// Publication details live on the file rather than the book because
/// different editions (an EPUB and an audiobook) carry different publishers,
/// identifiers and release dates.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub id: FileId,
    pub book_id: BookId,
    pub file_type: FileType,
    /// Location of the source file on disk
    pub path: PathBuf,
    /// Edition-specific name; overrides the book title where present
    pub name: Option<String>,
    pub narrators: Vec<Narrator>,
    pub identifiers: Vec<Identifier>,
    pub publisher: Option<String>,
    pub imprint: Option<String>,
    pub release_date: Option<Date>,
    pub url: Option<String>,
    pub cover: Option<Cover>,
    /// 0-indexed page used as the cover for page-image sources
    pub cover_page: Option<u32>,
    pub chapters: Vec<Chapter>,
}
impl File {
    pub fn new(id: FileId, book_id: BookId, file_type: FileType, path: impl AsRef<Path>) -> Self {
        Self {
            id,
            book_id,
            file_type,
            path: path.as_ref().to_path_buf(),
            name: None,
            narrators: vec![],
            identifiers: vec![],
            publisher: None,
            imprint: None,
            release_date: None,
            url: None,
            cover: None,
            cover_page: None,
            chapters: vec![],
        }
    }

    /// The narrator with the lowest explicit sort position.
    pub fn primary_narrator(&self) -> Option<&Narrator> {
        self.narrators.iter().min_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)))
    }

    /// The title to present for this file: the edition name when set,
    /// otherwise the owning book's title.
    pub fn display_title<'a>(&'a self, book: &'a crate::Book) -> &'a str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &book.title,
        }
    }
}
