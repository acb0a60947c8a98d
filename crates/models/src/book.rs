use crate::BookId;

/// A person credited on a book, with their position in the credits.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    /// Display name of the person
    pub name: String,
    /// Contribution role (e.g. "writer", "penciller"); `None` for a plain author
    pub role: Option<String>,
    /// Explicit position in the credits (lowest first)
    pub sort_order: u32,
}
impl Author {
    pub fn new(name: impl Into<String>, sort_order: u32) -> Self {
        Self { name: name.into(), role: None, sort_order }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// A book's membership in a series.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSeries {
    /// Series name
    pub name: String,
    /// Position within the series; may be fractional (novellas, "1.5")
    pub number: Option<f64>,
    /// Explicit position amongst the book's series (lowest first)
    pub sort_order: u32,
}
impl BookSeries {
    pub fn new(name: impl Into<String>, number: impl Into<Option<f64>>, sort_order: u32) -> Self {
        Self { name: name.into(), number: number.into(), sort_order }
    }
}

/// A cataloged book. One book may own several [`File`](crate::File)s
/// (e.g. an EPUB and an audiobook of the same title).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<Author>,
    pub series: Vec<BookSeries>,
    /// Genre names
    pub genres: Vec<String>,
    /// Tag names
    pub tags: Vec<String>,
}
impl Book {
    pub fn new(id: BookId, title: impl Into<String>) -> Self {
        Self { id, title: title.into(), ..Self::default() }
    }

    /// The author with the lowest explicit sort position.
    ///
    /// Ties are broken by name so the choice never depends on list order.
    pub fn primary_author(&self) -> Option<&Author> {
        self.authors.iter().min_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)))
    }

    /// The series membership with the lowest explicit sort position.
    pub fn primary_series(&self) -> Option<&BookSeries> {
        self.series.iter().min_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)))
    }
}
