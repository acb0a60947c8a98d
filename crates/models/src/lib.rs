//! Library metadata as seen by the download cache.
//!
//! These are plain data types; loading them from the catalog database is the
//! job of the entity services and is not part of this workspace. Everything
//! the cache fingerprints or puts into a download filename lives here.

mod book;
mod chapter;
pub mod error;
mod file;
mod file_type;

pub use crate::book::{Author, Book, BookSeries};
pub use crate::chapter::{Chapter, ChapterPosition};
pub use crate::file::{Cover, File, Identifier, Narrator};
pub use crate::file_type::FileType;

/// Identity of a file record in the catalog.
pub type FileId = u64;
/// Identity of a book record in the catalog.
pub type BookId = u64;
