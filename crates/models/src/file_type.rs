use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// Source file formats the library knows how to catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    /// EPUB e-book
    Epub,
    /// Comic book ZIP archive
    Cbz,
    /// MPEG-4 audiobook
    M4b,
    /// PDF document
    Pdf,
}
impl FileType {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Epub => "epub",
            FileType::Cbz => "cbz",
            FileType::M4b => "m4b",
            FileType::Pdf => "pdf",
        }
    }

    /// Whether the source is made of page images (cover is a page, not a separate image).
    pub fn is_paged(&self) -> bool {
        matches!(self, FileType::Cbz | FileType::Pdf)
    }
}
impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "epub" => Self::Epub,
            "cbz" => Self::Cbz,
            "m4b" => Self::M4b,
            "pdf" => Self::Pdf,
            _ => exn::bail!(ErrorKind::ParseError {
                field: "file_type",
                value: s.to_string(),
            }),
        })
    }
}
impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("epub", FileType::Epub)]
    #[case("EPUB", FileType::Epub)]
    #[case(".cbz", FileType::Cbz)]
    #[case(" m4b ", FileType::M4b)]
    #[case("Pdf", FileType::Pdf)]
    fn test_parse(#[case] input: &str, #[case] expected: FileType) {
        assert_eq!(input.parse::<FileType>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "mobi".parse::<FileType>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::ParseError { field: "file_type", .. }));
    }

    #[test]
    fn test_extension_round_trips_through_display() {
        for file_type in [FileType::Epub, FileType::Cbz, FileType::M4b, FileType::Pdf] {
            assert_eq!(file_type.to_string().parse::<FileType>().unwrap(), file_type);
        }
    }
}
