/// Where a chapter starts within its source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChapterPosition {
    /// 0-indexed page (comics, PDFs)
    Page(u32),
    /// Offset from the start of the audio, in milliseconds
    Timestamp(u64),
    /// Document anchor (EPUB `href`)
    Anchor(String),
}

/// An entry in a file's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chapter {
    pub title: String,
    /// Explicit position amongst its siblings (lowest first)
    pub sort_order: u32,
    pub position: Option<ChapterPosition>,
    /// Nested chapters (parts, sub-sections)
    pub children: Vec<Chapter>,
}
impl Chapter {
    pub fn new(title: impl Into<String>, sort_order: u32) -> Self {
        Self { title: title.into(), sort_order, position: None, children: vec![] }
    }

    pub fn at(mut self, position: ChapterPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Chapter>) -> Self {
        self.children = children.into_iter().collect();
        self
    }
}
