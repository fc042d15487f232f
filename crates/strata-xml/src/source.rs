//! Source positions for parsed XML.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Where a node came from: file, 1-based line and column, and byte span.
///
/// Nodes built in memory (for serialization) carry [`Provenance::default`],
/// which has an empty file name and line 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Provenance {
    /// File name the node was read from.
    pub file: Arc<str>,
    /// 1-based line number (0 when unknown).
    pub line: usize,
    /// 1-based column, in characters (0 when unknown).
    pub column: usize,
    /// Byte range of the node in the document text.
    pub span: Range<usize>,
}

impl Provenance {
    /// Build provenance for a span of `file`, resolving the line through `index`.
    pub fn new(file: Arc<str>, index: &LineIndex, text: &str, span: Range<usize>) -> Self {
        let (line, column) = index.line_column(text, span.start);
        Self {
            file,
            line,
            column,
            span,
        }
    }

    /// Whether this provenance points into a real file.
    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}({})", self.file, self.line)
        } else {
            write!(f, "{}", self.file)
        }
    }
}

/// Line break index for offset → line lookups.
///
/// Scans the content once; lookups are a binary search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    /// Byte offsets of each `\n` in the file
    line_breaks: Vec<usize>,
    total_length: usize,
}

impl LineIndex {
    pub fn new(content: &str) -> Self {
        let line_breaks = content
            .char_indices()
            .filter_map(|(idx, ch)| if ch == '\n' { Some(idx) } else { None })
            .collect();

        LineIndex {
            line_breaks,
            total_length: content.len(),
        }
    }

    /// 0-based row containing `offset`. Offsets past the end clamp to the last row.
    pub fn row(&self, offset: usize) -> usize {
        let offset = offset.min(self.total_length);
        // A newline belongs to the line it terminates
        match self.line_breaks.binary_search(&offset) {
            Ok(idx) | Err(idx) => idx,
        }
    }

    /// Byte offset at which the 0-based `row` starts.
    pub fn row_start(&self, row: usize) -> usize {
        if row == 0 {
            0
        } else {
            self.line_breaks
                .get(row - 1)
                .map_or(self.total_length, |b| b + 1)
        }
    }

    /// 1-based (line, column) for `offset`; the column counts characters.
    pub fn line_column(&self, text: &str, offset: usize) -> (usize, usize) {
        let row = self.row(offset);
        let start = self.row_start(row);
        let end = offset.min(text.len()).max(start);
        let column = text
            .get(start..end)
            .map_or(end - start, |s| s.chars().count());
        (row + 1, column + 1)
    }

    /// Number of lines in the file.
    pub fn line_count(&self) -> usize {
        self.line_breaks.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content() {
        let index = LineIndex::new("");
        assert_eq!(index.line_count(), 1);
        assert_eq!(index.line_column("", 0), (1, 1));
    }

    #[test]
    fn test_multi_line_lookup() {
        let text = "hello\nworld\n!";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 3);
        assert_eq!(index.line_column(text, 0), (1, 1));
        assert_eq!(index.line_column(text, 5), (1, 6));
        assert_eq!(index.line_column(text, 6), (2, 1));
        assert_eq!(index.line_column(text, 12), (3, 1));
    }

    #[test]
    fn test_columns_count_characters() {
        let text = "é<a/>";
        let index = LineIndex::new(text);
        // 'é' is two bytes
        assert_eq!(index.line_column(text, 2), (1, 2));
    }

    #[test]
    fn test_provenance_display() {
        let text = "a\nb";
        let index = LineIndex::new(text);
        let p = Provenance::new("web.config".into(), &index, text, 2..3);
        assert_eq!(p.to_string(), "web.config(2)");
        assert!(!Provenance::default().is_known());
    }
}
