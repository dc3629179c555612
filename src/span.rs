// ABOUTME: Source spans and line/column resolution shared by every pipeline stage

use std::fmt;
use std::rc::Rc;

/// A contiguous region of source text: file identifier, 1-based lines,
/// 0-based columns. Every AST node, IR node, and error carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: Rc<str>,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(file: &str, start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Span {
            file: Rc::from(file),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A zero-width span at a single position.
    pub fn point(file: &str, line: u32, col: u32) -> Self {
        Span::new(file, line, col, line, col)
    }

    /// The smallest span covering both `self` and `other`.
    /// Both spans must come from the same file.
    pub fn merge(&self, other: &Span) -> Span {
        let (start_line, start_col) =
            if (self.start_line, self.start_col) <= (other.start_line, other.start_col) {
                (self.start_line, self.start_col)
            } else {
                (other.start_line, other.start_col)
            };
        let (end_line, end_col) =
            if (self.end_line, self.end_col) >= (other.end_line, other.end_col) {
                (self.end_line, self.end_col)
            } else {
                (other.end_line, other.end_col)
            };
        Span {
            file: self.file.clone(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Ordering invariant from the data model: start never follows end.
    pub fn is_well_formed(&self) -> bool {
        self.start_line < self.end_line
            || (self.start_line == self.end_line && self.start_col <= self.end_col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Columns are stored 0-based but displayed 1-based, matching editors.
        write!(f, "{}:{}:{}", self.file, self.start_line, self.start_col + 1)
    }
}

/// Precomputed line-start offsets for translating byte offsets into
/// line/column positions.
#[derive(Debug)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        LineIndex { line_starts }
    }

    /// Translate a byte offset into (1-based line, 0-based column).
    /// Columns count characters, not bytes.
    pub fn line_col(&self, text: &str, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let col = text[start..offset].chars().count();
        (line as u32 + 1, col as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col_resolution() {
        let text = "abc\ndef\nghi";
        let index = LineIndex::new(text);

        assert_eq!(index.line_col(text, 0), (1, 0));
        assert_eq!(index.line_col(text, 2), (1, 2));
        assert_eq!(index.line_col(text, 4), (2, 0));
        assert_eq!(index.line_col(text, 6), (2, 2));
        assert_eq!(index.line_col(text, 8), (3, 0));
    }

    #[test]
    fn test_line_col_multibyte() {
        let text = "aé\nb";
        let index = LineIndex::new(text);

        // 'é' is two bytes but one column
        let offset = text.find('\n').unwrap();
        assert_eq!(index.line_col(text, offset), (1, 2));
    }

    #[test]
    fn test_merge_spans() {
        let a = Span::new("f.hql", 1, 4, 1, 8);
        let b = Span::new("f.hql", 2, 0, 2, 3);
        let merged = a.merge(&b);
        assert_eq!(merged.start_line, 1);
        assert_eq!(merged.start_col, 4);
        assert_eq!(merged.end_line, 2);
        assert_eq!(merged.end_col, 3);
    }

    #[test]
    fn test_well_formed() {
        assert!(Span::new("f", 1, 0, 1, 0).is_well_formed());
        assert!(Span::new("f", 1, 5, 2, 0).is_well_formed());
        assert!(!Span::new("f", 1, 5, 1, 2).is_well_formed());
    }

    #[test]
    fn test_display_is_one_based() {
        let span = Span::new("demo.hql", 3, 0, 3, 4);
        assert_eq!(format!("{}", span), "demo.hql:3:1");
    }
}
