//! Fragment scanner: splits a document into literal text and `<% … %>`
//! fragments.
//!
//! ```text
//! <% expr %>      interpolation
//! <%* stmts %>    execution
//! <%- … -%>       trim one newline outside the tag
//! <%_ … _%>       trim all whitespace outside the tag
//! ```
//!
//! Trim markers and `*` may follow the open tag in either order.  A close
//! tag inside a string literal does not end the fragment; a `//` comment
//! runs to the end of the line or to the close tag, whichever comes first.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

// ── Delimiters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            open: "<%".to_owned(),
            close: "%>".to_owned(),
        }
    }
}

// ── Blocks ────────────────────────────────────────────────────────────────────

/// Whitespace control on one side of a fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trim {
    #[default]
    None,
    /// `-`: remove one adjacent newline.
    Newline,
    /// `_`: remove all adjacent whitespace.
    All,
}

impl Trim {
    fn from_marker(c: u8) -> Option<Trim> {
        match c {
            b'-' => Some(Trim::Newline),
            b'_' => Some(Trim::All),
            _ => None,
        }
    }
}

/// One raw fragment extracted from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBlock {
    /// Sequence index within the document.
    pub id: usize,
    /// Full fragment text including delimiters.
    pub match_text: String,
    /// Inner source between markers.
    pub command: String,
    /// Byte offset of `command` in the document.
    pub command_start: usize,
    pub is_execution: bool,
    pub left_trim: Trim,
    pub right_trim: Trim,
    pub original_start: usize,
    pub original_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Block(TemplateBlock),
}

// ── Line index ────────────────────────────────────────────────────────────────

/// Byte offset → (line, column), both 1-based.  Columns count `char`s.
pub struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(src: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        LineIndex { src, starts }
    }

    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.src.len());
        let line = self.starts.partition_point(|&s| s <= offset).max(1);
        let start = self.starts[line - 1];
        let column = self
            .src
            .get(start..offset)
            .map_or(offset - start, |s| s.chars().count())
            + 1;
        (line, column)
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Split `src` into text and fragments, applying trim markers to the
/// adjacent text.
pub fn scan(src: &str, delims: &Delimiters) -> Result<Vec<Segment>, ParseError> {
    let lines = LineIndex::new(src);
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut next_id = 0;

    while let Some(rel) = src[pos..].find(delims.open.as_str()) {
        let start = pos + rel;
        if start > pos {
            segments.push(Segment::Text(src[pos..start].to_owned()));
        }
        let block = scan_fragment(src, start, next_id, delims).ok_or_else(|| {
            let (line, column) = lines.line_col(start);
            ParseError::new(line, column, format!("unterminated fragment: missing '{}'", delims.close))
        })?;
        next_id += 1;
        pos = block.original_end;
        segments.push(Segment::Block(block));
    }
    if pos < src.len() {
        segments.push(Segment::Text(src[pos..].to_owned()));
    }
    apply_trims(&mut segments);
    Ok(segments)
}

/// Only the fragments of a document.
pub fn extract_blocks(src: &str, delims: &Delimiters) -> Result<Vec<TemplateBlock>, ParseError> {
    Ok(scan(src, delims)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Block(b) => Some(b),
            Segment::Text(_) => None,
        })
        .collect())
}

fn scan_fragment(src: &str, start: usize, id: usize, delims: &Delimiters) -> Option<TemplateBlock> {
    let bytes = src.as_bytes();
    let mut i = start + delims.open.len();
    let mut is_execution = false;
    let mut left_trim = Trim::None;
    for _ in 0..2 {
        match bytes.get(i) {
            Some(b'*') if !is_execution => is_execution = true,
            Some(&c) if left_trim == Trim::None && Trim::from_marker(c).is_some() => {
                left_trim = Trim::from_marker(c).unwrap_or_default();
            }
            _ => break,
        }
        i += 1;
    }
    let command_start = i;
    let close = find_close(src, command_start, &delims.close)?;

    let (command_end, right_trim) = match close.checked_sub(1).map(|p| bytes[p]) {
        Some(c) if close > command_start => match Trim::from_marker(c) {
            Some(t) => (close - 1, t),
            None => (close, Trim::None),
        },
        _ => (close, Trim::None),
    };
    let original_end = close + delims.close.len();
    Some(TemplateBlock {
        id,
        match_text: src[start..original_end].to_owned(),
        command: src[command_start..command_end].to_owned(),
        command_start,
        is_execution,
        left_trim,
        right_trim,
        original_start: start,
        original_end,
    })
}

/// Offset of the close tag ending the fragment whose body starts at `from`.
fn find_close(src: &str, from: usize, close: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 2;
                    continue;
                }
                // Plain string literals cannot span lines.
                if c == q || (c == b'\n' && q != b'`') {
                    quote = None;
                }
            }
            None => {
                if src[i..].starts_with(close) {
                    return Some(i);
                }
                match c {
                    b'\'' | b'"' | b'`' => quote = Some(c),
                    b'/' if bytes.get(i + 1) == Some(&b'/') => {
                        while i < bytes.len() && bytes[i] != b'\n' && !src[i..].starts_with(close) {
                            i += 1;
                        }
                        continue;
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }
    None
}

fn apply_trims(segments: &mut Vec<Segment>) {
    for i in 0..segments.len() {
        let (left, right) = match &segments[i] {
            Segment::Block(b) => (b.left_trim, b.right_trim),
            Segment::Text(_) => continue,
        };
        if i > 0 {
            if let Segment::Text(t) = &mut segments[i - 1] {
                trim_end(t, left);
            }
        }
        if let Some(Segment::Text(t)) = segments.get_mut(i + 1) {
            trim_start(t, right);
        }
    }
    segments.retain(|s| !matches!(s, Segment::Text(t) if t.is_empty()));
}

fn trim_end(t: &mut String, trim: Trim) {
    match trim {
        Trim::None => {}
        Trim::Newline => {
            if t.ends_with("\r\n") {
                t.truncate(t.len() - 2);
            } else if t.ends_with('\n') {
                t.truncate(t.len() - 1);
            }
        }
        Trim::All => t.truncate(t.trim_end().len()),
    }
}

fn trim_start(t: &mut String, trim: Trim) {
    match trim {
        Trim::None => {}
        Trim::Newline => {
            if t.starts_with("\r\n") {
                t.drain(..2);
            } else if t.starts_with('\n') {
                t.drain(..1);
            }
        }
        Trim::All => {
            let cut = t.len() - t.trim_start().len();
            t.drain(..cut);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(src: &str) -> Vec<TemplateBlock> {
        extract_blocks(src, &Delimiters::default()).unwrap()
    }

    fn texts(src: &str) -> Vec<String> {
        scan(src, &Delimiters::default())
            .unwrap()
            .into_iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t),
                Segment::Block(_) => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_is_one_segment() {
        let segs = scan("no fragments here", &Delimiters::default()).unwrap();
        assert_eq!(segs, vec![Segment::Text("no fragments here".into())]);
    }

    #[test]
    fn interpolation_and_execution() {
        let b = blocks("a <% x %> b <%* let y = 1 %>");
        assert_eq!(b.len(), 2);
        assert!(!b[0].is_execution);
        assert_eq!(b[0].command, " x ");
        assert_eq!(b[0].match_text, "<% x %>");
        assert_eq!((b[0].original_start, b[0].original_end), (2, 9));
        assert_eq!(b[0].command_start, 4);
        assert!(b[1].is_execution);
        assert_eq!(b[1].command, " let y = 1 ");
        assert_eq!(b[1].id, 1);
    }

    #[test]
    fn markers_in_either_order() {
        let b = blocks("<%*- a -%><%-* b _%>");
        assert!(b[0].is_execution && b[1].is_execution);
        assert_eq!(b[0].left_trim, Trim::Newline);
        assert_eq!(b[0].right_trim, Trim::Newline);
        assert_eq!(b[1].command, " b ");
        assert_eq!(b[1].right_trim, Trim::All);
    }

    #[test]
    fn trims_adjacent_text() {
        assert_eq!(texts("a\n\n<%- x -%>\n\nb"), vec!["a\n", "\nb"]);
        assert_eq!(texts("a  \n<%_ x _%>\n  b"), vec!["a", "b"]);
    }

    #[test]
    fn close_tag_in_string_is_ignored() {
        let b = blocks("<% '%>' + \"%>\" %>tail");
        assert_eq!(b[0].command, " '%>' + \"%>\" ");
    }

    #[test]
    fn comment_ends_at_close_tag() {
        let b = blocks("<%* x++ // note %>after");
        assert_eq!(b[0].command, " x++ // note ");
    }

    #[test]
    fn unterminated_fragment_reports_location() {
        let err = scan("line one\n  <% oops", &Delimiters::default()).unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn custom_delimiters() {
        let d = Delimiters {
            open: "{{".into(),
            close: "}}".into(),
        };
        let b = extract_blocks("x {{* a }} {{ b }}", &d).unwrap();
        assert_eq!(b.len(), 2);
        assert!(b[0].is_execution);
        assert_eq!(b[1].command, " b ");
    }

    #[test]
    fn line_index() {
        let idx = LineIndex::new("ab\ncdé\nf");
        assert_eq!(idx.line_col(0), (1, 1));
        assert_eq!(idx.line_col(3), (2, 1));
        assert_eq!(idx.line_col(8), (3, 1));
        assert_eq!(idx.line_count(), 3);
    }
}
