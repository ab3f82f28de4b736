//! Text storage abstraction for the local editor model.
//!
//! The `TextBuffer` trait is the minimal surface the binding and the section
//! scanner need from a text store. `EditorRope` is the ropey-backed
//! implementation used by [`LocalBuffer`](crate::LocalBuffer).

use std::ops::Range;

/// A text buffer that supports efficient editing and offset conversion.
///
/// All offsets are in Unicode scalar values (chars), not bytes or UTF-16.
/// Line numbers are zero-based here; the 1-based convention of editor
/// surfaces is applied by callers.
pub trait TextBuffer {
    /// Total length in chars (Unicode scalar values).
    fn len_chars(&self) -> usize;

    /// Check if empty.
    fn is_empty(&self) -> bool {
        self.len_chars() == 0
    }

    /// Insert text at char offset.
    fn insert(&mut self, char_offset: usize, text: &str);

    /// Delete char range.
    fn delete(&mut self, char_range: Range<usize>);

    /// Replace char range with text.
    fn replace(&mut self, char_range: Range<usize>, text: &str) {
        self.delete(char_range.clone());
        self.insert(char_range.start, text);
    }

    /// Convert entire buffer to String.
    fn to_string(&self) -> String;

    /// Number of lines. An empty buffer has one (empty) line, and a trailing
    /// newline opens a final empty line.
    fn len_lines(&self) -> usize;

    /// Char offset of the start of a zero-based line, clamped to the buffer.
    fn line_to_char(&self, line: usize) -> usize;

    /// Zero-based line containing a char offset, clamped to the last line.
    fn char_to_line(&self, char_offset: usize) -> usize;
}

/// Ropey-backed text buffer.
///
/// Provides O(log n) editing operations and offset conversions.
#[derive(Clone, Default)]
pub struct EditorRope {
    rope: ropey::Rope,
}

impl EditorRope {
    /// Create a new empty rope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from string.
    pub fn from_str(s: &str) -> Self {
        Self {
            rope: ropey::Rope::from_str(s),
        }
    }

    /// Get a reference to the underlying rope (for advanced operations).
    pub fn rope(&self) -> &ropey::Rope {
        &self.rope
    }

    /// Iterate the lines of the buffer without their line terminators.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.rope.lines().map(|line| {
            let mut s = line.to_string();
            if s.ends_with('\n') {
                s.pop();
                if s.ends_with('\r') {
                    s.pop();
                }
            }
            s
        })
    }
}

impl TextBuffer for EditorRope {
    fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    fn insert(&mut self, char_offset: usize, text: &str) {
        let at = char_offset.min(self.rope.len_chars());
        self.rope.insert(at, text);
    }

    fn delete(&mut self, char_range: Range<usize>) {
        let len = self.rope.len_chars();
        let start = char_range.start.min(len);
        let end = char_range.end.min(len);
        if start < end {
            self.rope.remove(start..end);
        }
    }

    fn to_string(&self) -> String {
        self.rope.to_string()
    }

    fn len_lines(&self) -> usize {
        self.rope.len_lines()
    }

    fn line_to_char(&self, line: usize) -> usize {
        if line >= self.rope.len_lines() {
            return self.rope.len_chars();
        }
        self.rope.line_to_char(line)
    }

    fn char_to_line(&self, char_offset: usize) -> usize {
        self.rope.char_to_line(char_offset.min(self.rope.len_chars()))
    }
}

impl From<&str> for EditorRope {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl From<String> for EditorRope {
    fn from(s: String) -> Self {
        Self::from_str(&s)
    }
}
