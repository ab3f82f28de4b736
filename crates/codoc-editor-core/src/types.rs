//! Core editor types: selections, edits and the change events a
//! [`LocalBuffer`](crate::LocalBuffer) emits.

use std::ops::Range;

/// Which end of a selection carries the caret.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum SelectionDirection {
    /// Caret at the end (`anchor <= head`).
    #[default]
    LeftToRight,
    /// Caret at the start (`head < anchor`).
    RightToLeft,
}

/// Text selection with anchor and head positions.
///
/// The anchor is where the selection started, the head is where the cursor is now.
/// They may be in any order - use `start()` and `end()` for ordered bounds.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Where selection started
    pub anchor: usize,
    /// Where cursor is now
    pub head: usize,
}

impl Selection {
    /// Create a new selection.
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Create a collapsed selection (cursor position).
    pub fn collapsed(offset: usize) -> Self {
        Self {
            anchor: offset,
            head: offset,
        }
    }

    /// Build a selection from ordered bounds plus a direction.
    pub fn from_range(range: Range<usize>, direction: SelectionDirection) -> Self {
        match direction {
            SelectionDirection::LeftToRight => Self::new(range.start, range.end),
            SelectionDirection::RightToLeft => Self::new(range.end, range.start),
        }
    }

    /// Get the start (lower bound) of the selection.
    pub fn start(&self) -> usize {
        self.anchor.min(self.head)
    }

    /// Get the end (upper bound) of the selection.
    pub fn end(&self) -> usize {
        self.anchor.max(self.head)
    }

    /// Check if the selection is collapsed (empty, cursor only).
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    /// Convert to a Range<usize> (ordered).
    pub fn to_range(&self) -> Range<usize> {
        self.start()..self.end()
    }

    pub fn direction(&self) -> SelectionDirection {
        if self.head < self.anchor {
            SelectionDirection::RightToLeft
        } else {
            SelectionDirection::LeftToRight
        }
    }

    /// Clamp both ends to `len`.
    pub fn clamped(self, len: usize) -> Self {
        Self {
            anchor: self.anchor.min(len),
            head: self.head.min(len),
        }
    }
}

/// One replacement against the text as it was before the batch started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub text: String,
}

impl TextEdit {
    pub fn new(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset..offset, text)
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range, String::new())
    }
}

/// A single change record, in the shape editor surfaces report them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentChange {
    /// Char offset of the replaced range in the pre-change text.
    pub range_offset: usize,
    /// Length in chars of the replaced range.
    pub range_length: usize,
    /// Text inserted in place of the range.
    pub text: String,
}

/// Emitted once per applied edit batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentChangeEvent {
    pub changes: Vec<ContentChange>,
    /// Buffer version after the batch.
    pub version: u64,
    /// True when the whole text was replaced wholesale.
    pub is_flush: bool,
}

/// Emitted whenever the active selections change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionChangeEvent {
    pub selections: Vec<Selection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_bounds_and_direction() {
        let sel = Selection::new(10, 4);
        assert_eq!(sel.start(), 4);
        assert_eq!(sel.end(), 10);
        assert_eq!(sel.direction(), SelectionDirection::RightToLeft);
        assert_eq!(
            Selection::from_range(4..10, SelectionDirection::RightToLeft),
            sel
        );
        assert!(Selection::collapsed(3).is_collapsed());
    }

    #[test]
    fn test_selection_clamp() {
        assert_eq!(Selection::new(2, 50).clamped(8), Selection::new(2, 8));
    }
}
