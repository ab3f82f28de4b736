//! The editor's local text model.
//!
//! `LocalBuffer` is a cheap-to-clone handle over a rope, a version counter
//! and the active selections. It is single-threaded: the host editor and the
//! replication binding share it on the UI thread. Listeners run after the
//! internal borrow is released, so a listener may read the buffer (but edits
//! from inside a listener are applied as a new, nested batch).

use std::cell::RefCell;
use std::rc::Rc;

use codoc_common::listeners::{ListenerId, Listeners};
use thiserror::Error;

use crate::text::{EditorRope, TextBuffer};
use crate::types::{
    ContentChange, ContentChangeEvent, Selection, SelectionChangeEvent, TextEdit,
};

/// Rejected edit batches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("edit range {start}..{end} is outside the buffer (len {len})")]
    OutOfRange { start: usize, end: usize, len: usize },

    #[error("edit ranges overlap at offset {0}")]
    Overlapping(usize),
}

struct BufferState {
    text: EditorRope,
    version: u64,
    selections: Vec<Selection>,
}

struct Inner {
    state: RefCell<BufferState>,
    content_listeners: Listeners<ContentChangeEvent>,
    selection_listeners: Listeners<SelectionChangeEvent>,
}

/// Shared handle to the local editable text.
#[derive(Clone)]
pub struct LocalBuffer {
    inner: Rc<Inner>,
}

impl LocalBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(BufferState {
                    text: EditorRope::from_str(text),
                    version: 1,
                    selections: Vec::new(),
                }),
                content_listeners: Listeners::new(),
                selection_listeners: Listeners::new(),
            }),
        }
    }

    /// Current text as an owned string.
    pub fn text(&self) -> String {
        self.inner.state.borrow().text.to_string()
    }

    /// Monotonic version, bumped once per applied batch.
    pub fn version(&self) -> u64 {
        self.inner.state.borrow().version
    }

    pub fn len_chars(&self) -> usize {
        self.inner.state.borrow().text.len_chars()
    }

    pub fn is_empty(&self) -> bool {
        self.len_chars() == 0
    }

    /// Number of lines (1-based line numbers run `1..=line_count()`).
    pub fn line_count(&self) -> usize {
        self.inner.state.borrow().text.len_lines()
    }

    /// Char offset where 1-based `line` starts.
    pub fn line_to_char(&self, line: usize) -> usize {
        self.inner
            .state
            .borrow()
            .text
            .line_to_char(line.saturating_sub(1))
    }

    /// 1-based line containing `offset`.
    pub fn char_to_line(&self, offset: usize) -> usize {
        self.inner.state.borrow().text.char_to_line(offset) + 1
    }

    /// Lines without terminators.
    pub fn lines(&self) -> Vec<String> {
        self.inner.state.borrow().text.lines().collect()
    }

    /// Run `f` against the underlying rope without copying the text.
    pub fn with_text<R>(&self, f: impl FnOnce(&EditorRope) -> R) -> R {
        f(&self.inner.state.borrow().text)
    }

    /// Check whether two handles point at the same buffer.
    pub fn ptr_eq(&self, other: &LocalBuffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Apply a batch of non-overlapping edits expressed against the current
    /// text. Edits are applied from the highest offset down so earlier ranges
    /// stay valid; the emitted event lists them in that order.
    pub fn apply_edits(&self, edits: Vec<TextEdit>) -> Result<ContentChangeEvent, BufferError> {
        let event = {
            let mut state = self.inner.state.borrow_mut();
            let len = state.text.len_chars();

            let mut edits = edits;
            edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));

            let mut floor = usize::MAX;
            for edit in &edits {
                let (start, end) = (edit.range.start, edit.range.end);
                if start > end || end > len {
                    return Err(BufferError::OutOfRange { start, end, len });
                }
                if end > floor {
                    return Err(BufferError::Overlapping(start));
                }
                floor = start;
            }

            let mut changes = Vec::with_capacity(edits.len());
            for edit in edits {
                let range_length = edit.range.len();
                let inserted = edit.text.chars().count();
                state.text.replace(edit.range.clone(), &edit.text);
                let offset = edit.range.start;
                for sel in state.selections.iter_mut() {
                    sel.anchor = shift_offset(sel.anchor, offset, range_length, inserted);
                    sel.head = shift_offset(sel.head, offset, range_length, inserted);
                }
                changes.push(ContentChange {
                    range_offset: offset,
                    range_length,
                    text: edit.text,
                });
            }

            state.version += 1;
            ContentChangeEvent {
                changes,
                version: state.version,
                is_flush: false,
            }
        };

        tracing::trace!(
            version = event.version,
            changes = event.changes.len(),
            "buffer: applied edits"
        );
        self.inner.content_listeners.emit(&event);
        Ok(event)
    }

    /// Replace the whole text. Selections collapse to the start.
    pub fn set_value(&self, text: &str) -> ContentChangeEvent {
        let event = {
            let mut state = self.inner.state.borrow_mut();
            let old_len = state.text.len_chars();
            state.text = EditorRope::from_str(text);
            state.version += 1;
            if !state.selections.is_empty() {
                state.selections = vec![Selection::collapsed(0)];
            }
            ContentChangeEvent {
                changes: vec![ContentChange {
                    range_offset: 0,
                    range_length: old_len,
                    text: text.to_string(),
                }],
                version: state.version,
                is_flush: true,
            }
        };

        tracing::debug!(version = event.version, "buffer: value replaced");
        self.inner.content_listeners.emit(&event);
        event
    }

    pub fn selections(&self) -> Vec<Selection> {
        self.inner.state.borrow().selections.clone()
    }

    /// Replace the active selections, clamped to the buffer.
    pub fn set_selections(&self, selections: Vec<Selection>) {
        let event = {
            let mut state = self.inner.state.borrow_mut();
            let len = state.text.len_chars();
            state.selections = selections.into_iter().map(|s| s.clamped(len)).collect();
            SelectionChangeEvent {
                selections: state.selections.clone(),
            }
        };
        self.inner.selection_listeners.emit(&event);
    }

    pub fn on_did_change_content(
        &self,
        listener: impl Fn(&ContentChangeEvent) + 'static,
    ) -> ListenerId {
        self.inner.content_listeners.add(listener)
    }

    pub fn on_did_change_selection(
        &self,
        listener: impl Fn(&SelectionChangeEvent) + 'static,
    ) -> ListenerId {
        self.inner.selection_listeners.add(listener)
    }

    /// Remove a content listener; unknown ids are ignored.
    pub fn remove_content_listener(&self, id: ListenerId) {
        self.inner.content_listeners.remove(id);
    }

    /// Remove a selection listener; unknown ids are ignored.
    pub fn remove_selection_listener(&self, id: ListenerId) {
        self.inner.selection_listeners.remove(id);
    }
}

impl Default for LocalBuffer {
    fn default() -> Self {
        Self::new("")
    }
}

impl std::fmt::Debug for LocalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("LocalBuffer")
            .field("version", &state.version)
            .field("len_chars", &state.text.len_chars())
            .field("selections", &state.selections)
            .finish()
    }
}

/// Map an offset through a single replacement at `offset`.
fn shift_offset(pos: usize, offset: usize, removed: usize, inserted: usize) -> usize {
    if pos <= offset {
        pos
    } else if pos >= offset + removed {
        pos - removed + inserted
    } else {
        offset + inserted
    }
}
