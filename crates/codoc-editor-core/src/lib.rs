//! codoc-editor-core: editor logic without framework or replication
//! dependencies.
//!
//! This crate provides:
//! - `LocalBuffer` - the editor's observable text model
//! - `SectionIndex` - cached heading list built from the buffer
//! - `ScrollSync` / `map_scroll` - editor-to-preview scroll mapping
//! - `SplitRatio` - the persisted split-pane preference

pub mod buffer;
pub mod frame;
pub mod prefs;
pub mod scroll;
pub mod sections;
pub mod text;
pub mod types;

pub use buffer::{BufferError, LocalBuffer};
pub use codoc_common::listeners::ListenerId;
pub use frame::FrameCoalescer;
pub use prefs::{
    JsonFileStore, MemoryStore, PreferenceStore, PrefsError, SPLIT_RATIO_KEY, SplitRatio,
    load_split_ratio, save_split_ratio,
};
pub use scroll::{
    EditorGeometry, EditorViewport, LineMarker, PreviewHeading, PreviewLayout, ScrollStrategy,
    ScrollSync, ScrollTarget, map_scroll, parse_locked_attribute,
};
pub use sections::{HeadingEntry, SectionIndex, normalize_heading_text, scan_headings};
pub use smol_str::SmolStr;
pub use text::{EditorRope, TextBuffer};
pub use types::{
    ContentChange, ContentChangeEvent, Selection, SelectionChangeEvent, SelectionDirection,
    TextEdit,
};
