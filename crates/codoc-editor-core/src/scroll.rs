//! Editor → preview scroll mapping.
//!
//! The editor and the rendered preview have different layouts, so a raw
//! scroll ratio drifts badly on long documents. Instead the mapper finds the
//! section the editor is currently in (between two headings, or between two
//! line markers when the renderer emits them), measures how far through that
//! section the editor is, and applies the same progress to the matching
//! section of the preview.
//!
//! Geometry comes in through [`EditorGeometry`] and [`PreviewLayout`]; the
//! mapper itself never touches a UI toolkit.

use smol_str::SmolStr;

use crate::buffer::LocalBuffer;
use crate::frame::FrameCoalescer;
use crate::sections::{HeadingEntry, SectionIndex, normalize_heading_text, occurrence_index, section_at};

/// Pixel band after a heading boundary where progress stays at zero, so the
/// preview holds on the heading for a moment after it is crossed.
pub const HEADING_DEADZONE_PX: f64 = 14.0;

/// Minimum `preview / source` length ratio for accepting a preview heading
/// whose text is contained in the source heading text.
pub const REVERSE_CONTAINMENT_RATIO: f64 = 0.6;

/// Pixel geometry of the editor's lines.
pub trait EditorGeometry {
    /// Offset of the top of a 1-based line from the top of the content.
    fn line_top(&self, line: usize) -> f64;

    /// Number of lines in the editor model.
    fn line_count(&self) -> usize;

    /// Height of the laid-out content (bottom edge of the last line).
    fn content_height(&self) -> f64;
}

/// Editor scroll state at the time of a scroll event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditorViewport {
    pub scroll_top: f64,
    pub max_scroll_top: f64,
    /// 1-based line at the top of the visible area.
    pub top_line: usize,
}

/// A heading element in the rendered pane.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewHeading {
    pub text: SmolStr,
    /// Scroll offset that puts this heading at the top of the pane.
    pub top: f64,
}

/// A rendered element tagged with the source line it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMarker {
    /// 1-based source line.
    pub line: usize,
    pub top: f64,
}

/// What the mapper needs to know about the rendered pane.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewLayout {
    /// Headings in document order.
    pub headings: Vec<PreviewHeading>,
    /// Line markers, sorted by line.
    pub markers: Vec<LineMarker>,
    /// Offset of the trailing-edge marker, when the renderer emits one.
    pub tail_top: Option<f64>,
    pub max_scroll_top: f64,
}

impl PreviewLayout {
    /// Build a layout, normalizing heading text and ordering markers.
    pub fn new(
        headings: impl IntoIterator<Item = (String, f64)>,
        markers: impl IntoIterator<Item = LineMarker>,
        tail_top: Option<f64>,
        max_scroll_top: f64,
    ) -> Self {
        let headings = headings
            .into_iter()
            .map(|(text, top)| PreviewHeading {
                text: normalize_heading_text(&text),
                top,
            })
            .collect();
        let mut markers: Vec<LineMarker> = markers.into_iter().collect();
        markers.sort_by_key(|m| m.line);
        Self {
            headings,
            markers,
            tail_top,
            max_scroll_top,
        }
    }

    /// Where the last section ends in the preview.
    fn end_top(&self) -> f64 {
        self.tail_top.unwrap_or(self.max_scroll_top)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStrategy {
    /// Interpolated between two renderer line markers.
    Marker,
    /// Interpolated between two headings.
    Heading,
    /// Pinned to the bottom of the preview.
    Tail,
    /// Plain ratio of the two scroll ranges.
    Proportional,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTarget {
    pub offset: f64,
    pub strategy: ScrollStrategy,
}

/// Normalized progress through a section spanning `[start_top, end_top)`.
///
/// The first `deadzone` pixels past `start_top` report zero.
pub fn section_progress(scroll_top: f64, start_top: f64, end_top: f64, deadzone: f64) -> f64 {
    let span = (end_top - start_top).max(1.0) - deadzone;
    if span <= 0.0 {
        return if scroll_top - start_top >= deadzone { 1.0 } else { 0.0 };
    }
    ((scroll_top - start_top - deadzone) / span).clamp(0.0, 1.0)
}

/// Find the top of the `occurrence`-th preview heading matching `text`.
///
/// Exact matches win. Failing that, a preview heading that contains the
/// source text is accepted, as is one contained in the source text when it
/// is not much shorter (see [`REVERSE_CONTAINMENT_RATIO`]).
pub fn resolve_preview_heading(
    preview: &[PreviewHeading],
    text: &str,
    occurrence: usize,
) -> Option<f64> {
    let exact = preview
        .iter()
        .filter(|h| h.text.as_str() == text)
        .nth(occurrence)
        .map(|h| h.top);
    if exact.is_some() {
        return exact;
    }

    let source_len = text.chars().count();
    if source_len == 0 {
        return None;
    }
    preview
        .iter()
        .filter(|h| {
            if h.text.is_empty() {
                return false;
            }
            if h.text.contains(text) {
                return true;
            }
            let ratio = h.text.chars().count() as f64 / source_len as f64;
            text.contains(h.text.as_str()) && ratio >= REVERSE_CONTAINMENT_RATIO
        })
        .nth(occurrence)
        .map(|h| h.top)
}

/// Map the editor's scroll position to a preview scroll offset.
pub fn map_scroll<G: EditorGeometry + ?Sized>(
    headings: &[HeadingEntry],
    editor: &G,
    viewport: &EditorViewport,
    preview: &PreviewLayout,
) -> ScrollTarget {
    let clamp = |offset: f64| offset.clamp(0.0, preview.max_scroll_top.max(0.0));

    let last_line = editor.line_count().max(1);
    if viewport.scroll_top > 0.0 && viewport.scroll_top >= editor.line_top(last_line) {
        return ScrollTarget {
            offset: clamp(preview.max_scroll_top),
            strategy: ScrollStrategy::Tail,
        };
    }

    if let Some(offset) = map_by_markers(editor, viewport, preview) {
        return ScrollTarget {
            offset: clamp(offset),
            strategy: ScrollStrategy::Marker,
        };
    }

    if let Some(offset) = map_by_headings(headings, editor, viewport, preview) {
        return ScrollTarget {
            offset: clamp(offset),
            strategy: ScrollStrategy::Heading,
        };
    }

    tracing::trace!(
        scroll_top = viewport.scroll_top,
        "scroll: no anchors resolved, using proportional mapping"
    );
    ScrollTarget {
        offset: clamp(proportional(viewport, preview)),
        strategy: ScrollStrategy::Proportional,
    }
}

fn proportional(viewport: &EditorViewport, preview: &PreviewLayout) -> f64 {
    if viewport.max_scroll_top <= 0.0 {
        return 0.0;
    }
    (viewport.scroll_top / viewport.max_scroll_top) * preview.max_scroll_top
}

fn interpolate(start: f64, end: f64, progress: f64) -> f64 {
    start + (end - start) * progress
}

fn map_by_markers<G: EditorGeometry + ?Sized>(
    editor: &G,
    viewport: &EditorViewport,
    preview: &PreviewLayout,
) -> Option<f64> {
    let markers = &preview.markers;
    if markers.is_empty() {
        return None;
    }

    let idx = markers.partition_point(|m| m.line <= viewport.top_line);
    let (editor_start, preview_start) = match idx.checked_sub(1) {
        Some(i) => (editor.line_top(markers[i].line), markers[i].top),
        None => (0.0, 0.0),
    };
    let (editor_end, preview_end) = match markers.get(idx) {
        Some(next) => (editor.line_top(next.line), next.top),
        None => (editor.content_height(), preview.end_top()),
    };

    let progress = section_progress(viewport.scroll_top, editor_start, editor_end, 0.0);
    Some(interpolate(preview_start, preview_end, progress))
}

fn map_by_headings<G: EditorGeometry + ?Sized>(
    headings: &[HeadingEntry],
    editor: &G,
    viewport: &EditorViewport,
    preview: &PreviewLayout,
) -> Option<f64> {
    if headings.is_empty() || preview.headings.is_empty() {
        return None;
    }

    let resolve = |idx: usize| {
        resolve_preview_heading(
            &preview.headings,
            &headings[idx].text,
            occurrence_index(headings, idx),
        )
    };

    let current = section_at(headings, viewport.top_line);
    let (editor_start, preview_start, deadzone) = match current {
        Some(i) => (editor.line_top(headings[i].line), resolve(i)?, HEADING_DEADZONE_PX),
        // Above the first heading: the document start is the section start.
        None => (0.0, 0.0, 0.0),
    };

    let next = current.map_or(0, |i| i + 1);
    let (editor_end, preview_end) = match headings.get(next) {
        Some(h) => (editor.line_top(h.line), resolve(next)?),
        None => (editor.content_height(), preview.end_top()),
    };

    let progress = section_progress(viewport.scroll_top, editor_start, editor_end, deadzone);
    Some(interpolate(preview_start, preview_end, progress))
}

/// Parse the container's "locked" attribute. Absent or unrecognised values
/// mean unlocked.
pub fn parse_locked_attribute(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "locked")
    )
}

/// Scroll-sync controller for one split view.
///
/// Holds the heading cache, the lock state and the frame coalescer. Scroll
/// events only record the latest viewport; the mapping runs once per frame.
#[derive(Debug, Default)]
pub struct ScrollSync {
    index: SectionIndex,
    frames: FrameCoalescer,
    locked: bool,
    mounted: bool,
    latest: Option<EditorViewport>,
}

impl ScrollSync {
    pub fn new(locked: bool) -> Self {
        Self {
            locked,
            ..Self::default()
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        if self.locked != locked {
            tracing::debug!(locked, "scroll: lock toggled");
        }
        self.locked = locked;
        if !locked {
            self.frames.cancel();
            self.latest = None;
        }
    }

    /// Both panes are laid out; scroll events start being honoured.
    pub fn mount(&mut self) {
        self.mounted = true;
    }

    /// Panes are gone; drop pending work and the heading cache.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.frames.cancel();
        self.latest = None;
        self.index.invalidate();
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Record an editor scroll. Returns true when the host should schedule
    /// a frame callback; false when one is already pending or sync is off.
    pub fn on_editor_scroll(&mut self, viewport: EditorViewport) -> bool {
        if !self.locked || !self.mounted {
            return false;
        }
        self.latest = Some(viewport);
        self.frames.request()
    }

    /// Frame callback: compute the preview target for the latest viewport.
    pub fn on_frame<G: EditorGeometry + ?Sized>(
        &mut self,
        buffer: &LocalBuffer,
        editor: &G,
        preview: &PreviewLayout,
    ) -> Option<ScrollTarget> {
        if !self.frames.take() || !self.locked || !self.mounted {
            return None;
        }
        let viewport = self.latest.take()?;
        let headings = self.index.headings(buffer);
        Some(map_scroll(headings, editor, &viewport, preview))
    }

    /// Force a heading rescan on the next frame.
    pub fn invalidate(&mut self) {
        self.index.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::scan_headings;

    struct FixedLines {
        line_height: f64,
        lines: usize,
    }

    impl EditorGeometry for FixedLines {
        fn line_top(&self, line: usize) -> f64 {
            (line.saturating_sub(1)) as f64 * self.line_height
        }

        fn line_count(&self) -> usize {
            self.lines
        }

        fn content_height(&self) -> f64 {
            self.lines as f64 * self.line_height
        }
    }

    fn viewport(editor: &FixedLines, line: usize, extra: f64) -> EditorViewport {
        EditorViewport {
            scroll_top: editor.line_top(line) + extra,
            max_scroll_top: editor.content_height(),
            top_line: line,
        }
    }

    #[test]
    fn test_section_progress_boundaries() {
        assert_eq!(section_progress(100.0, 100.0, 400.0, 14.0), 0.0);
        assert_eq!(section_progress(114.0, 100.0, 400.0, 14.0), 0.0);
        assert_eq!(section_progress(400.0, 100.0, 400.0, 14.0), 1.0);
        assert_eq!(section_progress(257.0, 100.0, 400.0, 14.0), 0.5);
        assert_eq!(section_progress(50.0, 100.0, 400.0, 0.0), 0.0);
    }

    #[test]
    fn test_degenerate_section() {
        assert_eq!(section_progress(100.0, 100.0, 100.0, 14.0), 0.0);
        assert_eq!(section_progress(120.0, 100.0, 105.0, 14.0), 1.0);
    }

    #[test]
    fn test_repeated_heading_maps_to_matching_occurrence() {
        let mut source = String::new();
        for line in 1..=100 {
            match line {
                10 | 50 => source.push_str("## Notes\n"),
                _ => source.push_str("text\n"),
            }
        }
        let headings = scan_headings(&source);
        let editor = FixedLines {
            line_height: 20.0,
            lines: 100,
        };
        let preview = PreviewLayout::new(
            [("Notes".to_string(), 300.0), ("Notes".to_string(), 1500.0)],
            [],
            Some(2000.0),
            2500.0,
        );

        let target = map_scroll(&headings, &editor, &viewport(&editor, 50, 0.0), &preview);
        assert_eq!(target.strategy, ScrollStrategy::Heading);
        assert_eq!(target.offset, 1500.0);

        let target = map_scroll(&headings, &editor, &viewport(&editor, 10, 0.0), &preview);
        assert_eq!(target.offset, 300.0);
    }

    #[test]
    fn test_progress_interpolates_between_headings() {
        let headings = scan_headings("# A\n\n\n\n\n\n\n\n\n\n# B\n\n\n\n");
        let editor = FixedLines {
            line_height: 20.0,
            lines: 15,
        };
        let preview = PreviewLayout::new(
            [("A".to_string(), 0.0), ("B".to_string(), 1000.0)],
            [],
            None,
            1500.0,
        );
        // Section A spans 0..200px in the editor; halfway past the deadzone.
        let vp = EditorViewport {
            scroll_top: 14.0 + 93.0,
            max_scroll_top: 300.0,
            top_line: 6,
        };
        let target = map_scroll(&headings, &editor, &vp, &preview);
        assert_eq!(target.strategy, ScrollStrategy::Heading);
        assert_eq!(target.offset, 500.0);
    }

    #[test]
    fn test_tail_clamp() {
        let headings = scan_headings("# A\nx\nx\nx\nx\nx\nx\nx\nx\nx");
        let editor = FixedLines {
            line_height: 20.0,
            lines: 10,
        };
        let preview = PreviewLayout::new([("A".to_string(), 0.0)], [], None, 900.0);

        for extra in [1.0, 50.0, 5000.0] {
            let vp = EditorViewport {
                scroll_top: editor.line_top(10) + extra,
                max_scroll_top: 400.0,
                top_line: 10,
            };
            let target = map_scroll(&headings, &editor, &vp, &preview);
            assert_eq!(target.strategy, ScrollStrategy::Tail);
            assert_eq!(target.offset, 900.0);
        }
    }

    #[test]
    fn test_markers_preferred_over_headings() {
        let headings = scan_headings("# A\nx\nx\nx\nx\nx\nx\nx\nx\nx\nx\nx");
        let editor = FixedLines {
            line_height: 20.0,
            lines: 12,
        };
        let preview = PreviewLayout::new(
            [("A".to_string(), 0.0)],
            [
                LineMarker { line: 9, top: 800.0 },
                LineMarker { line: 1, top: 0.0 },
                LineMarker { line: 5, top: 400.0 },
            ],
            Some(1000.0),
            1200.0,
        );
        let vp = EditorViewport {
            scroll_top: 130.0,
            max_scroll_top: 240.0,
            top_line: 7,
        };
        let target = map_scroll(&headings, &editor, &vp, &preview);
        assert_eq!(target.strategy, ScrollStrategy::Marker);
        assert_eq!(target.offset, 650.0);
    }

    #[test]
    fn test_falls_back_to_proportional() {
        let editor = FixedLines {
            line_height: 20.0,
            lines: 50,
        };
        let preview = PreviewLayout::new(Vec::<(String, f64)>::new(), [], None, 300.0);
        let vp = EditorViewport {
            scroll_top: 50.0,
            max_scroll_top: 100.0,
            top_line: 3,
        };
        let target = map_scroll(&[], &editor, &vp, &preview);
        assert_eq!(target.strategy, ScrollStrategy::Proportional);
        assert_eq!(target.offset, 150.0);

        // Headings present but none render: also proportional.
        let headings = scan_headings("# Missing\n");
        let preview = PreviewLayout::new([("Other".to_string(), 10.0)], [], None, 300.0);
        let target = map_scroll(&headings, &editor, &vp, &preview);
        assert_eq!(target.strategy, ScrollStrategy::Proportional);
    }

    #[test]
    fn test_tolerant_heading_match() {
        let preview = vec![
            PreviewHeading {
                text: "Setup".into(),
                top: 10.0,
            },
            PreviewHeading {
                text: "Setup guide 1".into(),
                top: 20.0,
            },
        ];
        // Preview contains the source text.
        assert_eq!(resolve_preview_heading(&preview, "Setup guide", 0), Some(20.0));
        // Source contains a much shorter preview text: rejected.
        assert_eq!(resolve_preview_heading(&preview[..1], "Setup and teardown", 0), None);
        // Source contains a preview text of similar length: accepted.
        assert_eq!(resolve_preview_heading(&preview[..1], "Setup!", 0), Some(10.0));
    }

    #[test]
    fn test_end_to_end_example() {
        let buffer = LocalBuffer::new("# A\nhello\n# B\nworld\n");
        let editor = FixedLines {
            line_height: 20.0,
            lines: buffer.line_count(),
        };
        let preview = PreviewLayout::new(
            [("A".to_string(), 0.0), ("B".to_string(), 200.0)],
            [],
            None,
            400.0,
        );

        let mut sync = ScrollSync::new(true);
        sync.mount();
        assert!(sync.on_editor_scroll(viewport(&editor, 3, 0.0)));
        let target = sync.on_frame(&buffer, &editor, &preview).unwrap();
        assert_eq!(target.strategy, ScrollStrategy::Heading);
        assert_eq!(target.offset, 200.0);
    }

    #[test]
    fn test_scroll_sync_coalesces_and_respects_lock() {
        let buffer = LocalBuffer::new("# A\n");
        let editor = FixedLines {
            line_height: 20.0,
            lines: 40,
        };
        let preview = PreviewLayout::new([("A".to_string(), 0.0)], [], None, 100.0);

        let mut sync = ScrollSync::new(false);
        sync.mount();
        assert!(!sync.on_editor_scroll(viewport(&editor, 2, 0.0)));
        assert!(sync.on_frame(&buffer, &editor, &preview).is_none());

        sync.set_locked(true);
        assert!(sync.on_editor_scroll(viewport(&editor, 2, 0.0)));
        assert!(!sync.on_editor_scroll(viewport(&editor, 3, 0.0)));
        assert!(sync.on_frame(&buffer, &editor, &preview).is_some());
        assert!(sync.on_frame(&buffer, &editor, &preview).is_none());

        sync.unmount();
        assert!(!sync.on_editor_scroll(viewport(&editor, 2, 0.0)));
    }

    #[test]
    fn test_locked_attribute() {
        assert!(parse_locked_attribute(Some("true")));
        assert!(parse_locked_attribute(Some(" True ")));
        assert!(!parse_locked_attribute(Some("false")));
        assert!(!parse_locked_attribute(None));
    }
}
