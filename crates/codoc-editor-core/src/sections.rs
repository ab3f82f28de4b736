//! Heading index for the local buffer.
//!
//! A single forward scan over the buffer's lines records ATX headings that
//! sit outside fenced code blocks. The result is cached against the buffer
//! version so repeated scroll events do not rescan an unchanged document.

use std::sync::LazyLock;

use regex::Regex;
use smol_str::SmolStr;

use crate::buffer::LocalBuffer;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})[ \t]+(.+?)[ \t]*$").unwrap());

static FENCE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})").unwrap());

static CLOSING_HASHES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[ \t]+)#+$").unwrap());

static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\](?:\([^)]*\)|\[[^\]]*\])").unwrap());

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`+([^`]*)`+").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// One heading line in the source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEntry {
    /// 1-based line number.
    pub line: usize,
    /// Heading level, 1 through 6.
    pub level: u8,
    /// Heading text with inline markdown removed and whitespace collapsed.
    pub text: SmolStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    ch: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let caps = FENCE_OPEN_RE.captures(line)?;
        let run = caps.get(1)?.as_str();
        let ch = run.chars().next()?;
        Some(Self {
            ch,
            len: run.chars().count(),
        })
    }

    /// A closing line repeats the opening character at least as many times
    /// and carries nothing else but whitespace.
    fn closes(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let count = trimmed.chars().take_while(|c| *c == self.ch).count();
        count >= self.len && count == trimmed.chars().count()
    }
}

/// Scan `lines` for headings outside fenced code.
pub fn scan_lines<'a, I>(lines: I) -> Vec<HeadingEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut headings = Vec::new();
    let mut fence: Option<Fence> = None;

    for (idx, line) in lines.into_iter().enumerate() {
        match fence {
            Some(open) => {
                if open.closes(line) {
                    fence = None;
                }
                continue;
            }
            None => {
                if let Some(open) = Fence::open(line) {
                    fence = Some(open);
                    continue;
                }
            }
        }

        if let Some(entry) = parse_heading(line, idx + 1) {
            headings.push(entry);
        }
    }

    headings
}

/// Scan a whole text.
pub fn scan_headings(text: &str) -> Vec<HeadingEntry> {
    scan_lines(text.lines())
}

fn parse_heading(line: &str, line_number: usize) -> Option<HeadingEntry> {
    let caps = HEADING_RE.captures(line)?;
    let level = caps.get(1)?.as_str().len() as u8;
    let raw = caps.get(2)?.as_str();
    let raw = CLOSING_HASHES_RE.replace(raw, "");
    let text = normalize_heading_text(&raw);
    if text.is_empty() {
        return None;
    }
    Some(HeadingEntry {
        line: line_number,
        level,
        text,
    })
}

/// Reduce heading markdown to the text a reader sees.
///
/// Images and links collapse to their label, inline code is unwrapped,
/// emphasis markers are dropped and whitespace runs become one space. The
/// rendered side runs its (already plain) heading text through the same
/// function so both sides compare equal.
pub fn normalize_heading_text(raw: &str) -> SmolStr {
    let text = INLINE_CODE_RE.replace_all(raw, "$1");
    let text = IMAGE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = strip_emphasis(&text);
    let text = WHITESPACE_RE.replace_all(&text, " ");
    SmolStr::new(text.trim())
}

/// Drop `*` and `~~` runs everywhere, and `_` runs that sit at a word edge.
/// Underscores inside words (`snake_case`) are content.
fn strip_emphasis(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                i += 1;
            }
            '~' if chars.get(i + 1) == Some(&'~') => {
                while i < chars.len() && chars[i] == '~' {
                    i += 1;
                }
            }
            '_' => {
                let start = i;
                while i < chars.len() && chars[i] == '_' {
                    i += 1;
                }
                let before = start.checked_sub(1).map(|p| chars[p]);
                let after = chars.get(i).copied();
                let inside_word = before.is_some_and(char::is_alphanumeric)
                    && after.is_some_and(char::is_alphanumeric);
                if inside_word {
                    out.extend(&chars[start..i]);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Index of the last heading whose line is at or above `line`.
pub fn section_at(headings: &[HeadingEntry], line: usize) -> Option<usize> {
    headings.partition_point(|h| h.line <= line).checked_sub(1)
}

/// How many earlier headings share the text of `headings[idx]`.
pub fn occurrence_index(headings: &[HeadingEntry], idx: usize) -> usize {
    let text = &headings[idx].text;
    headings[..idx].iter().filter(|h| &h.text == text).count()
}

/// Heading list cached against the buffer version it was built from.
#[derive(Debug, Default)]
pub struct SectionIndex {
    version: Option<u64>,
    headings: Vec<HeadingEntry>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headings for the buffer's current version. Rescans only when the
    /// version differs from the cached one.
    pub fn headings(&mut self, buffer: &LocalBuffer) -> &[HeadingEntry] {
        let version = buffer.version();
        if self.version != Some(version) {
            let headings = scan_headings(&buffer.text());
            tracing::trace!(version, count = headings.len(), "sections: rebuilt index");
            self.headings = headings;
            self.version = Some(version);
        }
        &self.headings
    }

    /// Version the cached list was built from, if any.
    pub fn cached_version(&self) -> Option<u64> {
        self.version
    }

    /// Drop the cache, e.g. when the view switches to another buffer.
    pub fn invalidate(&mut self) {
        self.version = None;
        self.headings.clear();
    }
}
