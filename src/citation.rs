//! Citation markers embedded in assistant replies.
//!
//! Replies reference the book with superscript markers (`¹`, `²³`, `★2`).
//! [`CitationIndex`] maps each marker to the [`Citation`] the backend returned
//! for that reply and splits reply text into plain and marker segments.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::models::Citation;

const MARKER_PATTERN: &str = "[\u{2070}\u{00B9}\u{00B2}\u{00B3}\u{2074}-\u{2079}\u{2605}]+[0-9]*";

fn marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MARKER_PATTERN).ok()).as_ref()
}

/// A marker occurrence found in text. Offsets are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch<'t> {
    pub marker: &'t str,
    pub start: usize,
    pub len: usize,
}

impl MarkerMatch<'_> {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Scan `text` left to right for non-overlapping citation markers.
pub fn scan(text: &str) -> Vec<MarkerMatch<'_>> {
    let Some(re) = marker_regex() else {
        return Vec::new();
    };

    re.find_iter(text)
        .map(|m| MarkerMatch {
            marker: m.as_str(),
            start: m.start(),
            len: m.len(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'t, 'c> {
    Text(&'t str),
    Marker {
        marker: &'t str,
        citation: Option<&'c Citation>,
    },
}

impl Segment<'_, '_> {
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(text) => text,
            Segment::Marker { marker, .. } => marker,
        }
    }

    /// Whether the segment should be clickable. Markers with no citation are
    /// shown as plain superscript.
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            Segment::Marker {
                citation: Some(_),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CitationIndex {
    by_marker: HashMap<String, Citation>,
}

impl CitationIndex {
    pub fn build(citations: &[Citation]) -> Self {
        let mut by_marker = HashMap::with_capacity(citations.len());
        for citation in citations {
            if by_marker.contains_key(&citation.marker) {
                warn!(marker = %citation.marker, "duplicate citation marker, keeping first");
                continue;
            }
            by_marker.insert(citation.marker.clone(), citation.clone());
        }
        Self { by_marker }
    }

    pub fn get(&self, marker: &str) -> Option<&Citation> {
        self.by_marker.get(marker)
    }

    pub fn len(&self) -> usize {
        self.by_marker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_marker.is_empty()
    }

    /// Split `text` into plain runs and markers, resolving each marker
    /// against the index. Concatenating the segments yields `text`.
    pub fn render<'t>(&self, text: &'t str) -> Vec<Segment<'t, '_>> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for found in scan(text) {
            if found.start > cursor {
                segments.push(Segment::Text(&text[cursor..found.start]));
            }
            segments.push(Segment::Marker {
                marker: found.marker,
                citation: self.get(found.marker),
            });
            cursor = found.end();
        }

        if cursor < text.len() {
            segments.push(Segment::Text(&text[cursor..]));
        }

        segments
    }
}
