//! Turning a citation into a place the reader can jump to.

use crate::models::{Citation, ContentSection, NavigationTarget};

/// Resolve a citation against the book's section layout.
///
/// An explicit anchor always wins. Otherwise the citation's percentage is
/// mapped onto the sections by cumulative length. Citations with neither
/// yield `None` and should simply not be clickable.
pub fn resolve(sections: &[ContentSection], citation: &Citation) -> Option<NavigationTarget> {
    if let Some(anchor) = citation.anchor.as_deref().filter(|a| !a.is_empty()) {
        return Some(NavigationTarget::Anchor {
            anchor: anchor.to_string(),
        });
    }

    let percent = citation.position_percent?;
    let index = section_for_percent(sections, percent)?;
    Some(NavigationTarget::Section {
        index,
        href: sections[index].href.clone(),
    })
}

/// Index of the first section whose cumulative length reaches
/// `total * percent / 100`.
///
/// Out-of-range input is not rejected: anything at or below zero lands on
/// the first section and anything past the end on the last.
pub fn section_for_percent(sections: &[ContentSection], percent: f64) -> Option<usize> {
    if sections.is_empty() {
        return None;
    }

    let total = total_length(sections);
    let target = total as f64 * percent / 100.0;

    let mut cumulative = 0u64;
    for (index, section) in sections.iter().enumerate() {
        cumulative = cumulative.saturating_add(section.length);
        if cumulative as f64 >= target {
            return Some(index);
        }
    }

    Some(sections.len() - 1)
}

/// Percentage of the book that precedes section `index`.
pub fn percent_for_section(sections: &[ContentSection], index: usize) -> Option<f64> {
    if index >= sections.len() {
        return None;
    }

    let total = total_length(sections);
    if total == 0 {
        return Some(0.0);
    }

    let before = total_length(&sections[..index]);
    Some(before as f64 * 100.0 / total as f64)
}

fn total_length(sections: &[ContentSection]) -> u64 {
    sections
        .iter()
        .map(|s| s.length)
        .fold(0u64, u64::saturating_add)
}
