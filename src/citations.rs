//! Citation marker extraction, validation, and binding.
//!
//! Generated answers reference retrieved chunks with `[N]` markers, 1-indexed
//! in first-appearance order against the chunk list the generator was shown.

use regex::Regex;
use std::sync::OnceLock;

fn citation_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub marker: usize,
    pub chunk_id: String,
}

/// Marker numbers in first-appearance order, duplicates removed.
pub fn extract(text: &str) -> Vec<usize> {
    let mut seen = std::collections::HashSet::new();
    let mut markers = Vec::new();
    for capture in citation_marker().captures_iter(text) {
        if let Ok(n) = capture[1].parse::<usize>() {
            if seen.insert(n) {
                markers.push(n);
            }
        }
    }
    markers
}

/// Validates that every marker in `text` refers to one of `source_count`
/// sources (1-indexed). Returns whether the text is clean and the full list
/// of dangling markers found, in first-appearance order — every violation,
/// not just the first.
pub fn validate(text: &str, source_count: usize) -> (bool, Vec<usize>) {
    let violations: Vec<usize> = extract(text)
        .into_iter()
        .filter(|&marker| marker == 0 || marker > source_count)
        .collect();
    (violations.is_empty(), violations)
}

/// Binds each marker found in `text` to the chunk id at that (1-indexed)
/// position in `source_chunk_ids`, in first-appearance order. Markers beyond
/// `source_chunk_ids`'s range are skipped rather than erroring — callers that
/// need strict validation should call `validate` first.
pub fn bind(text: &str, source_chunk_ids: &[String]) -> Vec<Citation> {
    extract(text)
        .into_iter()
        .filter_map(|marker| {
            source_chunk_ids
                .get(marker.checked_sub(1)?)
                .map(|chunk_id| Citation { marker, chunk_id: chunk_id.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_returns_markers_in_first_appearance_order_deduped() {
        let markers = extract("Alpha [1]. Beta [2][3]. Gamma [1].");
        assert_eq!(markers, vec![1, 2, 3]);
    }

    #[test]
    fn extract_with_no_markers_is_empty() {
        assert!(extract("no citations here").is_empty());
    }

    #[test]
    fn validate_rejects_marker_past_source_count() {
        let (ok, violations) = validate("See [4] for details.", 2);
        assert!(!ok);
        assert_eq!(violations, vec![4]);
    }

    #[test]
    fn validate_rejects_marker_zero() {
        let (ok, violations) = validate("See [0].", 3);
        assert!(!ok);
        assert_eq!(violations, vec![0]);
    }

    #[test]
    fn validate_reports_every_dangling_marker_not_just_the_first() {
        let (ok, violations) = validate("See [1], [5], and [9].", 1);
        assert!(!ok);
        assert_eq!(violations, vec![5, 9]);
    }

    #[test]
    fn validate_passes_when_every_marker_is_in_range() {
        let (ok, violations) = validate("See [1] and [2].", 2);
        assert!(ok);
        assert!(violations.is_empty());
    }

    #[test]
    fn bind_maps_markers_to_source_chunk_ids() {
        let sources = vec!["chunk-a".to_string(), "chunk-b".to_string(), "chunk-c".to_string()];
        let citations = bind("Alpha [1]. Beta [2][3].", &sources);
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[0], Citation { marker: 1, chunk_id: "chunk-a".into() });
        assert_eq!(citations[2], Citation { marker: 3, chunk_id: "chunk-c".into() });
    }

    #[test]
    fn bind_skips_markers_outside_source_range() {
        let sources = vec!["chunk-a".to_string()];
        let citations = bind("See [1] and [9].", &sources);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].marker, 1);
    }
}
