//! Allow/deny filtering of enumerated tools by name.
//!
//! Matching is case-insensitive and supports `*` wildcards anywhere in the
//! pattern. An allow filter with an empty list admits everything.

use crate::config::{FilterMode, ToolFilterConfig};

/// Whether a tool of this name survives the backend's filter.
pub fn tool_allowed(filter: &ToolFilterConfig, name: &str) -> bool {
    let listed = filter
        .list
        .iter()
        .any(|pattern| pattern_matches(pattern, name));
    match filter.mode {
        FilterMode::Allow => filter.list.is_empty() || listed,
        FilterMode::Deny => !listed,
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let name = name.to_lowercase();
    glob_match(pattern.as_bytes(), name.as_bytes())
}

/// Iterative `*`-only glob with backtracking.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
