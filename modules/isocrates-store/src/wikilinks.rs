//! Wikilink parsing, cycle detection, and the crate-rename rewrite — the
//! pure, DB-free pieces of dependency derivation (spec §4.9.4-§4.9.6).

use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

fn wikilink_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap())
}

fn is_url_like(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("ftp://")
}

/// Extract the deduplicated set of wikilink targets from markdown content.
/// `[[Target|Display text]]` resolves to `Target`; URL-like targets are
/// dropped since they're external links, not wiki references.
pub fn extract_wikilink_targets(markdown: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for caps in wikilink_pattern().captures_iter(markdown) {
        let raw = &caps[1];
        let target = raw.split('|').next().unwrap_or(raw).trim().to_string();
        if target.is_empty() || is_url_like(&target) {
            continue;
        }
        if seen.insert(target.clone()) {
            targets.push(target);
        }
    }
    targets
}

/// Rewrite every `[[old_target]]` / `[[old_target|display]]` occurrence in
/// `markdown` to target `new_target`, preserving any display text. Returns
/// `None` if `old_target` does not appear (no rewrite needed).
pub fn rewrite_wikilink_target(markdown: &str, old_target: &str, new_target: &str) -> Option<String> {
    let mut changed = false;
    let rewritten = wikilink_pattern()
        .replace_all(markdown, |caps: &regex::Captures| {
            let raw = &caps[1];
            let (target, display) = match raw.split_once('|') {
                Some((t, d)) => (t.trim(), Some(d)),
                None => (raw.trim(), None),
            };
            if target == old_target {
                changed = true;
                match display {
                    Some(d) => format!("[[{new_target}|{d}]]"),
                    None => format!("[[{new_target}]]"),
                }
            } else {
                format!("[[{raw}]]")
            }
        })
        .into_owned();

    if changed {
        Some(rewritten)
    } else {
        None
    }
}

/// Does an existing path from `start` to `goal` already exist in `edges`
/// (directed `(from, to)` pairs)? Iterative DFS with an explicit stack so
/// depth is bounded only by available memory, not the call stack.
pub fn has_path(edges: &[(String, String)], start: &str, goal: &str) -> bool {
    if start == goal {
        return true;
    }
    let mut adjacency: std::collections::HashMap<&str, Vec<&str>> = std::collections::HashMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: VecDeque<&str> = VecDeque::new();
    stack.push_back(start);
    visited.insert(start);

    while let Some(node) = stack.pop_back() {
        if node == goal {
            return true;
        }
        if let Some(neighbors) = adjacency.get(node) {
            for &next in neighbors {
                if visited.insert(next) {
                    stack.push_back(next);
                }
            }
        }
    }
    false
}

/// Would inserting a `from -> to` edge of a non-wikilink link type close a
/// cycle, given the existing edge set? True exactly when `to` can already
/// reach `from`.
pub fn would_create_cycle(existing_edges: &[(String, String)], from: &str, to: &str) -> bool {
    has_path(existing_edges, to, from)
}
