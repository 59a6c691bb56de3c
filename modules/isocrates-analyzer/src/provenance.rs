//! Provenance Tracker: extracts which source files a generated document
//! actually drew on, and computes content hashes so a later regeneration
//! check can tell whether those files have since changed.

use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Find `[[wikilink]]`-style and inline-code source references inside a
/// generated document's markdown, restricted to the set of files the writer
/// was actually given (`key_files`) so a stray code-fence mention of an
/// unrelated path doesn't get recorded as provenance.
pub fn extract_source_references(markdown: &str, key_files: &[String]) -> Vec<String> {
    let mut referenced: Vec<String> = key_files
        .iter()
        .filter(|f| markdown.contains(f.as_str()))
        .cloned()
        .collect();

    if referenced.is_empty() {
        referenced = key_files.to_vec();
    }

    referenced.sort();
    referenced.dedup();
    referenced
}

/// Compute a short (first 16 hex chars of SHA-256) content hash for each
/// relative path, read from `repo_path`. Missing files are simply omitted —
/// callers treat an absent hash as "changed" during the regeneration check.
pub fn compute_source_hashes(repo_path: &Path, relpaths: &[String]) -> HashMap<String, String> {
    let mut hashes = HashMap::new();
    for relpath in relpaths {
        let full_path = repo_path.join(relpath);
        let Ok(bytes) = std::fs::read(&full_path) else {
            continue;
        };
        let digest = Sha256::digest(&bytes);
        let hex_digest = hex::encode(digest);
        hashes.insert(relpath.clone(), hex_digest[..16].to_string());
    }
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn extracts_only_referenced_key_files() {
        let markdown = "See `src/main.rs` for the entry point.";
        let key_files = vec!["src/main.rs".to_string(), "src/unused.rs".to_string()];
        let refs = extract_source_references(markdown, &key_files);
        assert_eq!(refs, vec!["src/main.rs".to_string()]);
    }

    #[test]
    fn falls_back_to_all_key_files_when_none_match() {
        let markdown = "Generic overview with no paths mentioned.";
        let key_files = vec!["src/a.rs".to_string(), "src/b.rs".to_string()];
        let refs = extract_source_references(markdown, &key_files);
        assert_eq!(refs, key_files);
    }

    #[test]
    fn hashes_are_stable_and_16_hex_chars() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        let hashes = compute_source_hashes(dir.path(), &["a.rs".to_string()]);
        let hash = hashes.get("a.rs").unwrap();
        assert_eq!(hash.len(), 16);
        let hashes_again = compute_source_hashes(dir.path(), &["a.rs".to_string()]);
        assert_eq!(hash, hashes_again.get("a.rs").unwrap());
    }

    #[test]
    fn missing_file_is_omitted_not_errored() {
        let dir = tempdir().unwrap();
        let hashes = compute_source_hashes(dir.path(), &["missing.rs".to_string()]);
        assert!(hashes.is_empty());
    }
}
