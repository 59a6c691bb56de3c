//! Deterministic document ID generation (spec §4.9.1). The content store is
//! the sole authority on this scheme — callers never construct IDs
//! themselves, they only ever get one back from `create_or_update`.

use sha2::{Digest, Sha256};

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..12].to_string()
}

fn normalize_repo_url(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

/// Given `(repo_url, path, title, doc_type)`, compute the stable document ID.
pub fn generate_document_id(repo_url: Option<&str>, path: &str, title: &str, doc_type: Option<&str>) -> String {
    let repo_url = repo_url.unwrap_or("");
    if repo_url.is_empty() {
        let key = format!("{path}/{title}");
        return format!("doc-standalone-{}", short_hash(&key));
    }

    let normalized = normalize_repo_url(repo_url);
    let repo_hash = short_hash(&normalized);

    if !path.is_empty() || !title.is_empty() {
        let key = format!("{path}/{title}");
        return format!("doc-{repo_hash}-{}", short_hash(&key));
    }

    match doc_type {
        Some(dt) if !dt.is_empty() => format!("doc-{repo_hash}-{dt}"),
        _ => format!("doc-{repo_hash}-default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_when_repo_url_empty() {
        let id = generate_document_id(None, "lib", "Overview", None);
        assert!(id.starts_with("doc-standalone-"));
    }

    #[test]
    fn same_inputs_produce_same_id() {
        let a = generate_document_id(Some("https://github.com/o/r"), "lib", "Overview", None);
        let b = generate_document_id(Some("https://github.com/o/r"), "lib", "Overview", None);
        assert_eq!(a, b);
    }

    #[test]
    fn trailing_slash_and_git_suffix_normalize_identically() {
        let a = generate_document_id(Some("https://github.com/o/r"), "lib", "Overview", None);
        let b = generate_document_id(Some("https://github.com/o/r.git"), "lib", "Overview", None);
        let c = generate_document_id(Some("https://github.com/o/r/"), "lib", "Overview", None);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn empty_path_and_title_fall_back_to_doc_type() {
        let with_type = generate_document_id(Some("https://github.com/o/r"), "", "", Some("overview"));
        assert!(with_type.ends_with("-overview"));
        let without_type = generate_document_id(Some("https://github.com/o/r"), "", "", None);
        assert!(without_type.ends_with("-default"));
    }

    #[test]
    fn different_titles_produce_different_ids() {
        let a = generate_document_id(Some("https://github.com/o/r"), "lib", "Overview", None);
        let b = generate_document_id(Some("https://github.com/o/r"), "lib", "API", None);
        assert_ne!(a, b);
    }
}
