//! Regeneration Decision Engine (spec §4.8): decides whether a document
//! needs to be rewritten this run, or whether the existing version (human
//! or AI authored) should be left alone.

use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, Utc};
use isocrates_common::AuthorType;
use isocrates_store::ContentStore;

use crate::git;

const HUMAN_PROTECTION_DAYS: i64 = 7;
const AI_FRESHNESS_DAYS: i64 = 30;
const SIGNIFICANT_COMMIT_COUNT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationDecision {
    pub regenerate: bool,
    pub reason: String,
}

impl RegenerationDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self { regenerate: false, reason: reason.into() }
    }
    fn regenerate(reason: impl Into<String>) -> Self {
        Self { regenerate: true, reason: reason.into() }
    }
}

fn recorded_commit_sha(metadata: &serde_json::Value) -> Option<&str> {
    metadata.get("commit_sha").and_then(|v| v.as_str())
}

/// Coarse-grained policy for a whole document (spec §4.8 rules 1-7).
/// `repo_path` is the local checkout used to measure commit distance
/// between the version's recorded SHA and `current_commit_sha`'s HEAD —
/// the two-argument contract in the spec assumes that checkout is
/// reachable from wherever the engine runs, which in this workspace means
/// passing its path explicitly rather than relying on process cwd.
pub async fn should_regenerate(
    store: &ContentStore,
    doc_id: &str,
    current_commit_sha: &str,
    repo_path: &Path,
) -> anyhow::Result<RegenerationDecision> {
    let Some(doc) = store.get(doc_id).await? else {
        return Ok(RegenerationDecision::regenerate("no existing document"));
    };
    if doc.content.trim().is_empty() {
        return Ok(RegenerationDecision::regenerate("existing document has empty content"));
    }
    let Some(version) = store.latest_version(doc_id).await? else {
        return Ok(RegenerationDecision::regenerate("no version history"));
    };

    let age = Utc::now() - version.created_at;
    let recorded_sha = recorded_commit_sha(&version.author_metadata);

    let repo_unchanged = |sha: &str| sha == current_commit_sha;
    let commit_distance = |sha: &str| -> u32 {
        if repo_unchanged(sha) {
            return 0;
        }
        git::commits_since(repo_path, sha).unwrap_or(SIGNIFICANT_COMMIT_COUNT)
    };

    match version.author_type {
        AuthorType::Human => {
            if age < Duration::days(HUMAN_PROTECTION_DAYS) {
                return Ok(RegenerationDecision::skip("human edit younger than 7 days"));
            }
            match recorded_sha {
                Some(sha) if repo_unchanged(sha) => {
                    Ok(RegenerationDecision::skip("human edit, repo unchanged since recorded commit"))
                }
                Some(sha) if commit_distance(sha) < SIGNIFICANT_COMMIT_COUNT => {
                    Ok(RegenerationDecision::skip("human edit, minor change since recorded commit"))
                }
                Some(_) => Ok(RegenerationDecision::regenerate(
                    "human edit, significant change since recorded commit",
                )),
                None => Ok(RegenerationDecision::regenerate("human edit, recorded commit unknown")),
            }
        }
        AuthorType::Ai | AuthorType::System => {
            if age < Duration::days(AI_FRESHNESS_DAYS) && recorded_sha.is_some_and(repo_unchanged) {
                return Ok(RegenerationDecision::skip("ai-authored, repo unchanged, under 30 days old"));
            }
            Ok(RegenerationDecision::regenerate("ai-authored, stale or repo changed"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedDecision {
    pub regenerate: bool,
    pub reason: String,
    pub changed_files: Vec<String>,
}

fn recorded_source_hashes(metadata: &serde_json::Value) -> Option<HashMap<String, String>> {
    let raw = metadata.get("source_hashes")?.as_object()?;
    Some(
        raw.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

/// Fine-grained decision using per-file content hashes recorded on the
/// document's latest version, when present.
pub async fn should_regenerate_targeted(
    store: &ContentStore,
    doc_id: &str,
    current_source_hashes: &HashMap<String, String>,
) -> anyhow::Result<TargetedDecision> {
    let Some(version) = store.latest_version(doc_id).await? else {
        return Ok(TargetedDecision {
            regenerate: true,
            reason: "legacy".to_string(),
            changed_files: current_source_hashes.keys().cloned().collect(),
        });
    };

    let Some(recorded) = recorded_source_hashes(&version.author_metadata) else {
        return Ok(TargetedDecision {
            regenerate: true,
            reason: "legacy".to_string(),
            changed_files: current_source_hashes.keys().cloned().collect(),
        });
    };

    let changed: Vec<String> = current_source_hashes
        .iter()
        .filter(|(path, hash)| recorded.get(*path) != Some(*hash))
        .map(|(path, _)| path.clone())
        .collect();

    if changed.is_empty() {
        Ok(TargetedDecision { regenerate: false, reason: "no tracked source file changed".to_string(), changed_files: changed })
    } else {
        Ok(TargetedDecision { regenerate: true, reason: "tracked source files changed".to_string(), changed_files: changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_commit_sha_reads_metadata_field() {
        let meta = serde_json::json!({"commit_sha": "abc123"});
        assert_eq!(recorded_commit_sha(&meta), Some("abc123"));
    }

    #[test]
    fn recorded_commit_sha_missing_is_none() {
        assert_eq!(recorded_commit_sha(&serde_json::json!({})), None);
    }

    #[test]
    fn targeted_decision_flags_only_changed_files() {
        let recorded = serde_json::json!({
            "source_hashes": {"a.rs": "hash-a", "b.rs": "hash-b"}
        });
        let stored = recorded_source_hashes(&recorded).unwrap();
        assert_eq!(stored.get("a.rs").unwrap(), "hash-a");

        let mut current = HashMap::new();
        current.insert("a.rs".to_string(), "hash-a".to_string());
        current.insert("b.rs".to_string(), "hash-b-changed".to_string());

        let changed: Vec<&String> = current
            .iter()
            .filter(|(path, hash)| stored.get(path.as_str()) != Some(*hash))
            .map(|(path, _)| path)
            .collect();
        assert_eq!(changed, vec!["b.rs"]);
    }
}
