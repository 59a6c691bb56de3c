//! Data-model types shared across the analyzer, partitioner, pipeline, and
//! orchestrator crates. Document/Version/Dependency are owned exclusively by
//! the content store and live in `isocrates-store`; Generation Job is owned
//! exclusively by the job queue and lives in `isocrates-jobs`. Everything
//! here is pipeline-local state the Orchestrator assembles over one run.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Author of a document version. Drives the regeneration engine's decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    Ai,
    Human,
    System,
}

impl std::fmt::Display for AuthorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorType::Ai => write!(f, "ai"),
            AuthorType::Human => write!(f, "human"),
            AuthorType::System => write!(f, "system"),
        }
    }
}

/// Repo-size bucket derived from the analyzer's token estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeLabel {
    Small,
    Medium,
    Large,
}

impl SizeLabel {
    pub fn from_token_estimate(tokens: u64) -> Self {
        if tokens < 50_000 {
            SizeLabel::Small
        } else if tokens < 200_000 {
            SizeLabel::Medium
        } else {
            SizeLabel::Large
        }
    }
}

/// The planner's complexity label, distinct from `SizeLabel` because it
/// reflects the planner's own judgment (used by the deterministic fallback
/// plan), not a pure byte-count bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Small,
    Medium,
    Large,
}

/// A logical grouping of source files discovered by the Repo Analyzer.
/// Created once per pipeline run and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Path-like name, e.g. "crates/isocrates-store".
    pub name: String,
    pub top_level_dir: String,
    /// (relative path, size in bytes) for every file assigned to this module.
    pub files: Vec<(String, u64)>,
    pub token_estimate: u64,
    pub imports_from: BTreeSet<String>,
    pub imported_by: BTreeSet<String>,
    pub entry_points: Vec<String>,
    /// Language -> file count, for display and scout prompt construction.
    pub language_histogram: BTreeMap<String, u32>,
}

impl ModuleInfo {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }
}

/// A frozen partition of modules sized to fit the planner's context window.
/// A single-area result means "do not split" — callers never branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationArea {
    pub name: String,
    pub module_names: Vec<String>,
    pub files: Vec<(String, u64)>,
    pub token_estimate: u64,
}

/// One scout's output: an identifying key (e.g. "structure", "api",
/// "module_backend") plus the markdown report text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutReport {
    pub key: String,
    pub content: String,
}

impl ScoutReport {
    /// A short placeholder kept in place of a failed report so the planner
    /// always sees an entry for every key that was scheduled.
    pub fn placeholder(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            content: format!("(scout '{key}' failed to produce a report)"),
            key,
        }
    }
}

/// A rich-content directive within a blueprint section, e.g.
/// `"diagram:component-overview"`, `"table:api-endpoints"`, `"code:main.rs"`.
pub type RichContentDirective = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintSection {
    pub heading: String,
    pub directives: Vec<RichContentDirective>,
}

/// One page the planner wants written.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlueprintDocument {
    /// Loose taxonomy tag, e.g. "overview", "api", "config", "capabilities",
    /// "quickstart". Drives both hub/detail wave assignment and the
    /// scout-report relevance map.
    pub doc_type: String,
    pub title: String,
    /// First segment is the crate; remaining segments are folders. Defaults
    /// to `<crate>/<repo_name>` when missing from the planner's raw output.
    pub path: String,
    pub rationale: String,
    #[serde(default)]
    pub sections: Vec<BlueprintSectionSpec>,
    pub key_files_to_read: Vec<String>,
    pub wikilinks_out: Vec<String>,
    #[serde(default)]
    pub replaces_title: Option<String>,
}

/// Schema-friendly section shape as emitted by the planner LLM (directives
/// as flat strings rather than `RichContentDirective`'s type alias, which
/// schemars would otherwise inline identically — kept distinct so the
/// planner's raw JSON shape and the post-processed `BlueprintSection` don't
/// silently drift).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlueprintSectionSpec {
    pub heading: String,
    #[serde(default)]
    pub directives: Vec<String>,
}

impl From<BlueprintSectionSpec> for BlueprintSection {
    fn from(spec: BlueprintSectionSpec) -> Self {
        Self {
            heading: spec.heading,
            directives: spec.directives,
        }
    }
}

/// The planner's complete JSON output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Blueprint {
    pub repo_summary: String,
    pub complexity: ComplexityTag,
    pub documents: Vec<BlueprintDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTag {
    Small,
    Medium,
    Large,
}

impl From<ComplexityTag> for Complexity {
    fn from(tag: ComplexityTag) -> Self {
        match tag {
            ComplexityTag::Small => Complexity::Small,
            ComplexityTag::Medium => Complexity::Medium,
            ComplexityTag::Large => Complexity::Large,
        }
    }
}

/// Hub pages are authored after detail pages, since they reference them.
pub fn is_hub_page(doc_type: &str) -> bool {
    matches!(doc_type, "overview" | "capabilities" | "quickstart")
}

/// Normalize a name into a URL-safe slug: lowercase, strip non-alphanumeric
/// (keeping spaces), collapse whitespace, replace spaces with hyphens.
///
/// ```
/// assert_eq!(isocrates_common::slugify("Lake Street Church"), "lake-street-church");
/// assert_eq!(isocrates_common::slugify("  Multiple   Spaces  "), "multiple-spaces");
/// ```
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<&str>>().join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_label_boundaries() {
        assert_eq!(SizeLabel::from_token_estimate(49_999), SizeLabel::Small);
        assert_eq!(SizeLabel::from_token_estimate(50_000), SizeLabel::Medium);
        assert_eq!(SizeLabel::from_token_estimate(199_999), SizeLabel::Medium);
        assert_eq!(SizeLabel::from_token_estimate(200_000), SizeLabel::Large);
    }

    #[test]
    fn hub_pages_are_exactly_the_three_named_types() {
        assert!(is_hub_page("overview"));
        assert!(is_hub_page("capabilities"));
        assert!(is_hub_page("quickstart"));
        assert!(!is_hub_page("api"));
        assert!(!is_hub_page("config"));
    }
}
