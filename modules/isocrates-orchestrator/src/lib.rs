//! Orchestrator (spec §4.11): drives one pipeline invocation end to end —
//! clone/pull, analyze, decide whether regeneration is needed, snapshot the
//! pre-run document set, partition into areas and run scout/plan/write per
//! area, clean up orphans, and report aggregate stats.

use std::collections::HashSet;
use std::path::PathBuf;

use isocrates_analyzer::{analyze_repository, partition_for_documentation};
use isocrates_common::Config;
use isocrates_pipeline::{AreaContext, TierCredentials};
use isocrates_store::ContentStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// Repo-relative workspace used for every clone. One directory per repo,
/// keyed by a hash of the URL so repeated runs reuse the same checkout.
fn workspace_dir(repo_url: &str) -> PathBuf {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(repo_url.as_bytes());
    let slug = hex::encode(digest)[..16].to_string();
    std::env::temp_dir().join("isocrates-workspaces").join(slug)
}

fn repo_name_from_url(repo_url: &str) -> String {
    repo_url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit('/')
        .next()
        .unwrap_or(repo_url)
        .to_string()
}

/// Aggregate outcome of one pipeline run, returned to the CLI/worker.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunStats {
    pub skipped: bool,
    pub areas_processed: usize,
    pub documents_generated: usize,
    pub documents_failed: usize,
    pub orphans_cleaned: usize,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.skipped {
            return write!(f, "skipped (no changes detected)");
        }
        write!(
            f,
            "{} area(s), {} generated, {} failed, {} orphan(s) cleaned",
            self.areas_processed, self.documents_generated, self.documents_failed, self.orphans_cleaned
        )
    }
}

/// Run the full pipeline for one repository. `crate_prefix` defaults to the
/// repo's own name when not given.
pub async fn run_pipeline(repo_url: &str, crate_prefix: Option<&str>) -> anyhow::Result<RunStats> {
    let config = Config::pipeline_from_env()?;
    config.log_redacted();

    let pool = PgPoolOptions::new().max_connections(5).connect(&config.database_url).await?;
    let store = ContentStore::new(pool);

    let repo_name = repo_name_from_url(repo_url);
    let crate_prefix = crate_prefix.unwrap_or(&repo_name).to_string();
    let repo_path = workspace_dir(repo_url);

    // 1. Clone or pull.
    info!(repo_url, path = %repo_path.display(), "cloning or pulling repository");
    isocrates_pipeline::git::clone_or_pull(repo_url, &repo_path)?;
    let commit_sha = isocrates_pipeline::git::head_commit_sha(&repo_path)?;

    // 2. Analyze.
    info!("analyzing repository");
    let analysis = analyze_repository(&repo_path);

    // 3. Decide regeneration mode. When documents already exist and the repo
    // hasn't moved since the last recorded commit, there's nothing to do.
    // Otherwise remember the prior commit as the diff context for the diff
    // scout, which replaces the full scout pool in step 5a.
    let existing_docs = store.list(None, Some(repo_url), 0, 10_000).await?;
    let mut diff_from_sha: Option<String> = None;
    if !existing_docs.is_empty() {
        if let Some(recorded_sha) = most_recent_recorded_sha(&store, &existing_docs).await? {
            if recorded_sha == commit_sha {
                info!(repo_url, "no changes since last recorded commit, skipping run");
                return Ok(RunStats { skipped: true, ..Default::default() });
            }
            diff_from_sha = Some(recorded_sha);
        }
    }

    // 4. Snapshot pre-run documents.
    let pre_run_ids: HashSet<String> = existing_docs.iter().map(|d| d.id.clone()).collect();

    // 5. Partition and run scout/plan/write per area.
    let scout_context_window: u64 = std::env::var("SCOUT_CONTEXT_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(128_000);
    let planner_context_window: u64 =
        std::env::var("PLANNER_CONTEXT_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(128_000);

    let areas = partition_for_documentation(&analysis, planner_context_window);
    info!(area_count = areas.len(), "partitioned repository into documentation areas");

    let scout = TierCredentials::resolve(&config.scout_model, &config.scout_endpoint, &config.llm_fallback)?;
    let planner = TierCredentials::resolve(&config.planner_model, &config.planner_endpoint, &config.llm_fallback)?;
    let writer = TierCredentials::resolve(&config.writer_model, &config.writer_endpoint, &config.llm_fallback)?;

    let ctx = AreaContext {
        repo_url,
        repo_name: &repo_name,
        repo_path: &repo_path,
        commit_sha: &commit_sha,
        crate_prefix: &crate_prefix,
    };

    // On regeneration, scout the commit range once and reuse the single
    // report for every area instead of a fresh scout pool per area (§4.11
    // step 5a: "the diff scout on regeneration").
    let diff_report = if let Some(from_sha) = &diff_from_sha {
        let existing_doc_titles: Vec<String> = existing_docs.iter().map(|d| d.title.clone()).collect();
        info!(repo_url, from_sha, "changes detected, running diff scout");
        Some(isocrates_pipeline::process_diff_scout(&repo_path, from_sha, &existing_doc_titles, &scout).await?)
    } else {
        None
    };

    let mut generated_ids: HashSet<String> = HashSet::new();
    let mut failed_ids: HashSet<String> = HashSet::new();

    for area in &areas {
        let area_analysis = analysis_for_area(&analysis, area);
        match isocrates_pipeline::process_area(
            &store,
            &area_analysis,
            &area.name,
            scout_context_window,
            planner_context_window,
            &scout,
            &planner,
            &writer,
            config.scout_parallel,
            &ctx,
            diff_report.as_ref(),
        )
        .await
        {
            Ok(outcome) => {
                generated_ids.extend(outcome.generated_ids);
                failed_ids.extend(outcome.failed_titles);
            }
            Err(e) => {
                warn!(area = %area.name, error = %e, "area failed entirely");
            }
        }
    }

    // 6. Cleanup orphans.
    let orphans_cleaned = store.cleanup_orphans(&pre_run_ids, &generated_ids, &failed_ids).await?;

    // 7. Aggregate stats.
    Ok(RunStats {
        skipped: false,
        areas_processed: areas.len(),
        documents_generated: generated_ids.len(),
        documents_failed: failed_ids.len(),
        orphans_cleaned,
    })
}

/// The recorded commit SHA of the most recently updated document for this
/// repo, used as the single "have things changed" signal for step 3. A
/// missing or unparseable field on every document means "unknown" — treated
/// as changed, so the pipeline regenerates rather than silently skips.
async fn most_recent_recorded_sha(
    store: &ContentStore,
    existing_docs: &[isocrates_store::Document],
) -> anyhow::Result<Option<String>> {
    let mut newest: Option<(chrono::DateTime<chrono::Utc>, String)> = None;
    for doc in existing_docs {
        let Some(version) = store.latest_version(&doc.id).await? else { continue };
        let Some(sha) = version.author_metadata.get("commit_sha").and_then(|v| v.as_str()) else { continue };
        if newest.as_ref().map_or(true, |(ts, _)| version.created_at > *ts) {
            newest = Some((version.created_at, sha.to_string()));
        }
    }
    Ok(newest.map(|(_, sha)| sha))
}

/// Build a `RepoAnalysis`-shaped view restricted to one area's modules, so
/// the scout pool only sees the files assigned to that area. File manifest
/// and module map are filtered; token estimate and size label are recomputed
/// from the filtered set.
fn analysis_for_area(
    full: &isocrates_analyzer::RepoAnalysis,
    area: &isocrates_common::DocumentationArea,
) -> isocrates_analyzer::RepoAnalysis {
    if area.module_names.len() == full.module_map.len() {
        return full.clone();
    }

    let module_map: std::collections::BTreeMap<_, _> = full
        .module_map
        .iter()
        .filter(|(name, _)| area.module_names.contains(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let file_set: HashSet<&str> = area.files.iter().map(|(p, _)| p.as_str()).collect();
    let file_manifest: Vec<(String, u64)> = full.file_manifest.iter().filter(|(p, _)| file_set.contains(p.as_str())).cloned().collect();
    let total_bytes: u64 = file_manifest.iter().map(|(_, s)| s).sum();

    isocrates_analyzer::RepoAnalysis {
        file_count: file_manifest.len(),
        token_estimate: area.token_estimate,
        total_bytes,
        size_label: isocrates_common::SizeLabel::from_token_estimate(area.token_estimate),
        top_dirs: full.top_dirs.clone(),
        module_count: module_map.len(),
        module_map,
        crates: full.crates.clone(),
        file_manifest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_from_url_strips_git_suffix_and_trailing_slash() {
        assert_eq!(repo_name_from_url("https://github.com/example/repo.git"), "repo");
        assert_eq!(repo_name_from_url("https://github.com/example/repo/"), "repo");
        assert_eq!(repo_name_from_url("https://github.com/example/repo"), "repo");
    }

    #[test]
    fn workspace_dir_is_stable_for_the_same_url() {
        let a = workspace_dir("https://github.com/example/repo");
        let b = workspace_dir("https://github.com/example/repo");
        assert_eq!(a, b);
    }

    #[test]
    fn workspace_dir_differs_across_urls() {
        let a = workspace_dir("https://github.com/example/one");
        let b = workspace_dir("https://github.com/example/two");
        assert_ne!(a, b);
    }

    #[test]
    fn run_stats_display_reports_skip_reason() {
        let stats = RunStats { skipped: true, ..Default::default() };
        assert_eq!(stats.to_string(), "skipped (no changes detected)");
    }

    #[test]
    fn run_stats_display_summarizes_a_completed_run() {
        let stats = RunStats { skipped: false, areas_processed: 2, documents_generated: 5, documents_failed: 1, orphans_cleaned: 3 };
        assert_eq!(stats.to_string(), "2 area(s), 5 generated, 1 failed, 3 orphan(s) cleaned");
    }
}
