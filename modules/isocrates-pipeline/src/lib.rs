//! Documentation generation pipeline: git plumbing, the regeneration
//! decision engine, the scout pool, the planner, and the writer pool. The
//! Orchestrator drives these per documentation area; this crate owns no
//! cross-area state of its own.

pub mod git;
pub mod planner;
pub mod regeneration;
pub mod scouts;
pub mod writer;

use std::path::Path;

use isocrates_analyzer::RepoAnalysis;
use isocrates_common::{ScoutReport, TierEndpoint};
use isocrates_store::ContentStore;
use tracing::info;

pub use planner::MANDATORY_PAGES;
pub use regeneration::{should_regenerate, should_regenerate_targeted, RegenerationDecision, TargetedDecision};
pub use writer::WriteOutcome;

/// Model + endpoint bundle for one LLM tier, resolved from `Config` once up
/// front so the pipeline functions below don't each reach into the
/// environment themselves.
#[derive(Debug, Clone)]
pub struct TierCredentials {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl TierCredentials {
    pub fn resolve(model: &str, endpoint: &TierEndpoint, fallback: &TierEndpoint) -> anyhow::Result<Self> {
        let (base_url, api_key) = endpoint.resolve(fallback);
        let api_key = api_key
            .ok_or_else(|| anyhow::anyhow!("no API key configured for model '{model}'"))?
            .to_string();
        Ok(Self { model: model.to_string(), api_key, base_url: base_url.map(str::to_string) })
    }
}

/// Everything one area's scout+plan+write pass needs beyond the blueprint
/// itself.
pub struct AreaContext<'a> {
    pub repo_url: &'a str,
    pub repo_name: &'a str,
    pub repo_path: &'a Path,
    pub commit_sha: &'a str,
    pub crate_prefix: &'a str,
}

/// Run the scout pool, planner, and writer pool for one documentation area
/// end to end. Returns the area's write outcome; callers aggregate across
/// areas and hand the full generated-id set to orphan cleanup.
pub async fn process_area(
    store: &ContentStore,
    analysis: &RepoAnalysis,
    area_name: &str,
    scout_context_window: u64,
    planner_context_window: u64,
    scout: &TierCredentials,
    planner: &TierCredentials,
    writer: &TierCredentials,
    scout_parallel: usize,
    ctx: &AreaContext<'_>,
    diff_report: Option<&ScoutReport>,
) -> anyhow::Result<WriteOutcome> {
    let reports = if let Some(diff_report) = diff_report {
        info!(area = %area_name, "using diff scout report for regeneration");
        vec![diff_report.clone()]
    } else {
        let ratio = scouts::budget_ratio(analysis, scout_context_window);
        info!(area = %area_name, ratio, "starting scout pool");

        let mut tasks = scouts::build_topic_scout_tasks(analysis, ratio);
        tasks.extend(scouts::build_module_scout_tasks(analysis, ratio, scout_parallel));

        let reports = scouts::run_scouts(tasks, &scout.api_key, &scout.model, scout.base_url.as_deref(), scout_parallel).await;
        compress_with_llm(reports, planner_context_window, planner).await
    };

    let blueprint = planner::plan_area(
        area_name,
        &reports,
        &planner.api_key,
        &planner.model,
        planner.base_url.as_deref(),
        ctx.crate_prefix,
    )
    .await;

    let outcome = writer::run_writers(
        store,
        ctx.repo_url,
        ctx.repo_name,
        ctx.repo_path,
        ctx.commit_sha,
        &blueprint.repo_summary,
        blueprint.documents,
        &writer.api_key,
        &writer.model,
        writer.base_url.as_deref(),
        &reports,
    )
    .await;

    info!(
        area = %area_name,
        generated = outcome.generated_ids.len(),
        failed = outcome.failed_titles.len(),
        "finished area"
    );
    Ok(outcome)
}

/// Scout the commit range since the last recorded run instead of re-scouting
/// the whole repo. The orchestrator runs this once per regeneration pass and
/// hands its single report to `process_area` in place of a fresh scout pool.
pub async fn process_diff_scout(
    repo_path: &Path,
    from_sha: &str,
    existing_doc_titles: &[String],
    scout: &TierCredentials,
) -> anyhow::Result<ScoutReport> {
    let log = git::log_since(repo_path, from_sha).unwrap_or_default();
    let diff = git::diff_since(repo_path, from_sha).unwrap_or_default();
    let task = scouts::build_diff_scout_task(&log, &diff, existing_doc_titles);
    let reports = scouts::run_scouts(vec![task], &scout.api_key, &scout.model, scout.base_url.as_deref(), 1).await;
    reports
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("diff scout produced no report"))
}

async fn compress_with_llm(reports: Vec<ScoutReport>, planner_context_window: u64, planner: &TierCredentials) -> Vec<ScoutReport> {
    let client = ai_client::OpenRouter::new(planner.api_key.clone(), planner.model.clone());
    let client = match &planner.base_url {
        Some(url) => client.with_site_url(url.clone()),
        None => client,
    };
    scouts::compress_reports(reports, planner_context_window, |content, pass| {
        let client = client.clone();
        async move {
            let strictness = match pass {
                1 => "Summarize this report to roughly a third of its length, preserving every concrete fact, file name, and identifier.",
                2 => "Summarize this further to roughly a third of its current length. Keep only facts directly useful for planning documentation.",
                _ => "Reduce this to a terse list of names, endpoints, and configuration keys only. Drop all prose.",
            };
            client
                .chat_completion(
                    "You compress scout reports for a documentation planner without losing concrete facts.",
                    format!("{strictness}\n\n{content}"),
                )
                .await
        }
    })
    .await
}
