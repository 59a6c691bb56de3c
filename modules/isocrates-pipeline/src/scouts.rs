//! Scout Pool (spec §4.4): tier-0 workers that each read a slice of the
//! repository and write back one markdown report. This module owns manifest
//! construction, scout-kind selection, bucketing, and report compression;
//! `run_scouts` is the only piece that actually talks to an LLM.

use std::collections::BTreeMap;
use std::time::Duration;

use ai_client::OpenRouter;
use isocrates_analyzer::RepoAnalysis;
use isocrates_common::{run_with_timeout, ModuleInfo, ScoutReport};
use tracing::warn;

pub const ALWAYS_RUN_TOPICS: &[&str] = &["structure", "architecture", "api"];
const INFRA_RATIO_THRESHOLD: f64 = 0.3;
const TESTS_RATIO_THRESHOLD: f64 = 1.0;
const MODULE_SCOUT_RATIO_THRESHOLD: f64 = 1.0;
const MODULE_SCOUT_MIN_MODULES: usize = 4;
const MIN_BUCKETS: usize = 4;

const SCOUT_CONVERSATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// One unit of scout work: a report key, the prompt to send, and whether a
/// transient failure should be retried once (topic scouts retry; module
/// scouts don't — a failed module scout just contributes a placeholder).
#[derive(Debug, Clone)]
pub struct ScoutTask {
    pub key: String,
    pub prompt: String,
    pub retryable: bool,
}

/// `repo tokens ÷ scout context window` — the single number that drives
/// topic selection, manifest sizing, and the prompt's constraints string.
pub fn budget_ratio(analysis: &RepoAnalysis, scout_context_window: u64) -> f64 {
    if scout_context_window == 0 {
        return f64::MAX;
    }
    analysis.token_estimate as f64 / scout_context_window as f64
}

/// Focus-marker substrings per topic scout, used both to annotate the
/// manifest and to prioritize truncation.
fn focus_substrings(topic: &str) -> &'static [&'static str] {
    match topic {
        "api" => &["route", "endpoint", "schema", "handler", "controller"],
        "infra" => &["docker", "deploy", "ci", "terraform", "k8s", "infra"],
        "tests" => &["test", "spec", "__tests__"],
        "architecture" => &["mod.rs", "lib.rs", "main.rs", "index"],
        _ => &[],
    }
}

fn topic_scout_keys(ratio: f64) -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = ALWAYS_RUN_TOPICS.to_vec();
    if ratio >= INFRA_RATIO_THRESHOLD {
        keys.push("infra");
    }
    if ratio >= TESTS_RATIO_THRESHOLD {
        keys.push("tests");
    }
    keys
}

fn manifest_line_budget(ratio: f64) -> usize {
    if ratio < 0.3 {
        500
    } else if ratio < 1.0 {
        300
    } else if ratio < 3.0 {
        200
    } else {
        150
    }
}

/// Build the annotated, size-bounded file manifest for one scout's prompt.
/// Truncation priority: focus files, entry points, largest remaining files,
/// one representative per top-level directory not yet covered.
pub fn build_manifest(analysis: &RepoAnalysis, topic: &str, ratio: f64) -> String {
    let focus = focus_substrings(topic);
    let budget = manifest_line_budget(ratio);

    let is_focus = |path: &str| focus.iter().any(|f| path.contains(f));
    let entry_points: std::collections::HashSet<&str> = analysis
        .module_map
        .values()
        .flat_map(|m| m.entry_points.iter().map(|s| s.as_str()))
        .collect();

    let mut ordered: Vec<(&str, u64, bool)> = Vec::new();
    for (path, size) in &analysis.file_manifest {
        ordered.push((path.as_str(), *size, is_focus(path)));
    }

    let mut focus_files: Vec<_> = ordered.iter().filter(|(_, _, f)| *f).collect();
    focus_files.sort_by(|a, b| a.0.cmp(b.0));

    let mut entry_files: Vec<_> = ordered
        .iter()
        .filter(|(p, _, f)| !*f && entry_points.contains(p))
        .collect();
    entry_files.sort_by(|a, b| a.0.cmp(b.0));

    let mut rest: Vec<_> = ordered
        .iter()
        .filter(|(p, _, f)| !*f && !entry_points.contains(*p))
        .collect();
    rest.sort_by(|a, b| b.1.cmp(&a.1)); // largest first

    let mut seen_dirs: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut picked: Vec<(&str, u64)> = Vec::new();

    for group in [focus_files, entry_files] {
        for (path, size, _) in group {
            if picked.len() >= budget {
                break;
            }
            picked.push((path, *size));
            if let Some(dir) = path.split('/').next() {
                seen_dirs.insert(dir.to_string());
            }
        }
    }
    for (path, size, _) in &rest {
        if picked.len() >= budget {
            break;
        }
        picked.push((path, *size));
        if let Some(dir) = path.split('/').next() {
            seen_dirs.insert(dir.to_string());
        }
    }
    // Ensure one representative per top-level directory not yet covered,
    // even once the main budget sort has filled up on a few big directories.
    if picked.len() < budget {
        for (path, size, _) in &rest {
            if picked.len() >= budget {
                break;
            }
            let dir = path.split('/').next().unwrap_or("").to_string();
            if seen_dirs.insert(dir) && !picked.iter().any(|(p, _)| p == path) {
                picked.push((path, *size));
            }
        }
    }

    let mut out = String::new();
    for (path, size) in picked {
        if is_focus(path) {
            out.push_str(&format!("{path} ({size} bytes) [focus]\n"));
        } else {
            out.push_str(&format!("{path} ({size} bytes)\n"));
        }
    }
    out
}

/// Stricter-with-scale constraints appended to every scout prompt.
pub fn constraints_string(ratio: f64) -> String {
    if ratio < 0.3 {
        "No special constraints: read freely within the manifest.".to_string()
    } else if ratio < 1.0 {
        "Prefer files under 20KB; read at most 40 files in full.".to_string()
    } else if ratio < 3.0 {
        "Prefer files under 10KB; read at most 20 files in full; skim the rest.".to_string()
    } else {
        "This repository is large relative to your context window. Read at most 10 files in \
         full, under 5KB each; rely on the manifest and module summaries for everything else."
            .to_string()
    }
}

fn topic_system_prompt(topic: &str) -> String {
    format!(
        "You are a {topic} scout. Investigate the repository slice described below and write a \
         structured markdown report capturing what you find. Be concrete: name files, types, and \
         entry points. Do not write documentation prose — this report feeds a later planning step."
    )
}

pub fn build_topic_scout_tasks(analysis: &RepoAnalysis, ratio: f64) -> Vec<ScoutTask> {
    topic_scout_keys(ratio)
        .into_iter()
        .map(|topic| {
            let manifest = build_manifest(analysis, topic, ratio);
            let prompt = format!(
                "{}\n\nFile manifest:\n{}\n\nConstraints: {}",
                topic_system_prompt(topic),
                manifest,
                constraints_string(ratio)
            );
            ScoutTask { key: topic.to_string(), prompt, retryable: true }
        })
        .collect()
}

/// Locality-aware bin-packing of modules into scout buckets: prefer the
/// bucket that already holds a module from the same parent directory unless
/// it's more than 2x the running average bucket size; otherwise smallest
/// bucket first.
pub fn bucket_modules(modules: &[&ModuleInfo], parallel_limit: usize) -> Vec<Vec<String>> {
    if modules.is_empty() {
        return Vec::new();
    }
    let bucket_count = (modules.len().min(3 * parallel_limit)).max(MIN_BUCKETS).min(modules.len().max(1));
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); bucket_count];
    let mut bucket_of_dir: BTreeMap<String, usize> = BTreeMap::new();

    for module in modules {
        let average = modules.len() as f64 / bucket_count as f64;
        let preferred = bucket_of_dir.get(&module.top_level_dir).copied();
        let target = match preferred {
            Some(idx) if (buckets[idx].len() as f64) <= average * 2.0 => idx,
            _ => buckets
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| b.len())
                .map(|(idx, _)| idx)
                .unwrap_or(0),
        };
        buckets[target].push(module.name.clone());
        bucket_of_dir.insert(module.top_level_dir.clone(), target);
    }

    buckets.retain(|b| !b.is_empty());
    buckets
}

pub fn build_module_scout_tasks(analysis: &RepoAnalysis, ratio: f64, parallel_limit: usize) -> Vec<ScoutTask> {
    if ratio <= MODULE_SCOUT_RATIO_THRESHOLD || analysis.module_count < MODULE_SCOUT_MIN_MODULES {
        return Vec::new();
    }
    let modules: Vec<&ModuleInfo> = analysis.module_map.values().collect();
    let buckets = bucket_modules(&modules, parallel_limit);

    buckets
        .into_iter()
        .enumerate()
        .map(|(idx, names)| {
            let summary = names.join(", ");
            let prompt = format!(
                "You are a module scout covering: {summary}.\n\nDescribe the responsibility, public \
                 surface, and key entry points of each module listed above. Be concrete and concise.\n\n\
                 Constraints: {}",
                constraints_string(ratio)
            );
            ScoutTask { key: format!("module_{idx}"), prompt, retryable: false }
        })
        .collect()
}

/// The diff scout: correlates a commit range against existing document
/// titles so regeneration can target only what actually changed.
pub fn build_diff_scout_task(log: &str, diff: &str, existing_doc_titles: &[String]) -> ScoutTask {
    let titles = existing_doc_titles.join(", ");
    let prompt = format!(
        "You are the diff scout. Below is the commit log and diff since the last documented \
         commit. Existing documents: {titles}.\n\nReport which documents are now outdated, which \
         are missing new facts introduced by this diff, and which describe features that were \
         removed.\n\nCommit log:\n{log}\n\nDiff:\n{diff}"
    );
    ScoutTask { key: "diff".to_string(), prompt, retryable: true }
}

/// Run one scout task end to end: independent LLM client, timeout +
/// circuit-breaker wrapped conversation, retry-once-with-backoff only when
/// `task.retryable`. A failure after retries becomes a placeholder report
/// rather than propagating, so the planner always sees every scheduled key.
async fn run_one_scout(task: ScoutTask, api_key: &str, model: &str, base_url: Option<&str>) -> ScoutReport {
    let mut client = OpenRouter::new(api_key, model);
    if let Some(url) = base_url {
        client = client.with_site_url(url);
    }

    let attempt = |client: OpenRouter, prompt: String| async move {
        run_with_timeout(
            &format!("scout:{model}"),
            SCOUT_CONVERSATION_TIMEOUT,
            client.complete(&prompt),
        )
        .await
    };

    let first = attempt(client.clone(), task.prompt.clone()).await;
    let result = match first {
        Ok(content) => Ok(content),
        Err(_) if task.retryable => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            attempt(client, task.prompt).await.map_err(|e| anyhow::anyhow!("{e}"))
        }
        Err(e) => Err(anyhow::anyhow!("{e}")),
    };

    match result {
        Ok(content) => ScoutReport { key: task.key, content },
        Err(e) => {
            warn!(key = %task.key, error = %e, "scout failed, using placeholder");
            ScoutReport::placeholder(task.key)
        }
    }
}

/// Run every task in `tasks`. Three or more tasks run as a bounded
/// concurrent pool; smaller batches run sequentially (matching the
/// spec's "sequential path for smaller batches").
pub async fn run_scouts(tasks: Vec<ScoutTask>, api_key: &str, model: &str, base_url: Option<&str>, parallel: usize) -> Vec<ScoutReport> {
    if tasks.len() < 3 {
        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            reports.push(run_one_scout(task, api_key, model, base_url).await);
        }
        return reports;
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for chunk in tasks.chunks(parallel.max(1)) {
        let futures = chunk
            .iter()
            .cloned()
            .map(|task| run_one_scout(task, api_key, model, base_url));
        reports.extend(futures::future::join_all(futures).await);
    }
    reports
}

// --- Compression (spec §4.4, last paragraph) --------------------------------

/// Convert a token budget into an approximate character budget (×4, the
/// same rough ratio the rest of the pipeline uses for prompt sizing).
fn chars_budget(context_window: u64) -> usize {
    ((context_window as f64) / 2.0 * 4.0) as usize
}

fn per_report_budget(context_window: u64, report_count: usize) -> usize {
    if report_count == 0 {
        return chars_budget(context_window);
    }
    chars_budget(context_window) / report_count
}

/// Compress any report over its fair share of the planner's context budget,
/// in up to 3 passes of ~3x reduction each, via `compress_fn` (an LLM call
/// with a progressively stricter prompt). Reports already within budget
/// pass through untouched.
pub async fn compress_reports<F, Fut>(
    reports: Vec<ScoutReport>,
    planner_context_window: u64,
    mut compress_fn: F,
) -> Vec<ScoutReport>
where
    F: FnMut(String, u32) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<String>>,
{
    let budget = per_report_budget(planner_context_window, reports.len());
    let mut out = Vec::with_capacity(reports.len());

    for report in reports {
        if report.content.len() <= budget {
            out.push(report);
            continue;
        }
        let mut content = report.content;
        for pass in 1..=3u32 {
            match compress_fn(content.clone(), pass).await {
                Ok(compressed) => {
                    content = compressed;
                    if content.len() <= budget {
                        break;
                    }
                }
                Err(e) => {
                    warn!(key = %report.key, pass, error = %e, "compression pass failed, keeping prior text");
                    break;
                }
            }
        }
        out.push(ScoutReport { key: report.key, content });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn module(name: &str, dir: &str) -> ModuleInfo {
        ModuleInfo {
            name: name.to_string(),
            top_level_dir: dir.to_string(),
            files: vec![(format!("{dir}/a.rs"), 100)],
            token_estimate: 100,
            imports_from: BTreeSet::new(),
            imported_by: BTreeSet::new(),
            entry_points: vec![],
            language_histogram: BTreeMap::new(),
        }
    }

    fn analysis_with(modules: Vec<ModuleInfo>, token_estimate: u64) -> RepoAnalysis {
        let module_count = modules.len();
        let file_manifest: Vec<(String, u64)> = modules.iter().flat_map(|m| m.files.clone()).collect();
        let mut module_map = BTreeMap::new();
        for m in modules {
            module_map.insert(m.name.clone(), m);
        }
        RepoAnalysis {
            file_manifest,
            token_estimate,
            file_count: module_count,
            total_bytes: 0,
            size_label: isocrates_common::SizeLabel::Small,
            top_dirs: vec![],
            module_map,
            module_count,
            crates: vec![],
        }
    }

    #[test]
    fn topic_scouts_always_include_core_three() {
        let keys = topic_scout_keys(0.0);
        assert_eq!(keys, vec!["structure", "architecture", "api"]);
    }

    #[test]
    fn infra_joins_at_threshold() {
        assert!(!topic_scout_keys(0.29).contains(&"infra"));
        assert!(topic_scout_keys(0.3).contains(&"infra"));
    }

    #[test]
    fn tests_joins_at_threshold() {
        assert!(!topic_scout_keys(0.99).contains(&"tests"));
        assert!(topic_scout_keys(1.0).contains(&"tests"));
    }

    #[test]
    fn module_scouts_require_ratio_and_module_count() {
        let analysis = analysis_with(vec![module("a", "x"), module("b", "y"), module("c", "z")], 10);
        assert!(build_module_scout_tasks(&analysis, 2.0, 4).is_empty(), "below min module count");

        let analysis = analysis_with(
            vec![module("a", "x"), module("b", "y"), module("c", "z"), module("d", "w")],
            10,
        );
        assert!(build_module_scout_tasks(&analysis, 0.5, 4).is_empty(), "below ratio threshold");
        assert!(!build_module_scout_tasks(&analysis, 1.5, 4).is_empty());
    }

    #[test]
    fn bucket_modules_keeps_same_directory_together_when_balanced() {
        let modules = vec![module("a", "core"), module("b", "core"), module("c", "edge")];
        let refs: Vec<&ModuleInfo> = modules.iter().collect();
        let buckets = bucket_modules(&refs, 4);
        let bucket_with_a = buckets.iter().position(|b| b.contains(&"a".to_string())).unwrap();
        let bucket_with_b = buckets.iter().position(|b| b.contains(&"b".to_string())).unwrap();
        assert_eq!(bucket_with_a, bucket_with_b);
    }

    #[test]
    fn bucket_count_has_a_floor_of_four() {
        let modules: Vec<ModuleInfo> = (0..4).map(|i| module(&format!("m{i}"), "dir")).collect();
        let refs: Vec<&ModuleInfo> = modules.iter().collect();
        let buckets = bucket_modules(&refs, 1);
        assert!(buckets.len() <= MIN_BUCKETS);
    }

    #[test]
    fn manifest_flags_focus_files() {
        let mut analysis = analysis_with(vec![module("api", "api")], 10);
        analysis.file_manifest = vec![("api/routes.rs".to_string(), 10), ("api/misc.rs".to_string(), 5)];
        let manifest = build_manifest(&analysis, "api", 0.1);
        assert!(manifest.contains("routes.rs"));
        assert!(manifest.lines().find(|l| l.contains("routes.rs")).unwrap().contains("[focus]"));
    }

    #[test]
    fn constraints_tighten_with_ratio() {
        assert!(constraints_string(0.1).contains("No special constraints"));
        assert!(constraints_string(5.0).contains("at most 10 files"));
    }

    #[tokio::test]
    async fn compress_reports_leaves_small_reports_untouched() {
        let reports = vec![ScoutReport { key: "structure".to_string(), content: "short".to_string() }];
        let out = compress_reports(reports, 1000, |content, _pass| async move { Ok(content) }).await;
        assert_eq!(out[0].content, "short");
    }

    #[tokio::test]
    async fn compress_reports_invokes_compress_fn_until_under_budget() {
        let long_content = "x".repeat(10_000);
        let reports = vec![ScoutReport { key: "structure".to_string(), content: long_content }];
        let out = compress_reports(reports, 40, |content, _pass| async move {
            Ok(content.chars().take(content.len() / 3).collect())
        })
        .await;
        assert!(out[0].content.len() < 10_000);
    }
}
