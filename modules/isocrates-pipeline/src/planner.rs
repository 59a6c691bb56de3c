//! Planner (spec §4.5): turns the scout reports for one documentation area
//! into a `Blueprint` — the list of documents the Writer Pool will produce.

use std::time::Duration;

use ai_client::OpenRouter;
use isocrates_common::{
    run_with_timeout, Blueprint, BlueprintDocument, ComplexityTag, ScoutReport,
};
use tracing::warn;

const PLANNER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const MANDATORY_PAGES: &[&str] = &["Overview", "Getting Started", "Capabilities & User Stories"];

fn system_prompt() -> String {
    format!(
        "You are the documentation planner. Given scout reports describing a repository slice, \
         produce a blueprint: a short repository summary, a complexity label, and the list of \
         documents to write. Every blueprint must include at least these pages by title: {}. \
         Each document needs a doc_type, title, path (crate-relative, e.g. \
         'docs/api/routes.md'), a rationale, the source files it should read, and the other \
         document titles it should wikilink to.",
        MANDATORY_PAGES.join(", ")
    )
}

fn user_prompt(area_name: &str, reports: &[ScoutReport]) -> String {
    let mut prompt = format!("Documentation area: {area_name}\n\nScout reports:\n");
    for report in reports {
        prompt.push_str(&format!("\n## {}\n{}\n", report.key, report.content));
    }
    prompt
}

/// Strip a leading/trailing markdown code fence the LLM may have wrapped a
/// JSON body in, despite the structured-output contract asking it not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Give every document a path, default to `<crate>/<repo-derived-name>`, and
/// when an area produces exactly one document, flatten it out of its own
/// subfolder so a single-page area doesn't get a nested index-of-one.
fn post_process(mut blueprint: Blueprint, crate_prefix: &str, area_slug: &str) -> Blueprint {
    let single_doc = blueprint.documents.len() == 1;
    for doc in &mut blueprint.documents {
        if doc.path.trim().is_empty() {
            let slug = isocrates_common::slugify(&doc.title);
            doc.path = format!("{crate_prefix}/{area_slug}/{slug}.md");
        }
        if single_doc {
            if let Some(flattened) = flatten_single_doc_path(&doc.path, crate_prefix) {
                tracing::info!(old = %doc.path, new = %flattened, "flattening single-document area folder");
                doc.path = flattened;
            }
        }
    }
    blueprint
}

/// `"crate/area/page.md"` with exactly one segment between the crate prefix
/// and the filename becomes `"crate/page.md"`.
fn flatten_single_doc_path(path: &str, crate_prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(crate_prefix)?.trim_start_matches('/');
    let mut segments: Vec<&str> = rest.split('/').collect();
    if segments.len() <= 1 {
        return None;
    }
    let filename = segments.pop()?;
    Some(format!("{crate_prefix}/{filename}"))
}

/// Deterministic blueprint used when the planner LLM call fails outright —
/// always produces the mandatory pages plus one catch-all detail page per
/// scout report, so a writer pass always has something to act on.
pub fn fallback_plan(area_name: &str, reports: &[ScoutReport], complexity: ComplexityTag) -> Blueprint {
    let mut documents: Vec<BlueprintDocument> = MANDATORY_PAGES
        .iter()
        .map(|title| BlueprintDocument {
            doc_type: mandatory_doc_type(title),
            title: title.to_string(),
            path: String::new(),
            rationale: "mandatory page, synthesized without planner input".to_string(),
            sections: Vec::new(),
            key_files_to_read: Vec::new(),
            wikilinks_out: Vec::new(),
            replaces_title: None,
        })
        .collect();

    for report in reports {
        documents.push(BlueprintDocument {
            doc_type: report.key.clone(),
            title: format!("{} Notes", title_case(&report.key)),
            path: String::new(),
            rationale: format!("fallback page covering the '{}' scout report", report.key),
            sections: Vec::new(),
            key_files_to_read: Vec::new(),
            wikilinks_out: Vec::new(),
            replaces_title: None,
        });
    }

    Blueprint {
        repo_summary: format!("Fallback plan for area '{area_name}' (planner call failed)."),
        complexity,
        documents,
    }
}

fn mandatory_doc_type(title: &str) -> String {
    match title {
        "Overview" => "overview",
        "Getting Started" => "quickstart",
        "Capabilities & User Stories" => "capabilities",
        other => other,
    }
    .to_string()
}

fn title_case(key: &str) -> String {
    key.split(['_', '-'])
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which scout report keys are relevant background for a given document
/// type — handed to the writer so it isn't re-reading irrelevant reports.
pub fn relevant_scout_keys(doc_type: &str) -> Vec<&'static str> {
    match doc_type {
        "overview" | "capabilities" => vec!["structure", "architecture", "api"],
        "quickstart" => vec!["structure", "infra"],
        "api" => vec!["api", "architecture"],
        "config" => vec!["infra", "structure"],
        "tests" => vec!["tests", "architecture"],
        _ => vec!["structure", "architecture", "api", "infra", "tests"],
    }
}

/// Run the planner for one documentation area: a single structured LLM call,
/// post-processed, falling back to a deterministic plan on any failure.
pub async fn plan_area(
    area_name: &str,
    reports: &[ScoutReport],
    api_key: &str,
    model: &str,
    base_url: Option<&str>,
    crate_prefix: &str,
) -> Blueprint {
    let mut client = OpenRouter::new(api_key, model);
    if let Some(url) = base_url {
        client = client.with_site_url(url);
    }

    let result = run_with_timeout(
        &format!("planner:{model}"),
        PLANNER_TIMEOUT,
        client.extract::<Blueprint>(model, system_prompt(), user_prompt(area_name, reports)),
    )
    .await;

    match result {
        Ok(blueprint) => post_process(blueprint, crate_prefix, &isocrates_common::slugify(area_name)),
        Err(e) => {
            warn!(area = %area_name, error = %e, "planner call failed, using fallback plan");
            post_process(
                fallback_plan(area_name, reports, ComplexityTag::Medium),
                crate_prefix,
                &isocrates_common::slugify(area_name),
            )
        }
    }
}

/// Best-effort repair of a near-miss JSON blueprint body: strips code
/// fences and re-parses. Used when a non-schema-enforced completion path
/// (e.g. a provider that ignores `response_format`) hands back JSON with
/// surrounding prose or fencing.
pub fn repair_blueprint_json(raw: &str) -> anyhow::Result<Blueprint> {
    let cleaned = strip_code_fence(raw);
    serde_json::from_str(cleaned).map_err(|e| anyhow::anyhow!("could not parse blueprint JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(key: &str) -> ScoutReport {
        ScoutReport { key: key.to_string(), content: "some content".to_string() }
    }

    #[test]
    fn fallback_plan_always_includes_mandatory_pages() {
        let plan = fallback_plan("core", &[report("api")], ComplexityTag::Small);
        for title in MANDATORY_PAGES {
            assert!(plan.documents.iter().any(|d| &d.title == title), "missing {title}");
        }
    }

    #[test]
    fn fallback_plan_adds_one_page_per_report() {
        let plan = fallback_plan("core", &[report("api"), report("tests")], ComplexityTag::Small);
        assert!(plan.documents.iter().any(|d| d.doc_type == "api"));
        assert!(plan.documents.iter().any(|d| d.doc_type == "tests"));
    }

    #[test]
    fn post_process_defaults_missing_paths() {
        let plan = fallback_plan("core", &[], ComplexityTag::Small);
        let processed = post_process(plan, "my-crate", "core");
        for doc in &processed.documents {
            assert!(!doc.path.is_empty());
            assert!(doc.path.starts_with("my-crate/core/"));
        }
    }

    #[test]
    fn single_document_area_gets_flattened_out_of_its_subfolder() {
        let mut plan = fallback_plan("overview-only", &[], ComplexityTag::Small);
        plan.documents.truncate(1);
        let processed = post_process(plan, "my-crate", "overview-only");
        assert_eq!(processed.documents.len(), 1);
        let path = &processed.documents[0].path;
        assert!(path.starts_with("my-crate/"));
        assert!(!path.contains("overview-only"), "path was {path}");
    }

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
    }

    #[test]
    fn strip_code_fence_passes_through_plain_json() {
        let raw = "{\"a\": 1}";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
    }

    #[test]
    fn repair_blueprint_json_parses_fenced_body() {
        let raw = "```json\n{\"repo_summary\":\"x\",\"complexity\":\"small\",\"documents\":[]}\n```";
        let blueprint = repair_blueprint_json(raw).unwrap();
        assert_eq!(blueprint.repo_summary, "x");
    }

    #[test]
    fn relevant_scout_keys_cover_known_doc_types() {
        assert!(relevant_scout_keys("api").contains(&"api"));
        assert!(relevant_scout_keys("unknown_type").len() >= 3);
    }
}
