//! Writer Pool (spec §4.6): takes a blueprint's documents and produces the
//! actual markdown, in two waves (detail pages first, then hub pages that
//! wikilink to them), post-processing and upserting each into the store.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use ai_client::OpenRouter;
use isocrates_common::{is_hub_page, run_with_timeout, AuthorType, BlueprintDocument, ScoutReport};
use isocrates_store::{generate_document_id, ContentStore, DocumentWrite};
use serde_json::json;
use tracing::{info, warn};

use crate::regeneration::should_regenerate;

const WRITER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Outcome of one writer pool run over a blueprint's documents.
#[derive(Debug, Default, Clone)]
pub struct WriteOutcome {
    pub generated_ids: Vec<String>,
    pub failed_titles: Vec<String>,
}

fn writer_system_prompt() -> &'static str {
    "You are a technical writer producing one markdown document for a generated documentation \
     site. Use [[Wikilink]] syntax to reference other documents by title. Do not wrap your \
     response in a code fence. Write only the document body — no surrounding commentary."
}

fn writer_user_prompt(doc: &BlueprintDocument, reports: &[&ScoutReport], repo_summary: &str) -> String {
    let mut prompt = format!(
        "Repository summary: {repo_summary}\n\nDocument to write:\ntitle: {}\ntype: {}\nrationale: {}\n",
        doc.title, doc.doc_type, doc.rationale
    );
    if !doc.key_files_to_read.is_empty() {
        prompt.push_str(&format!("\nKey files: {}\n", doc.key_files_to_read.join(", ")));
    }
    if !doc.wikilinks_out.is_empty() {
        prompt.push_str(&format!("\nLink to these documents where relevant: {}\n", doc.wikilinks_out.join(", ")));
    }
    if !doc.sections.is_empty() {
        prompt.push_str("\nSections to include:\n");
        for section in &doc.sections {
            prompt.push_str(&format!("- {} ({})\n", section.heading, section.directives.join(", ")));
        }
    }
    prompt.push_str("\nRelevant scout reports:\n");
    for report in reports {
        prompt.push_str(&format!("\n## {}\n{}\n", report.key, report.content));
    }
    prompt
}

/// Strip `[[Target]]`/`[[Target|display]]` wikilinks whose target isn't in
/// `valid_titles`, keeping the display text as plain prose — the document
/// is still useful even if a referenced page never got written.
pub fn sanitize_wikilinks(markdown: &str, valid_titles: &HashSet<String>) -> String {
    let re = regex::Regex::new(r"\[\[([^\]|]+)(\|([^\]]+))?\]\]").unwrap();
    re.replace_all(markdown, |caps: &regex::Captures| {
        let target = caps[1].trim();
        let display = caps.get(3).map(|m| m.as_str()).unwrap_or(target);
        if valid_titles.contains(target) {
            caps[0].to_string()
        } else {
            display.to_string()
        }
    })
    .into_owned()
}

/// Count of fenced ```mermaid blocks in a document, for the best-effort
/// validation step below.
fn mermaid_blocks(markdown: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = markdown;
    while let Some(start) = rest.find("```mermaid") {
        let after_fence = &rest[start + "```mermaid".len()..];
        if let Some(end) = after_fence.find("```") {
            blocks.push(after_fence[..end].trim());
            rest = &after_fence[end + 3..];
        } else {
            break;
        }
    }
    blocks
}

/// Best-effort mermaid syntax check via an external `mmdc` (mermaid-cli)
/// subprocess. Returns `Ok(true)` when every block parses, `Ok(false)` when
/// at least one doesn't, and `Err` only when `mmdc` itself isn't available —
/// callers treat that as "skip validation", not "failed".
pub fn validate_mermaid_blocks(markdown: &str) -> Result<bool, MermaidUnavailable> {
    let blocks = mermaid_blocks(markdown);
    if blocks.is_empty() {
        return Ok(true);
    }
    let probe = std::process::Command::new("mmdc").arg("--version").output();
    if probe.is_err() {
        return Err(MermaidUnavailable);
    }
    for block in blocks {
        let tmp = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(_) => return Err(MermaidUnavailable),
        };
        if std::fs::write(tmp.path(), block).is_err() {
            return Err(MermaidUnavailable);
        }
        let output = std::process::Command::new("mmdc")
            .args(["-i", &tmp.path().to_string_lossy(), "-o", "/dev/null"])
            .output();
        match output {
            Ok(out) if !out.status.success() => return Ok(false),
            Ok(_) => continue,
            Err(_) => return Err(MermaidUnavailable),
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, Copy)]
pub struct MermaidUnavailable;

/// Run one document through the LLM, returning its markdown body.
async fn write_one(
    doc: &BlueprintDocument,
    reports: &[&ScoutReport],
    repo_summary: &str,
    api_key: &str,
    model: &str,
    base_url: Option<&str>,
) -> anyhow::Result<String> {
    let mut client = OpenRouter::new(api_key, model);
    if let Some(url) = base_url {
        client = client.with_site_url(url);
    }
    let user_prompt = writer_user_prompt(doc, reports, repo_summary);

    run_with_timeout(
        &format!("writer:{model}"),
        WRITER_TIMEOUT,
        client.chat_completion(writer_system_prompt(), user_prompt),
    )
    .await
    .map_err(|e| anyhow::anyhow!("{e}"))
}

/// Repair a markdown body the LLM wrapped in a stray code fence.
fn strip_markdown_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```markdown") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Pick the scout reports relevant to one document's doc_type.
fn select_reports<'a>(reports: &'a [ScoutReport], doc_type: &str) -> Vec<&'a ScoutReport> {
    let keys = crate::planner::relevant_scout_keys(doc_type);
    let selected: Vec<&ScoutReport> = reports.iter().filter(|r| keys.contains(&r.key.as_str())).collect();
    if selected.is_empty() {
        reports.iter().collect()
    } else {
        selected
    }
}

/// Write every document in `documents`, detail pages first then hub pages,
/// post-process each, and upsert into `store`. `crate_prefix` and
/// `commit_sha`/`repo_path` feed the provenance metadata convention shared
/// with the regeneration engine.
pub async fn run_writers(
    store: &ContentStore,
    repo_url: &str,
    repo_name: &str,
    repo_path: &Path,
    commit_sha: &str,
    repo_summary: &str,
    documents: Vec<BlueprintDocument>,
    api_key: &str,
    model: &str,
    base_url: Option<&str>,
    all_reports: &[ScoutReport],
) -> WriteOutcome {
    let (hub, detail): (Vec<_>, Vec<_>) = documents.into_iter().partition(|d| is_hub_page(&d.doc_type));
    let valid_titles: HashSet<String> = detail.iter().chain(hub.iter()).map(|d| d.title.clone()).collect();

    let mut outcome = WriteOutcome::default();

    for wave in [detail, hub] {
        for doc in wave {
            let doc_id = generate_document_id(Some(repo_url), &doc.path, &doc.title, Some(&doc.doc_type));
            match should_regenerate(store, &doc_id, commit_sha, repo_path).await {
                Ok(decision) if !decision.regenerate => {
                    info!(title = %doc.title, reason = %decision.reason, "regeneration engine left document in place");
                    outcome.generated_ids.push(doc_id);
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!(title = %doc.title, error = %e, "regeneration decision failed, writing anyway"),
            }

            let reports = select_reports(all_reports, &doc.doc_type);
            match write_one(&doc, &reports, repo_summary, api_key, model, base_url).await {
                Ok(raw) => {
                    let markdown = strip_markdown_fence(&raw);
                    let markdown = sanitize_wikilinks(&markdown, &valid_titles);
                    let markdown = match validate_mermaid_blocks(&markdown) {
                        Ok(true) => markdown,
                        Ok(false) => {
                            warn!(title = %doc.title, "mermaid block failed validation, attempting one repair pass");
                            match write_one(&doc, &reports, repo_summary, api_key, model, base_url).await {
                                Ok(retry_raw) => sanitize_wikilinks(&strip_markdown_fence(&retry_raw), &valid_titles),
                                Err(_) => markdown,
                            }
                        }
                        Err(MermaidUnavailable) => markdown,
                    };

                    let source_files = isocrates_analyzer::extract_source_references(&markdown, &doc.key_files_to_read);
                    let source_hashes = isocrates_analyzer::compute_source_hashes(repo_path, &source_files);

                    let write = DocumentWrite {
                        repo_url: Some(repo_url.to_string()),
                        repo_name: Some(repo_name.to_string()),
                        doc_type: Some(doc.doc_type.clone()),
                        path: doc.path.clone(),
                        title: doc.title.clone(),
                        content: markdown,
                        description: Some(doc.rationale.clone()),
                        keywords: Vec::new(),
                        author_type: AuthorType::Ai,
                        author_metadata: json!({
                            "commit_sha": commit_sha,
                            "source_hashes": source_hashes,
                        }),
                    };

                    match store.create_or_update(write).await {
                        Ok((document, _created)) => outcome.generated_ids.push(document.id),
                        Err(e) => {
                            warn!(title = %doc.title, error = %e, "failed to store generated document");
                            outcome.failed_titles.push(doc.title.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(title = %doc.title, error = %e, "writer failed to produce content");
                    outcome.failed_titles.push(doc.title.clone());
                }
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_wikilinks_keeps_valid_targets() {
        let valid: HashSet<String> = ["Overview".to_string()].into_iter().collect();
        let out = sanitize_wikilinks("See [[Overview]] for more.", &valid);
        assert_eq!(out, "See [[Overview]] for more.");
    }

    #[test]
    fn sanitize_wikilinks_flattens_unknown_targets_to_display_text() {
        let valid: HashSet<String> = HashSet::new();
        let out = sanitize_wikilinks("See [[Missing Page|the missing page]] for more.", &valid);
        assert_eq!(out, "See the missing page for more.");
    }

    #[test]
    fn sanitize_wikilinks_flattens_unknown_target_without_display_text() {
        let valid: HashSet<String> = HashSet::new();
        let out = sanitize_wikilinks("See [[Missing Page]] for more.", &valid);
        assert_eq!(out, "See Missing Page for more.");
    }

    #[test]
    fn mermaid_blocks_extracts_fenced_content() {
        let markdown = "intro\n```mermaid\ngraph TD; A-->B;\n```\noutro";
        let blocks = mermaid_blocks(markdown);
        assert_eq!(blocks, vec!["graph TD; A-->B;"]);
    }

    #[test]
    fn mermaid_blocks_is_empty_when_no_fences_present() {
        assert!(mermaid_blocks("just prose").is_empty());
    }

    #[test]
    fn strip_markdown_fence_removes_wrapping_fence() {
        assert_eq!(strip_markdown_fence("```markdown\n# Title\n```"), "# Title");
        assert_eq!(strip_markdown_fence("# Title"), "# Title");
    }

    #[test]
    fn select_reports_falls_back_to_all_when_none_match() {
        let reports = vec![ScoutReport { key: "structure".to_string(), content: "x".to_string() }];
        let selected = select_reports(&reports, "totally_unrelated_type");
        assert_eq!(selected.len(), 1);
    }
}
