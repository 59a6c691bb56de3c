//! `ContentStore` — the sole owner of Documents, Versions, and Dependencies
//! (spec §4.9). Every invariant (ID generation, optimistic locking,
//! dependency derivation, cycle rule, soft-delete, orphan cleanup safety)
//! lives here; callers never coordinate these three tables themselves.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use isocrates_common::{AuthorType, Error};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::ids::generate_document_id;
use crate::types::{generate_content_preview, Dependency, Document, DocumentUpdate, DocumentWrite, Version};
use crate::wikilinks::{extract_wikilink_targets, rewrite_wikilink_target, would_create_cycle};

const HUMAN_PROTECTION_DAYS: i64 = 7;
const DEFAULT_TRASH_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ContentStore {
    pool: PgPool,
}

impl ContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -- Upsert (§4.9.2) -----------------------------------------------

    pub async fn create_or_update(&self, write: DocumentWrite) -> anyhow::Result<(Document, bool)> {
        let id = generate_document_id(
            write.repo_url.as_deref(),
            &write.path,
            &write.title,
            write.doc_type.as_deref(),
        );

        let mut tx = self.pool.begin().await?;
        let existing = fetch_including_deleted(&mut tx, &id).await?;

        let document = if let Some(existing) = existing {
            let update = DocumentUpdate {
                content: write.content.clone(),
                description: write.description.clone(),
                version: None,
                author_type: write.author_type,
                author_metadata: write.author_metadata.clone(),
            };
            let doc = apply_update(&mut tx, &existing.id, update).await?;
            insert_version(&mut tx, &doc.id, &doc.content, write.author_type, &write.author_metadata).await?;
            refresh_outgoing_dependencies(&mut tx, &doc.id, &doc.content).await?;
            tx.commit().await?;
            return Ok((doc, false));
        } else {
            let preview = generate_content_preview(&write.content);
            let now = Utc::now();
            sqlx::query(
                r#"
                INSERT INTO documents
                    (id, repo_url, repo_name, doc_type, path, title, content, content_preview,
                     description, keywords, version, generation_count, created_at, updated_at, deleted_at, embedding_model)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, 1, $11, $11, NULL, NULL)
                "#,
            )
            .bind(&id)
            .bind(&write.repo_url)
            .bind(&write.repo_name)
            .bind(&write.doc_type)
            .bind(&write.path)
            .bind(&write.title)
            .bind(&write.content)
            .bind(&preview)
            .bind(&write.description)
            .bind(&write.keywords)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            fetch_active(&mut tx, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("document {id} vanished immediately after insert"))?
        };

        insert_version(&mut tx, &document.id, &document.content, write.author_type, &write.author_metadata).await?;
        refresh_outgoing_dependencies(&mut tx, &document.id, &document.content).await?;
        refresh_incoming_dependencies(&mut tx, &document.title).await?;

        tx.commit().await?;
        Ok((document, true))
    }

    // -- Update & optimistic locking (§4.9.3) ---------------------------

    pub async fn update(&self, doc_id: &str, update: DocumentUpdate) -> anyhow::Result<Document> {
        let mut tx = self.pool.begin().await?;
        let author_type = update.author_type;
        let author_metadata = update.author_metadata.clone();
        let content = update.content.clone();

        let document = apply_update(&mut tx, doc_id, update).await?;
        insert_version(&mut tx, &document.id, &content, author_type, &author_metadata).await?;
        refresh_outgoing_dependencies(&mut tx, &document.id, &document.content).await?;

        tx.commit().await?;
        Ok(document)
    }

    // -- Reads -----------------------------------------------------------

    pub async fn get(&self, doc_id: &str) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(&format!("{SELECT_DOCUMENT} WHERE deleted_at IS NULL AND id = $1"))
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_including_deleted(&self, doc_id: &str) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(&format!("{SELECT_DOCUMENT} WHERE id = $1"))
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_by_repo_and_type(&self, repo_url: &str, doc_type: &str) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(&format!(
            "{SELECT_DOCUMENT} WHERE deleted_at IS NULL AND repo_url = $1 AND doc_type = $2"
        ))
        .bind(repo_url)
        .bind(doc_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(
        &self,
        path_prefix: Option<&str>,
        repo_url: Option<&str>,
        skip: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<Document>> {
        let mut sql = format!("{SELECT_DOCUMENT} WHERE deleted_at IS NULL");
        let mut clauses = Vec::new();
        if let Some(p) = path_prefix {
            clauses.push(format!("(path = '{}' OR path LIKE '{}/%')", escape(p), escape(p)));
        }
        if let Some(r) = repo_url {
            clauses.push(format!("repo_url = '{}'", escape(r)));
        }
        for c in clauses {
            sql.push_str(" AND ");
            sql.push_str(&c);
        }
        sql.push_str(" ORDER BY updated_at DESC OFFSET $1 LIMIT $2");

        let rows = sqlx::query_as::<_, Document>(&sql)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_tracked_repo_urls(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT repo_url FROM documents WHERE deleted_at IS NULL AND repo_url IS NOT NULL AND repo_url != ''",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    pub async fn get_recent(&self, limit: i64) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(&format!(
            "{SELECT_DOCUMENT} WHERE deleted_at IS NULL ORDER BY updated_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn dependencies_outgoing(&self, doc_id: &str) -> anyhow::Result<Vec<Dependency>> {
        let rows = sqlx::query_as::<_, Dependency>(
            "SELECT from_doc_id, to_doc_id, link_type, link_text, section FROM dependencies WHERE from_doc_id = $1",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn dependencies_incoming(&self, doc_id: &str) -> anyhow::Result<Vec<Dependency>> {
        let rows = sqlx::query_as::<_, Dependency>(
            "SELECT from_doc_id, to_doc_id, link_type, link_text, section FROM dependencies WHERE to_doc_id = $1",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The most recent version of a document, or `None` if it has no
    /// version history yet. Drives the regeneration decision engine (§4.8).
    pub async fn latest_version(&self, doc_id: &str) -> anyhow::Result<Option<Version>> {
        let row: Option<(String, String, String, String, String, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, doc_id, content, content_hash, author_type, author_metadata, created_at \
             FROM document_versions WHERE doc_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, doc_id, content, content_hash, author_type, author_metadata, created_at)| Version {
            id,
            doc_id,
            content,
            content_hash,
            author_type: parse_author_type(&author_type),
            author_metadata,
            created_at,
        }))
    }

    /// Full version history for a document, newest first.
    pub async fn versions(&self, doc_id: &str) -> anyhow::Result<Vec<Version>> {
        let rows: Vec<(String, String, String, String, String, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, doc_id, content, content_hash, author_type, author_metadata, created_at \
             FROM document_versions WHERE doc_id = $1 ORDER BY created_at DESC",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, doc_id, content, content_hash, author_type, author_metadata, created_at)| Version {
                id,
                doc_id,
                content,
                content_hash,
                author_type: parse_author_type(&author_type),
                author_metadata,
                created_at,
            })
            .collect())
    }

    /// Replace a document's keyword set without creating a new content
    /// version — keywords are metadata, not document content.
    pub async fn update_keywords(&self, doc_id: &str, keywords: &[String]) -> anyhow::Result<Document> {
        let result = sqlx::query("UPDATE documents SET keywords = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND deleted_at IS NULL")
            .bind(keywords)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(doc_id.to_string()).into());
        }
        self.get(doc_id).await?.ok_or_else(|| Error::NotFound(doc_id.to_string()).into())
    }

    // -- Soft-delete lifecycle (§4.9.7) ----------------------------------

    pub async fn delete(&self, doc_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET deleted_at = CURRENT_TIMESTAMP WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(doc_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Idempotent: already deleted or never existed both return based on existence.
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM documents WHERE id = $1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exists.is_some())
    }

    pub async fn restore(&self, doc_id: &str) -> anyhow::Result<Document> {
        let row = sqlx::query_as::<_, Document>(&format!("{SELECT_DOCUMENT} WHERE id = $1"))
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(doc) = row else {
            return Err(Error::NotFound(doc_id.to_string()).into());
        };
        if doc.deleted_at.is_some() {
            sqlx::query("UPDATE documents SET deleted_at = NULL WHERE id = $1")
                .bind(doc_id)
                .execute(&self.pool)
                .await?;
        }
        self.get_including_deleted(doc_id)
            .await?
            .ok_or_else(|| Error::NotFound(doc_id.to_string()).into())
    }

    pub async fn permanent_delete(&self, doc_id: &str) -> anyhow::Result<bool> {
        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    pub async fn get_deleted(&self, skip: i64, limit: i64) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(&format!(
            "{SELECT_DOCUMENT} WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC OFFSET $1 LIMIT $2"
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn purge_expired(&self, days: Option<i64>) -> anyhow::Result<u64> {
        let days = days.unwrap_or(DEFAULT_TRASH_RETENTION_DAYS);
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM documents WHERE deleted_at IS NOT NULL AND deleted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // -- Move & cross-document wikilink rewrite (§4.9.6) -----------------

    pub async fn move_document(&self, doc_id: &str, new_path: &str) -> anyhow::Result<Document> {
        let mut tx = self.pool.begin().await?;
        let doc = fetch_active(&mut tx, doc_id)
            .await?
            .ok_or_else(|| Error::NotFound(doc_id.to_string()))?;

        let old_crate = doc.path.split('/').next().unwrap_or("").to_string();
        let new_crate = new_path.split('/').next().unwrap_or("").to_string();

        sqlx::query("UPDATE documents SET path = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
            .bind(new_path)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        if old_crate != new_crate && !old_crate.is_empty() {
            let candidates: Vec<Document> = sqlx::query_as::<_, Document>(&format!(
                "{SELECT_DOCUMENT} WHERE deleted_at IS NULL AND id != $1 AND content LIKE $2"
            ))
            .bind(doc_id)
            .bind(format!("%[[{old_crate}%"))
            .fetch_all(&mut *tx)
            .await?;

            for candidate in candidates {
                if let Some(rewritten) = rewrite_wikilink_target(&candidate.content, &old_crate, &new_crate) {
                    let metadata = serde_json::json!({ "reason": "wikilink_update", "moved_doc": doc_id });
                    let update = DocumentUpdate {
                        content: rewritten,
                        description: None,
                        version: None,
                        author_type: AuthorType::System,
                        author_metadata: metadata.clone(),
                    };
                    let updated = apply_update(&mut tx, &candidate.id, update).await?;
                    insert_version(&mut tx, &updated.id, &updated.content, AuthorType::System, &metadata).await?;
                    refresh_outgoing_dependencies(&mut tx, &updated.id, &updated.content).await?;
                }
            }
        }

        let moved = fetch_active(&mut tx, doc_id)
            .await?
            .ok_or_else(|| Error::NotFound(doc_id.to_string()))?;
        tx.commit().await?;
        Ok(moved)
    }

    // -- Cycle rule (§4.9.5), exposed for callers outside a write path ---

    pub async fn would_create_cycle(&self, from_doc_id: &str, to_doc_id: &str) -> anyhow::Result<bool> {
        let edges = self.all_dependency_edges().await?;
        Ok(would_create_cycle(&edges, from_doc_id, to_doc_id))
    }

    async fn all_dependency_edges(&self) -> anyhow::Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT from_doc_id, to_doc_id FROM dependencies WHERE link_type != 'wikilink'")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    // -- Orphan cleanup safety (§4.9.8) -----------------------------------

    /// Delete documents that existed before the run (`pre_run_ids`) but were
    /// not regenerated (`generated_ids`), subject to the hard safety
    /// invariants. Returns how many were actually deleted.
    pub async fn cleanup_orphans(
        &self,
        pre_run_ids: &HashSet<String>,
        generated_ids: &HashSet<String>,
        failed_ids: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        if generated_ids.is_empty() {
            return Ok(0);
        }
        let total = generated_ids.len() + failed_ids.len();
        let success_ratio = generated_ids.len() as f64 / total as f64;
        if success_ratio < 0.5 {
            warn!(success_ratio, "skipping orphan cleanup: mostly-failed run");
            return Ok(0);
        }

        let candidates: Vec<String> = pre_run_ids.difference(generated_ids).cloned().collect();
        let mut to_delete = Vec::new();

        for doc_id in candidates {
            let Some(doc) = self.get(&doc_id).await? else { continue };

            if self.is_recent_human_edit(&doc.id).await? {
                continue;
            }
            if self.is_user_organized(&doc).await? {
                continue;
            }
            to_delete.push(doc_id);
        }

        if to_delete.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for doc_id in &to_delete {
            sqlx::query("UPDATE documents SET deleted_at = CURRENT_TIMESTAMP WHERE id = $1 AND deleted_at IS NULL")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(count = to_delete.len(), "cleaned up orphaned documents");
        Ok(to_delete.len())
    }

    async fn is_recent_human_edit(&self, doc_id: &str) -> anyhow::Result<bool> {
        let Some(version) = self.latest_version(doc_id).await? else {
            return Ok(false);
        };
        let age = Utc::now() - version.created_at;
        Ok(version.author_type == AuthorType::Human && age < Duration::days(HUMAN_PROTECTION_DAYS))
    }

    async fn is_user_organized(&self, doc: &Document) -> anyhow::Result<bool> {
        let recomputed = generate_document_id(doc.repo_url.as_deref(), &doc.path, &doc.title, doc.doc_type.as_deref());
        Ok(recomputed != doc.id)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers shared by the transactional write paths above.
// ---------------------------------------------------------------------------

const SELECT_DOCUMENT: &str = "SELECT id, repo_url, repo_name, doc_type, path, title, content, \
    content_preview, description, keywords, version, generation_count, created_at, updated_at, deleted_at, embedding_model \
    FROM documents";

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

async fn fetch_active(tx: &mut Transaction<'_, Postgres>, doc_id: &str) -> anyhow::Result<Option<Document>> {
    let row = sqlx::query_as::<_, Document>(&format!("{SELECT_DOCUMENT} WHERE deleted_at IS NULL AND id = $1"))
        .bind(doc_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

async fn fetch_including_deleted(tx: &mut Transaction<'_, Postgres>, doc_id: &str) -> anyhow::Result<Option<Document>> {
    let row = sqlx::query_as::<_, Document>(&format!("{SELECT_DOCUMENT} WHERE id = $1"))
        .bind(doc_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row)
}

/// Apply a content/description update, honoring optimistic locking when
/// `update.version` is set (§4.9.3). The version check and the write happen
/// in one atomic `UPDATE ... WHERE id = ? AND version = ?` statement.
async fn apply_update(tx: &mut Transaction<'_, Postgres>, doc_id: &str, update: DocumentUpdate) -> anyhow::Result<Document> {
    let preview = generate_content_preview(&update.content);

    if let Some(expected_version) = update.version {
        let current = fetch_including_deleted(tx, doc_id).await?;
        let description_changed = match (&current, &update.description) {
            (Some(c), Some(new_desc)) => c.description.as_deref() != Some(new_desc.as_str()),
            (None, _) => return Err(Error::NotFound(doc_id.to_string()).into()),
            _ => false,
        };

        let mut sql = String::from(
            "UPDATE documents SET content = $1, content_preview = $2, version = version + 1, \
             generation_count = generation_count + 1, updated_at = CURRENT_TIMESTAMP",
        );
        let mut next_param = 3;
        if update.description.is_some() {
            sql.push_str(&format!(", description = ${next_param}"));
            next_param += 1;
            if description_changed {
                sql.push_str(", embedding_model = NULL");
            }
        }
        sql.push_str(&format!(" WHERE id = ${next_param} AND version = ${}", next_param + 1));

        let mut query = sqlx::query(&sql).bind(&update.content).bind(&preview);
        if let Some(desc) = &update.description {
            query = query.bind(desc);
        }
        query = query.bind(doc_id).bind(expected_version);

        let result = query.execute(&mut **tx).await?;
        if result.rows_affected() == 0 {
            return match fetch_including_deleted(tx, doc_id).await? {
                None => Err(Error::NotFound(doc_id.to_string()).into()),
                Some(_) => Err(Error::Conflict { doc_id: doc_id.to_string() }.into()),
            };
        }
    } else {
        let current = fetch_including_deleted(tx, doc_id)
            .await?
            .ok_or_else(|| Error::NotFound(doc_id.to_string()))?;
        let description_changed = update
            .description
            .as_ref()
            .is_some_and(|d| current.description.as_deref() != Some(d.as_str()));

        let mut sql = String::from(
            "UPDATE documents SET content = $1, content_preview = $2, version = version + 1, \
             generation_count = generation_count + 1, updated_at = CURRENT_TIMESTAMP",
        );
        if update.description.is_some() {
            sql.push_str(", description = $3");
            if description_changed {
                sql.push_str(", embedding_model = NULL");
            }
        }
        sql.push_str(&format!(" WHERE id = ${}", if update.description.is_some() { 4 } else { 3 }));

        let mut query = sqlx::query(&sql).bind(&update.content).bind(&preview);
        if let Some(desc) = &update.description {
            query = query.bind(desc);
        }
        query.bind(doc_id).execute(&mut **tx).await?;
    }

    fetch_including_deleted(tx, doc_id)
        .await?
        .ok_or_else(|| Error::NotFound(doc_id.to_string()).into())
}

async fn insert_version(
    tx: &mut Transaction<'_, Postgres>,
    doc_id: &str,
    content: &str,
    author_type: AuthorType,
    author_metadata: &serde_json::Value,
) -> anyhow::Result<Version> {
    let now = Utc::now();
    let version_id = format!("{doc_id}-{}", now.timestamp_nanos_opt().unwrap_or_default());
    let content_hash = hex::encode(Sha256::digest(content.as_bytes()));

    sqlx::query(
        "INSERT INTO document_versions (id, doc_id, content, content_hash, author_type, author_metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&version_id)
    .bind(doc_id)
    .bind(content)
    .bind(&content_hash)
    .bind(author_type.to_string())
    .bind(author_metadata)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(Version {
        id: version_id,
        doc_id: doc_id.to_string(),
        content: content.to_string(),
        content_hash,
        author_type,
        author_metadata: author_metadata.clone(),
        created_at: now,
    })
}

/// Replace a document's outgoing dependency set derived from its current
/// content (§4.9.4). Four-stage batch resolution: exact title, case
/// insensitive title, exact repo_name, case-insensitive repo_name.
async fn refresh_outgoing_dependencies(tx: &mut Transaction<'_, Postgres>, doc_id: &str, content: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM dependencies WHERE from_doc_id = $1")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;

    let targets = extract_wikilink_targets(content);
    if targets.is_empty() {
        return Ok(());
    }

    let resolved = resolve_targets(tx, &targets).await?;

    // Wikilinks are always permitted to close a cycle (A <-> B is normal in
    // a wiki) — the cycle rule only rejects non-wikilink link types, which
    // this derivation never produces. `ContentStore::would_create_cycle` is
    // the entry point for any future link type that does need the check.
    for target in &targets {
        let Some(target_doc_id) = resolved.get(target) else {
            warn!(target, "unresolved wikilink target, skipping");
            continue;
        };
        if target_doc_id == doc_id {
            continue;
        }

        sqlx::query(
            "INSERT INTO dependencies (from_doc_id, to_doc_id, link_type, link_text, section) \
             VALUES ($1, $2, 'wikilink', $3, NULL) \
             ON CONFLICT (from_doc_id, to_doc_id) DO UPDATE SET link_text = EXCLUDED.link_text",
        )
        .bind(doc_id)
        .bind(target_doc_id)
        .bind(target)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// When a new document is created, any existing document whose content
/// literally contains `[[<new_title>]]` had that wikilink unresolved until
/// now — rerun its own outgoing-dependency derivation so the forward
/// reference resolves (§4.9.2).
async fn refresh_incoming_dependencies(tx: &mut Transaction<'_, Postgres>, new_title: &str) -> anyhow::Result<()> {
    let pattern = format!("%[[{new_title}%");
    let referencing: Vec<(String, String)> = sqlx::query_as(&format!(
        "SELECT id, content FROM documents WHERE deleted_at IS NULL AND content LIKE $1"
    ))
    .bind(pattern)
    .fetch_all(&mut **tx)
    .await?;

    for (doc_id, content) in referencing {
        refresh_outgoing_dependencies(tx, &doc_id, &content).await?;
    }
    Ok(())
}

async fn resolve_targets(tx: &mut Transaction<'_, Postgres>, targets: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut remaining: Vec<String> = targets.to_vec();

    // Stage a: exact title match.
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT title, id FROM documents WHERE deleted_at IS NULL AND title = ANY($1)")
            .bind(&remaining)
            .fetch_all(&mut **tx)
            .await?;
    for (title, id) in rows {
        resolved.insert(title, id);
    }
    remaining.retain(|t| !resolved.contains_key(t));
    if remaining.is_empty() {
        return Ok(resolved);
    }

    // Stage b: case-insensitive title match.
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT title, id FROM documents WHERE deleted_at IS NULL AND title ILIKE ANY($1)",
    )
    .bind(&remaining)
    .fetch_all(&mut **tx)
    .await?;
    for (title, id) in rows {
        if let Some(t) = remaining.iter().find(|r| r.eq_ignore_ascii_case(&title)) {
            resolved.insert(t.clone(), id);
        }
    }
    remaining.retain(|t| !resolved.contains_key(t));
    if remaining.is_empty() {
        return Ok(resolved);
    }

    // Stage c: exact repo_name match.
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT repo_name, id FROM documents WHERE deleted_at IS NULL AND repo_name = ANY($1)",
    )
    .bind(&remaining)
    .fetch_all(&mut **tx)
    .await?;
    for (repo_name, id) in rows {
        resolved.insert(repo_name, id);
    }
    remaining.retain(|t| !resolved.contains_key(t));
    if remaining.is_empty() {
        return Ok(resolved);
    }

    // Stage d: case-insensitive repo_name match.
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT repo_name, id FROM documents WHERE deleted_at IS NULL AND repo_name ILIKE ANY($1)",
    )
    .bind(&remaining)
    .fetch_all(&mut **tx)
    .await?;
    for (repo_name, id) in rows {
        if let Some(t) = remaining.iter().find(|r| r.eq_ignore_ascii_case(&repo_name)) {
            resolved.insert(t.clone(), id);
        }
    }

    Ok(resolved)
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Document {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Document {
            id: row.try_get("id")?,
            repo_url: row.try_get("repo_url")?,
            repo_name: row.try_get("repo_name")?,
            doc_type: row.try_get("doc_type")?,
            path: row.try_get("path")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            content_preview: row.try_get("content_preview")?,
            description: row.try_get("description")?,
            keywords: row.try_get("keywords")?,
            version: row.try_get("version")?,
            generation_count: row.try_get("generation_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
            embedding_model: row.try_get("embedding_model")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for Dependency {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Dependency {
            from_doc_id: row.try_get("from_doc_id")?,
            to_doc_id: row.try_get("to_doc_id")?,
            link_type: row.try_get("link_type")?,
            link_text: row.try_get("link_text")?,
            section: row.try_get("section")?,
        })
    }
}

/// `AuthorType` is foreign to this crate, so it can't carry a `sqlx::Type`
/// impl here (orphan rule) — versions are read back as a plain `String`
/// column and parsed through this helper instead.
fn parse_author_type(s: &str) -> AuthorType {
    match s {
        "human" => AuthorType::Human,
        "system" => AuthorType::System,
        _ => AuthorType::Ai,
    }
}
