//! Integration tests for ContentStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use isocrates_common::AuthorType;
use isocrates_store::{ContentStore, DocumentUpdate, DocumentWrite};
use serde_json::json;
use sha2::Digest;
use sqlx::PgPool;

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id               TEXT        PRIMARY KEY,
            repo_url         TEXT,
            repo_name        TEXT,
            doc_type         TEXT,
            path             TEXT        NOT NULL,
            title            TEXT        NOT NULL,
            content          TEXT        NOT NULL,
            content_preview  TEXT        NOT NULL,
            description      TEXT,
            keywords         TEXT[]      NOT NULL DEFAULT '{}',
            version          INT         NOT NULL DEFAULT 1,
            generation_count INT         NOT NULL DEFAULT 1,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at       TIMESTAMPTZ,
            embedding_model  TEXT
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id               TEXT        PRIMARY KEY,
            doc_id           TEXT        NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            content          TEXT        NOT NULL,
            content_hash     TEXT        NOT NULL,
            author_type      TEXT        NOT NULL,
            author_metadata  JSONB       NOT NULL DEFAULT '{}',
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependencies (
            from_doc_id  TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            to_doc_id    TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            link_type    TEXT NOT NULL,
            link_text    TEXT NOT NULL,
            section      TEXT,
            PRIMARY KEY (from_doc_id, to_doc_id)
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query("TRUNCATE dependencies, document_versions, documents RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

fn write(path: &str, title: &str, content: &str) -> DocumentWrite {
    DocumentWrite {
        repo_url: Some("https://github.com/acme/widgets".to_string()),
        repo_name: Some("widgets".to_string()),
        doc_type: None,
        path: path.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        description: None,
        keywords: vec![],
        author_type: AuthorType::Ai,
        author_metadata: json!({}),
    }
}

// =========================================================================
// Basic behavior
// =========================================================================

#[tokio::test]
async fn create_or_update_inserts_new_document() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, created) = store
        .create_or_update(write("lib/overview.md", "Overview", "Hello world"))
        .await
        .unwrap();

    assert!(created);
    assert_eq!(doc.version, 1);
    assert_eq!(doc.content, "Hello world");
    assert!(doc.is_active());
}

#[tokio::test]
async fn create_or_update_on_existing_id_updates_instead_of_inserting() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (first, created_first) = store
        .create_or_update(write("lib/overview.md", "Overview", "v1"))
        .await
        .unwrap();
    assert!(created_first);

    let (second, created_second) = store
        .create_or_update(write("lib/overview.md", "Overview", "v2"))
        .await
        .unwrap();

    assert!(!created_second);
    assert_eq!(second.id, first.id);
    assert_eq!(second.content, "v2");
    assert_eq!(second.version, 2);

    let versions = store.versions(&second.id).await.unwrap();
    assert_eq!(versions.len(), 2);
    let expected_hash = hex::encode(sha2::Sha256::digest(second.content.as_bytes()));
    assert_eq!(versions[0].content_hash, expected_hash);
}

#[tokio::test]
async fn update_with_matching_version_succeeds() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "first"))
        .await
        .unwrap();

    let updated = store
        .update(
            &doc.id,
            DocumentUpdate {
                content: "second".to_string(),
                description: None,
                version: Some(doc.version),
                author_type: AuthorType::Human,
                author_metadata: json!({}),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.content, "second");
    assert_eq!(updated.version, doc.version + 1);
}

#[tokio::test]
async fn update_with_stale_version_returns_conflict() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "first"))
        .await
        .unwrap();

    // Someone else updates first, bumping the version.
    store
        .update(
            &doc.id,
            DocumentUpdate {
                content: "second".to_string(),
                description: None,
                version: None,
                author_type: AuthorType::Ai,
                author_metadata: json!({}),
            },
        )
        .await
        .unwrap();

    // Now we try to update against the stale version we read earlier.
    let result = store
        .update(
            &doc.id,
            DocumentUpdate {
                content: "third".to_string(),
                description: None,
                version: Some(doc.version),
                author_type: AuthorType::Human,
                author_metadata: json!({}),
            },
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn get_excludes_soft_deleted_documents() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();

    store.delete(&doc.id).await.unwrap();

    assert!(store.get(&doc.id).await.unwrap().is_none());
    assert!(store.get_including_deleted(&doc.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();

    assert!(store.delete(&doc.id).await.unwrap());
    assert!(store.delete(&doc.id).await.unwrap());
    assert!(!store.delete("does-not-exist").await.unwrap());
}

#[tokio::test]
async fn restore_brings_a_deleted_document_back() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();

    store.delete(&doc.id).await.unwrap();
    let restored = store.restore(&doc.id).await.unwrap();

    assert!(restored.is_active());
    assert!(store.get(&doc.id).await.unwrap().is_some());
}

#[tokio::test]
async fn wikilink_dependencies_resolve_by_title() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (target, _) = store
        .create_or_update(write("lib/api.md", "API Reference", "The API."))
        .await
        .unwrap();

    let (source, _) = store
        .create_or_update(write("lib/overview.md", "Overview", "See [[API Reference]] for details."))
        .await
        .unwrap();

    let outgoing = store.dependencies_outgoing(&source.id).await.unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].to_doc_id, target.id);

    let incoming = store.dependencies_incoming(&target.id).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from_doc_id, source.id);
}

#[tokio::test]
async fn wikilink_to_not_yet_created_document_resolves_once_it_exists() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (source, _) = store
        .create_or_update(write("lib/overview.md", "Overview", "See [[API Reference]]."))
        .await
        .unwrap();
    assert!(store.dependencies_outgoing(&source.id).await.unwrap().is_empty());

    let (target, _) = store
        .create_or_update(write("lib/api.md", "API Reference", "The API."))
        .await
        .unwrap();

    let outgoing = store.dependencies_outgoing(&source.id).await.unwrap();
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].to_doc_id, target.id);
}

#[tokio::test]
async fn move_document_rewrites_cross_crate_wikilinks() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (old_crate_doc, _) = store
        .create_or_update(write("old-crate/overview.md", "Old Crate Overview", "Docs for old-crate."))
        .await
        .unwrap();

    let referencer = DocumentWrite {
        repo_url: Some("https://github.com/acme/widgets".to_string()),
        repo_name: Some("widgets".to_string()),
        doc_type: None,
        path: "other-crate/overview.md".to_string(),
        title: "Other Crate Overview".to_string(),
        content: "Depends on [[old-crate]].".to_string(),
        description: None,
        keywords: vec![],
        author_type: AuthorType::Ai,
        author_metadata: json!({}),
    };
    let (referencer_doc, _) = store.create_or_update(referencer).await.unwrap();

    store
        .move_document(&old_crate_doc.id, "new-crate/overview.md")
        .await
        .unwrap();

    let updated_referencer = store.get(&referencer_doc.id).await.unwrap().unwrap();
    assert!(updated_referencer.content.contains("[[new-crate]]"));
}

#[tokio::test]
async fn cleanup_orphans_skips_when_no_documents_were_generated() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();

    let mut pre_run = std::collections::HashSet::new();
    pre_run.insert(doc.id.clone());

    let deleted = store
        .cleanup_orphans(&pre_run, &std::collections::HashSet::new(), &std::collections::HashSet::new())
        .await
        .unwrap();

    assert_eq!(deleted, 0);
    assert!(store.get(&doc.id).await.unwrap().is_some());
}

#[tokio::test]
async fn cleanup_orphans_skips_mostly_failed_runs() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (stale, _) = store
        .create_or_update(write("lib/stale.md", "Stale", "old content"))
        .await
        .unwrap();

    let mut pre_run = std::collections::HashSet::new();
    pre_run.insert(stale.id.clone());

    let mut generated = std::collections::HashSet::new();
    generated.insert("doc-some-other-one".to_string());
    let mut failed = std::collections::HashSet::new();
    for i in 0..10 {
        failed.insert(format!("failed-{i}"));
    }

    let deleted = store.cleanup_orphans(&pre_run, &generated, &failed).await.unwrap();

    assert_eq!(deleted, 0);
    assert!(store.get(&stale.id).await.unwrap().is_some());
}

#[tokio::test]
async fn cleanup_orphans_deletes_stale_documents_not_in_generated_set() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (stale, _) = store
        .create_or_update(write("lib/stale.md", "Stale", "old content"))
        .await
        .unwrap();
    let (fresh, _) = store
        .create_or_update(write("lib/fresh.md", "Fresh", "new content"))
        .await
        .unwrap();

    let mut pre_run = std::collections::HashSet::new();
    pre_run.insert(stale.id.clone());
    pre_run.insert(fresh.id.clone());

    let mut generated = std::collections::HashSet::new();
    generated.insert(fresh.id.clone());

    let deleted = store
        .cleanup_orphans(&pre_run, &generated, &std::collections::HashSet::new())
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(store.get(&stale.id).await.unwrap().is_none());
    assert!(store.get(&fresh.id).await.unwrap().is_some());
}

// =========================================================================
// Adversarial tests
// =========================================================================

#[tokio::test]
async fn get_nonexistent_document_returns_none() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);
    assert!(store.get("does-not-exist").await.unwrap().is_none());
}

#[tokio::test]
async fn update_nonexistent_document_returns_error() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let result = store
        .update(
            "does-not-exist",
            DocumentUpdate {
                content: "x".to_string(),
                description: None,
                version: None,
                author_type: AuthorType::Ai,
                author_metadata: json!({}),
            },
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn content_preview_truncates_long_content() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let long_content = "x".repeat(2000);
    let (doc, _) = store
        .create_or_update(write("lib/long.md", "Long", &long_content))
        .await
        .unwrap();

    assert_eq!(doc.content_preview.chars().count(), 500);
    assert_eq!(doc.content.chars().count(), 2000);
}

#[tokio::test]
async fn self_referencing_wikilink_is_not_recorded_as_a_dependency() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "See [[A]] for more."))
        .await
        .unwrap();

    assert!(store.dependencies_outgoing(&doc.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn purge_expired_removes_only_old_soft_deletes() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    let (doc, _) = store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();
    store.delete(&doc.id).await.unwrap();

    // Retention window of 0 days means "deleted at any point" is expired.
    let purged = store.purge_expired(Some(0)).await.unwrap();
    assert_eq!(purged, 1);
    assert!(store.get_including_deleted(&doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_by_path_prefix() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();
    store
        .create_or_update(write("other/b.md", "B", "content"))
        .await
        .unwrap();

    let results = store.list(Some("lib"), None, 0, 100).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].path, "lib/a.md");
}

#[tokio::test]
async fn get_tracked_repo_urls_deduplicates() {
    let Some(pool) = test_pool().await else { return };
    let store = ContentStore::new(pool);

    store
        .create_or_update(write("lib/a.md", "A", "content"))
        .await
        .unwrap();
    store
        .create_or_update(write("lib/b.md", "B", "content"))
        .await
        .unwrap();

    let urls = store.get_tracked_repo_urls().await.unwrap();
    assert_eq!(urls, vec!["https://github.com/acme/widgets".to_string()]);
}
