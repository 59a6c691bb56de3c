//! Integration tests for JobQueue.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use isocrates_jobs::{JobQueue, JobStatus};
use sqlx::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_jobs (
            id              TEXT        PRIMARY KEY,
            repo_url        TEXT        NOT NULL,
            commit_sha      TEXT,
            status          TEXT        NOT NULL DEFAULT 'queued',
            error_message   TEXT,
            retry_count     INT         NOT NULL DEFAULT 0,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            started_at      TIMESTAMPTZ,
            completed_at    TIMESTAMPTZ
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query("TRUNCATE generation_jobs RESTART IDENTITY CASCADE").execute(&pool).await.ok()?;
    Some(pool)
}

#[tokio::test]
async fn enqueue_creates_a_queued_job() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let job = queue.enqueue("https://github.com/example/repo", Some("abc123")).await.unwrap();
    assert!(matches!(job.status, JobStatus::Queued));
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn enqueue_deduplicates_by_repo_and_commit_sha() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let first = queue.enqueue("https://github.com/example/repo", Some("abc123")).await.unwrap();
    let second = queue.enqueue("https://github.com/example/repo", Some("abc123")).await.unwrap();
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn enqueue_does_not_dedup_different_commits() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let first = queue.enqueue("https://github.com/example/repo", Some("abc123")).await.unwrap();
    let second = queue.enqueue("https://github.com/example/repo", Some("def456")).await.unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn claim_next_returns_oldest_queued_job() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let first = queue.enqueue("https://github.com/example/a", None).await.unwrap();
    queue.enqueue("https://github.com/example/b", None).await.unwrap();

    let claimed = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert!(matches!(claimed.status, JobStatus::Running));
    assert!(claimed.started_at.is_some());
}

#[tokio::test]
async fn claim_next_returns_none_when_queue_is_empty() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn complete_marks_job_completed() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let job = queue.enqueue("https://github.com/example/repo", None).await.unwrap();
    queue.claim_next().await.unwrap();
    let completed = queue.complete(&job.id).await.unwrap();
    assert!(matches!(completed.status, JobStatus::Completed));
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn fail_requeues_on_first_failure() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let job = queue.enqueue("https://github.com/example/repo", None).await.unwrap();
    queue.claim_next().await.unwrap();
    let failed = queue.fail(&job.id, "boom").await.unwrap();
    assert!(matches!(failed.status, JobStatus::Queued));
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.unwrap().contains("boom"));
}

#[tokio::test]
async fn fail_marks_permanently_failed_after_retry_exhausted() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    let job = queue.enqueue("https://github.com/example/repo", None).await.unwrap();
    queue.claim_next().await.unwrap();
    queue.fail(&job.id, "first failure").await.unwrap();
    queue.claim_next().await.unwrap();
    let failed = queue.fail(&job.id, "second failure").await.unwrap();

    assert!(matches!(failed.status, JobStatus::Failed));
    assert_eq!(failed.retry_count, 2);
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn jobs_for_repo_orders_newest_first() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);

    queue.enqueue("https://github.com/example/repo", Some("sha1")).await.unwrap();
    queue.enqueue("https://github.com/example/repo", Some("sha2")).await.unwrap();

    let jobs = queue.jobs_for_repo("https://github.com/example/repo", 10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].commit_sha.as_deref(), Some("sha2"));
}

#[tokio::test]
async fn get_returns_none_for_unknown_job() {
    let Some(pool) = test_pool().await else { return };
    let queue = JobQueue::new(pool);
    assert!(queue.get("does-not-exist").await.unwrap().is_none());
}
