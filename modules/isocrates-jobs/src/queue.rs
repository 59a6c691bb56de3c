//! Job Queue (spec §4.10): `generation_jobs` table backing webhook-triggered
//! regeneration. Jobs move queued -> running -> completed|failed, with one
//! automatic retry (failed jobs with `retry_count < 1` are re-queued rather
//! than dead-lettered) and dedup by `(repo_url, commit_sha)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_AUTOMATIC_RETRIES: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub repo_url: String,
    pub commit_sha: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for GenerationJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        let status_raw: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            repo_url: row.try_get("repo_url")?,
            commit_sha: row.try_get("commit_sha")?,
            status: JobStatus::parse(&status_raw),
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// `generation_jobs` table owner. Callers never construct `GenerationJob`
/// directly — every transition goes through one of these methods so the
/// dedup and retry invariants can't be bypassed.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a job, or return the existing queued/running job for the same
    /// `(repo_url, commit_sha)` pair rather than duplicating it.
    pub async fn enqueue(&self, repo_url: &str, commit_sha: Option<&str>) -> anyhow::Result<GenerationJob> {
        if let Some(sha) = commit_sha {
            let existing = sqlx::query_as::<_, GenerationJob>(
                "SELECT * FROM generation_jobs WHERE repo_url = $1 AND commit_sha = $2 \
                 AND status IN ('queued', 'running') LIMIT 1",
            )
            .bind(repo_url)
            .bind(sha)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(job) = existing {
                info!(job_id = %job.id, repo_url, commit_sha = sha, "job already queued, skipping duplicate");
                return Ok(job);
            }
        }

        let id = Uuid::new_v4().to_string();
        let job = sqlx::query_as::<_, GenerationJob>(
            "INSERT INTO generation_jobs (id, repo_url, commit_sha, status, retry_count) \
             VALUES ($1, $2, $3, 'queued', 0) RETURNING *",
        )
        .bind(&id)
        .bind(repo_url)
        .bind(commit_sha)
        .fetch_one(&self.pool)
        .await?;

        info!(job_id = %job.id, repo_url, commit_sha, "enqueued job");
        Ok(job)
    }

    /// Claim the oldest queued job, atomically marking it `running`. Uses
    /// `FOR UPDATE SKIP LOCKED` so multiple worker processes never claim the
    /// same row.
    pub async fn claim_next(&self) -> anyhow::Result<Option<GenerationJob>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, GenerationJob>(
            "SELECT * FROM generation_jobs WHERE status = 'queued' \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let claimed = sqlx::query_as::<_, GenerationJob>(
            "UPDATE generation_jobs SET status = 'running', started_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(&job.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(job_id = %claimed.id, repo_url = %claimed.repo_url, "claimed job");
        Ok(Some(claimed))
    }

    pub async fn complete(&self, job_id: &str) -> anyhow::Result<GenerationJob> {
        let job = sqlx::query_as::<_, GenerationJob>(
            "UPDATE generation_jobs SET status = 'completed', completed_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;

        info!(job_id, "job completed");
        Ok(job)
    }

    /// Mark a job failed. Re-queues it (clearing `started_at`) when this is
    /// its first failure; permanently fails it past that.
    pub async fn fail(&self, job_id: &str, error_message: &str) -> anyhow::Result<GenerationJob> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, GenerationJob>("SELECT * FROM generation_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;

        let retry_count = current.retry_count + 1;
        let job = if retry_count <= MAX_AUTOMATIC_RETRIES {
            warn!(job_id, retry_count, "job failed, re-queuing for retry");
            sqlx::query_as::<_, GenerationJob>(
                "UPDATE generation_jobs SET status = 'queued', retry_count = $2, \
                 error_message = $3, started_at = NULL WHERE id = $1 RETURNING *",
            )
            .bind(job_id)
            .bind(retry_count)
            .bind(format!("Retry after: {error_message}"))
            .fetch_one(&mut *tx)
            .await?
        } else {
            warn!(job_id, "job failed permanently, retries exhausted");
            sqlx::query_as::<_, GenerationJob>(
                "UPDATE generation_jobs SET status = 'failed', retry_count = $2, \
                 error_message = $3, completed_at = now() WHERE id = $1 RETURNING *",
            )
            .bind(job_id)
            .bind(retry_count)
            .bind(error_message)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> anyhow::Result<Option<GenerationJob>> {
        Ok(sqlx::query_as::<_, GenerationJob>("SELECT * FROM generation_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn jobs_for_repo(&self, repo_url: &str, limit: i64) -> anyhow::Result<Vec<GenerationJob>> {
        Ok(sqlx::query_as::<_, GenerationJob>(
            "SELECT * FROM generation_jobs WHERE repo_url = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(repo_url)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn latest_for_repo(&self, repo_url: &str) -> anyhow::Result<Option<GenerationJob>> {
        Ok(sqlx::query_as::<_, GenerationJob>(
            "SELECT * FROM generation_jobs WHERE repo_url = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(repo_url)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_its_string_form() {
        for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_string_parses_as_queued() {
        assert_eq!(JobStatus::parse("bogus"), JobStatus::Queued);
    }
}
