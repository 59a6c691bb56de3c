//! Single-process polling worker (spec §4.10): claims one job at a time and
//! runs the pipeline CLI as a subprocess, bounded by a 30-minute deadline.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::queue::{GenerationJob, JobQueue};

const JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Where to find the pipeline binary; overridable so tests and alternate
/// deployments don't need the real binary on `PATH`.
pub fn pipeline_command() -> String {
    std::env::var("PIPELINE_COMMAND").unwrap_or_else(|_| "isocrates-cli".to_string())
}

/// Run the pipeline for one job as a subprocess, polling `try_wait` against
/// `JOB_TIMEOUT` the same way `isocrates_pipeline::git` polls for its own
/// deadline, and feed the outcome back into the queue.
pub async fn process_job(queue: &JobQueue, job: &GenerationJob, command: &str) {
    info!(job_id = %job.id, repo_url = %job.repo_url, "processing job");

    let mut child = match tokio::process::Command::new(command)
        .arg("pipeline")
        .arg("--repo")
        .arg(&job.repo_url)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = queue.fail(&job.id, &format!("failed to spawn pipeline: {e}")).await;
            return;
        }
    };

    let wait = tokio::time::timeout(JOB_TIMEOUT, child.wait_with_output()).await;

    match wait {
        Ok(Ok(output)) if output.status.success() => {
            if let Err(e) = queue.complete(&job.id).await {
                error!(job_id = %job.id, error = %e, "failed to record job completion");
            } else {
                info!(job_id = %job.id, "job completed successfully");
            }
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.chars().rev().take(500).collect::<String>().chars().rev().collect();
            let message = if tail.is_empty() {
                format!("exit code {:?}", output.status.code())
            } else {
                tail
            };
            warn!(job_id = %job.id, %message, "job failed");
            let _ = queue.fail(&job.id, &message).await;
        }
        Ok(Err(e)) => {
            let _ = queue.fail(&job.id, &format!("failed to collect pipeline output: {e}")).await;
        }
        Err(_) => {
            warn!(job_id = %job.id, "job timed out after 30 minutes");
            let _ = queue.fail(&job.id, "job timed out after 30 minutes").await;
        }
    }
}

/// Poll forever: claim the next job if one exists, otherwise sleep
/// `poll_interval` and try again.
pub async fn run(queue: JobQueue, poll_interval: Duration) -> ! {
    let command = pipeline_command();
    info!(poll_interval_secs = poll_interval.as_secs(), %command, "worker started");

    loop {
        match queue.claim_next().await {
            Ok(Some(job)) => process_job(&queue, &job, &command).await,
            Ok(None) => tokio::time::sleep(poll_interval).await,
            Err(e) => {
                error!(error = %e, "error claiming next job");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
