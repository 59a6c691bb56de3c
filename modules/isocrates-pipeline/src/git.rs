//! Minimal git plumbing for the orchestrator's clone/pull step and the
//! regeneration engine's commit-distance checks. Shells out to the `git`
//! binary rather than a library — the only operations needed are a handful
//! of read-only queries plus clone/pull, all bounded by a 30s deadline.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

fn run(dir: Option<&Path>, args: &[&str]) -> Result<std::process::Output> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    // `GIT_PAGER=cat` is enforced process-wide by isocrates_common::Config;
    // nothing further is needed here to keep this non-interactive.
    run_with_deadline(cmd)
}

/// Spawn `cmd` and wait for it, killing it if it outlives `GIT_TIMEOUT`.
/// Git subprocesses don't offer a native wall-clock flag, so the deadline
/// is enforced by polling the child rather than blocking on `wait()`.
fn run_with_deadline(mut cmd: Command) -> Result<std::process::Output> {
    use std::io::Read;

    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    let mut child = cmd.spawn().context("failed to spawn git")?;
    let start = std::time::Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                out.read_to_end(&mut stdout)?;
            }
            if let Some(mut err) = child.stderr.take() {
                err.read_to_end(&mut stderr)?;
            }
            return Ok(std::process::Output { status, stdout, stderr });
        }
        if start.elapsed() > GIT_TIMEOUT {
            let _ = child.kill();
            return Err(anyhow!("git command timed out after {GIT_TIMEOUT:?}"));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn stdout_trimmed(output: std::process::Output) -> Result<String> {
    if !output.status.success() {
        return Err(anyhow!("git failed: {}", String::from_utf8_lossy(&output.stderr)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clone `repo_url` into `dest` if it doesn't exist yet, else fetch + reset
/// to the remote's default branch tip ("pull" in the orchestrator's sense —
/// local commits, if any, are never preserved since `dest` is a scratch
/// workspace owned by the pipeline).
pub fn clone_or_pull(repo_url: &str, dest: &Path) -> Result<()> {
    if dest.join(".git").is_dir() {
        stdout_trimmed(run(Some(dest), &["fetch", "--all", "--prune"])?)?;
        let default_branch = stdout_trimmed(run(Some(dest), &["rev-parse", "--abbrev-ref", "origin/HEAD"])?)
            .unwrap_or_else(|_| "origin/main".to_string());
        stdout_trimmed(run(Some(dest), &["reset", "--hard", &default_branch])?)?;
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        stdout_trimmed(run(None, &["clone", repo_url, dest.to_string_lossy().as_ref()])?)?;
    }
    Ok(())
}

pub fn head_commit_sha(repo: &Path) -> Result<String> {
    stdout_trimmed(run(Some(repo), &["rev-parse", "HEAD"]))
}

/// Number of commits between `from_sha` (exclusive) and HEAD (inclusive).
/// Returns `Err` when `from_sha` is unknown to this checkout (e.g. it was
/// rewritten away) — callers treat that as "changed, assume significant".
pub fn commits_since(repo: &Path, from_sha: &str) -> Result<u32> {
    let range = format!("{from_sha}..HEAD");
    let out = stdout_trimmed(run(Some(repo), &["rev-list", "--count", &range]))?;
    out.parse().map_err(|e| anyhow!("unexpected rev-list output {out:?}: {e}"))
}

/// `git log --oneline` between `from_sha` and HEAD, newest first. Empty
/// when `from_sha` already is HEAD.
pub fn log_since(repo: &Path, from_sha: &str) -> Result<String> {
    let range = format!("{from_sha}..HEAD");
    stdout_trimmed(run(Some(repo), &["log", "--oneline", &range]))
}

/// `git diff` between `from_sha` and HEAD, used to build the diff scout's
/// source material.
pub fn diff_since(repo: &Path, from_sha: &str) -> Result<String> {
    let range = format!("{from_sha}..HEAD");
    stdout_trimmed(run(Some(repo), &["diff", &range]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).output().unwrap();
    }

    fn commit(dir: &Path, msg: &str) {
        Command::new("git").args(["commit", "--allow-empty", "-m", msg]).current_dir(dir).output().unwrap();
    }

    #[test]
    fn head_commit_sha_returns_a_sha() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        commit(td.path(), "first");
        let sha = head_commit_sha(td.path()).unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn commits_since_counts_new_commits() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        commit(td.path(), "first");
        let base = head_commit_sha(td.path()).unwrap();
        commit(td.path(), "second");
        commit(td.path(), "third");
        assert_eq!(commits_since(td.path(), &base).unwrap(), 2);
    }

    #[test]
    fn commits_since_unknown_sha_errors() {
        let td = tempdir().unwrap();
        init_repo(td.path());
        commit(td.path(), "first");
        let result = commits_since(td.path(), "0000000000000000000000000000000000000000");
        assert!(result.is_err());
    }
}
