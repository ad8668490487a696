use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tracing::debug;

use crate::errors::{Collaborator, CollaboratorError};

/// stderr fragments that mean the remote could not be reached at all.
const UNREACHABLE_MARKERS: &[&str] = &[
    "could not resolve host",
    "unable to access",
    "connection refused",
    "connection timed out",
    "could not read from remote repository",
    "network is unreachable",
];

/// Local git checkout the workflow commits into.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    dir: PathBuf,
}

impl GitWorkspace {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, CollaboratorError> {
        debug!(args = ?args, "git");
        tokio::process::Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                CollaboratorError::unavailable(
                    Collaborator::Repository,
                    format!("failed to run git {}: {}", args.join(" "), e),
                )
            })
    }

    async fn run_ok(&self, args: &[&str]) -> Result<Output, CollaboratorError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_failure(args, &output))
        }
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, CollaboratorError> {
        let refname = format!("refs/heads/{}", branch);
        let output = self
            .run(&["show-ref", "--verify", "--quiet", &refname])
            .await?;
        Ok(output.status.success())
    }

    pub async fn create_branch(&self, branch: &str) -> Result<(), CollaboratorError> {
        if self.branch_exists(branch).await? {
            return self.checkout(branch).await;
        }
        self.run_ok(&["checkout", "-b", branch]).await.map(|_| ())
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), CollaboratorError> {
        self.run_ok(&["checkout", branch]).await.map(|_| ())
    }

    pub async fn commit_all(&self, message: &str) -> Result<bool, CollaboratorError> {
        self.run_ok(&["add", "-A"]).await?;
        // `diff --cached --quiet` exits 0 when nothing is staged.
        let staged = self.run(&["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            return Ok(false);
        }
        self.run_ok(&["commit", "-m", message]).await?;
        Ok(true)
    }

    pub async fn push(&self, branch: &str) -> Result<(), CollaboratorError> {
        self.run_ok(&["push", "-u", "origin", branch]).await.map(|_| ())
    }

    pub async fn remote_url(&self) -> Result<String, CollaboratorError> {
        let output = self.run_ok(&["remote", "get-url", "origin"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn classify_git_failure(args: &[&str], output: &Output) -> CollaboratorError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = format!("git {} failed: {}", args.join(" "), stderr.trim());
    let lowered = stderr.to_lowercase();
    if UNREACHABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        CollaboratorError::unavailable(Collaborator::Repository, message)
    } else {
        CollaboratorError::fatal(Collaborator::Repository, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .unwrap();
            assert!(status.success(), "git {:?} failed", args);
        };
        git(&["init", "-q"]);
        git(&["config", "user.email", "adw@example.com"]);
        git(&["config", "user.name", "adw"]);
        git(&["config", "commit.gpgsign", "false"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        git(&["add", "-A"]);
        git(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[tokio::test]
    async fn create_branch_is_idempotent() {
        let dir = init_repo();
        let ws = GitWorkspace::new(dir.path());
        ws.create_branch("feature-issue-1-adw-abc").await.unwrap();
        assert!(ws.branch_exists("feature-issue-1-adw-abc").await.unwrap());
        // Second call checks the existing branch out instead of failing.
        ws.create_branch("feature-issue-1-adw-abc").await.unwrap();
    }

    #[tokio::test]
    async fn commit_all_reports_empty_tree() {
        let dir = init_repo();
        let ws = GitWorkspace::new(dir.path());
        assert!(!ws.commit_all("nothing").await.unwrap());

        std::fs::write(dir.path().join("plan.md"), "# plan\n").unwrap();
        assert!(ws.commit_all("sdlc_planner: feature: add plan").await.unwrap());
        assert!(!ws.commit_all("again").await.unwrap());
    }

    #[tokio::test]
    async fn checkout_unknown_branch_is_fatal() {
        let dir = init_repo();
        let ws = GitWorkspace::new(dir.path());
        let err = ws.checkout("no-such-branch").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Fatal { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn unreachable_remote_is_unavailable() {
        use std::os::unix::process::ExitStatusExt;
        let output = Output {
            status: std::process::ExitStatus::from_raw(128 << 8),
            stdout: Vec::new(),
            stderr: b"fatal: unable to access 'https://github.com/o/r/': Could not resolve host"
                .to_vec(),
        };
        assert!(classify_git_failure(&["push"], &output).is_unavailable());
    }
}
