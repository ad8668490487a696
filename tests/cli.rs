//! CLI integration tests for adw.
//!
//! No test here reaches a real agent or GitHub: the API URL points at a
//! closed local port and the agent command does not exist.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use adw::state::{FileStore, IssueNumber, Phase, WorkflowStore};

const ENV_VARS: &[&str] = &[
    "GITHUB_PAT",
    "GITHUB_TOKEN",
    "GITHUB_REPO",
    "ANTHROPIC_API_KEY",
    "CLAUDE_CODE_PATH",
    "ADW_STATE_DIR",
    "ADW_WEBHOOK_SECRET",
    "ADW_RETRY_CAP",
    "ADW_POLL_INTERVAL",
    "ADW_PROJECT_DIR",
    "PORT",
    "RUST_LOG",
];

/// Project directory with a config that keeps every collaborator offline.
fn offline_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".adw")).unwrap();
    fs::write(
        dir.path().join(".adw/adw.toml"),
        r#"
[agent]
command = "/nonexistent/claude"

[repository]
repo = "acme/app"
api_url = "http://127.0.0.1:9"
"#,
    )
    .unwrap();
    dir
}

fn adw(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("adw");
    cmd.current_dir(dir.path());
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn store(dir: &TempDir) -> FileStore {
    FileStore::open(dir.path().join("agents")).unwrap()
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_lists_commands() {
        let dir = offline_project();
        adw(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("sdlc"))
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("abandon"));
    }

    #[test]
    fn version_succeeds() {
        let dir = offline_project();
        adw(&dir).arg("--version").assert().success();
    }

    #[test]
    fn invalid_issue_reference_is_rejected() {
        let dir = offline_project();
        adw(&dir).args(["plan", "not-an-issue"]).assert().failure();
    }

    #[test]
    fn issue_zero_is_rejected_before_any_state_is_written() {
        let dir = offline_project();
        for issue in ["0", "#0"] {
            adw(&dir)
                .args(["plan", issue])
                .assert()
                .failure()
                .stderr(predicate::str::contains("issue numbers start at 1"));
        }
        assert!(!dir.path().join("agents").exists());
    }
}

mod status {
    use super::*;

    #[test]
    fn empty_store_reports_no_workflows() {
        let dir = offline_project();
        adw(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No active workflows"));
    }

    #[test]
    fn lists_active_workflows() {
        let dir = offline_project();
        let created = store(&dir).create(IssueNumber(42)).unwrap();
        adw(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains(created.workflow_id.as_str()))
            .stdout(predicate::str::contains("#42"));
    }

    #[test]
    fn json_output_is_the_record() {
        let dir = offline_project();
        let created = store(&dir).create(IssueNumber(5)).unwrap();
        let output = adw(&dir)
            .args(["status", created.workflow_id.as_str(), "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["current_phase"], "PLAN");
        assert_eq!(json["issue_reference"], 5);
    }

    #[test]
    fn unknown_workflow_exits_invalid() {
        let dir = offline_project();
        adw(&dir)
            .args(["status", "abcdef012345"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("not found"));
    }
}

mod abandon {
    use super::*;

    #[test]
    fn marks_workflow_failed_once() {
        let dir = offline_project();
        let created = store(&dir).create(IssueNumber(9)).unwrap();
        let id = created.workflow_id.as_str();

        adw(&dir)
            .args(["abandon", id, "--reason", "duplicate issue"])
            .assert()
            .success()
            .stdout(predicate::str::contains("abandoned"));

        let state = store(&dir).load(&created.workflow_id).unwrap();
        assert_eq!(state.current_phase, Phase::Failed);
        assert_eq!(state.failure.unwrap().message, "duplicate issue");

        adw(&dir)
            .args(["abandon", id])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("already terminal"));
    }
}

mod phases {
    use super::*;

    #[test]
    fn unreachable_collaborator_leaves_workflow_resumable() {
        let dir = offline_project();
        adw(&dir).args(["plan", "#3"]).assert().code(3);

        let all = store(&dir).list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].current_phase, Phase::Plan);
        assert!(all[0].phase_history.is_empty());
    }

    #[test]
    fn phase_command_checks_issue_ownership() {
        let dir = offline_project();
        let created = store(&dir).create(IssueNumber(1)).unwrap();
        adw(&dir)
            .args(["build", "2", created.workflow_id.as_str()])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("belongs to issue"));
    }
}

mod config {
    use super::*;

    #[test]
    fn validate_warns_about_missing_secrets() {
        let dir = offline_project();
        adw(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("webhook secret"));
    }

    #[test]
    fn show_reflects_environment() {
        let dir = offline_project();
        adw(&dir)
            .env("ADW_RETRY_CAP", "2")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("retry_cap = 2"))
            .stdout(predicate::str::contains("acme/app"));
    }
}
