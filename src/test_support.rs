//! Deterministic stand-ins for the agent and repository ports.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::agent::{AgentInvoker, AgentRequest, AgentResponse};
use crate::audit::AuditLogger;
use crate::errors::{Collaborator, CollaboratorError};
use crate::repo::{Issue, IssueActivity, RepositoryAdapter};
use crate::state::{FileStore, IssueNumber, WorkflowState, WorkflowStore};
use crate::workflow::{Orchestrator, RetryPolicy};

pub const PASSING_TESTS: &str = r#"[{"test_name":"unit","passed":true,"execution_command":"pytest","test_purpose":"unit tests","error":null}]"#;
pub const FAILING_TESTS: &str = r#"[{"test_name":"unit","passed":false,"execution_command":"pytest","test_purpose":"unit tests","error":"assert 1 == 2"}]"#;
pub const REVIEW_PASS: &str =
    r#"{"overall_assessment":"pass","summary":"Looks good","strengths":["Focused change"]}"#;
pub const DOCS_DONE: &str = r#"{"summary":"Updated README","files_updated":[{"file":"README.md","changes":"Usage","sections_added":["Usage"]}]}"#;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum StubReply {
    Ok(String),
    /// Agent ran but reported failure.
    Failed(String),
    Err(CollaboratorError),
}

/// Agent stub answering from per-command queues, falling back to a
/// successful default for each known command.
#[derive(Default)]
pub struct StubAgent {
    scripts: Mutex<HashMap<String, VecDeque<StubReply>>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl StubAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for `command`; once drained the default applies again.
    pub fn script(&self, command: &str, replies: Vec<StubReply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.command == command)
            .count()
    }

    fn default_reply(command: &str) -> StubReply {
        let output = match command {
            "/classify_issue" => "/feature",
            "/bug" | "/feature" | "/chore" => "Plan written to\nspecs/plan.md",
            "/test" => PASSING_TESTS,
            "/review" => REVIEW_PASS,
            "/document" => DOCS_DONE,
            _ => "done",
        };
        StubReply::Ok(output.to_string())
    }
}

#[async_trait]
impl AgentInvoker for StubAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, CollaboratorError> {
        self.calls.lock().unwrap().push(request.clone());
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.command)
            .and_then(VecDeque::pop_front);
        match scripted.unwrap_or_else(|| Self::default_reply(&request.command)) {
            StubReply::Ok(output) => Ok(AgentResponse::success(output)),
            StubReply::Failed(output) => Ok(AgentResponse::failure(output)),
            StubReply::Err(e) => Err(e),
        }
    }
}

/// Repository stub recording every side effect in memory.
#[derive(Default)]
pub struct StubRepository {
    comments: Mutex<Vec<(IssueNumber, String)>>,
    branches: Mutex<Vec<String>>,
    commits: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
    activity: Mutex<Vec<IssueActivity>>,
    unavailable: Mutex<bool>,
}

impl StubRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comments(&self) -> Vec<String> {
        self.comments
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn branches(&self) -> Vec<String> {
        self.branches.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }

    /// Activity returned by `list_activity` (filtered by `since`).
    pub fn set_activity(&self, activity: Vec<IssueActivity>) {
        *self.activity.lock().unwrap() = activity;
    }

    /// Make every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if *self.unavailable.lock().unwrap() {
            Err(CollaboratorError::unavailable(
                Collaborator::Repository,
                "stub repository offline",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RepositoryAdapter for StubRepository {
    async fn fetch_issue(&self, issue: IssueNumber) -> Result<Issue, CollaboratorError> {
        self.check()?;
        Ok(Issue {
            number: issue,
            title: format!("Add feature {}", issue.0),
            body: "Please add it".to_string(),
            state: "open".to_string(),
            html_url: format!("https://github.com/acme/app/issues/{}", issue.0),
        })
    }

    async fn comment(&self, issue: IssueNumber, body: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        self.comments
            .lock()
            .unwrap()
            .push((issue, body.to_string()));
        Ok(())
    }

    async fn create_branch(&self, branch: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        let mut branches = self.branches.lock().unwrap();
        if !branches.iter().any(|b| b == branch) {
            branches.push(branch.to_string());
        }
        Ok(())
    }

    async fn checkout(&self, branch: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        if self.branches.lock().unwrap().iter().any(|b| b == branch) {
            Ok(())
        } else {
            Err(CollaboratorError::fatal(
                Collaborator::Repository,
                format!("no branch {}", branch),
            ))
        }
    }

    async fn commit(&self, message: &str) -> Result<bool, CollaboratorError> {
        self.check()?;
        self.commits.lock().unwrap().push(message.to_string());
        Ok(true)
    }

    async fn push(&self, branch: &str) -> Result<(), CollaboratorError> {
        self.check()?;
        self.pushes.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn ensure_pull_request(
        &self,
        branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<String, CollaboratorError> {
        self.check()?;
        Ok(format!("https://github.com/acme/app/pull/{}", branch))
    }

    async fn list_activity(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueActivity>, CollaboratorError> {
        self.check()?;
        let mut activity: Vec<IssueActivity> = self
            .activity
            .lock()
            .unwrap()
            .iter()
            .filter(|a| since.is_none_or(|s| a.at >= s))
            .cloned()
            .collect();
        activity.sort_by_key(|a| a.at);
        Ok(activity)
    }
}

/// Orchestrator wired to stubs over a temporary on-disk store.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<FileStore>,
    pub agent: Arc<StubAgent>,
    pub repo: Arc<StubRepository>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let agent = Arc::new(StubAgent::new());
        let repo = Arc::new(StubRepository::new());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            agent.clone(),
            repo.clone(),
            AuditLogger::new(dir.path()),
            policy,
        ));
        Self {
            dir,
            store,
            agent,
            repo,
            orchestrator,
        }
    }

    pub fn audit(&self) -> AuditLogger {
        AuditLogger::new(self.dir.path())
    }

    /// The single workflow in the store; panics if there is not exactly one.
    pub fn only_workflow(&self) -> WorkflowState {
        let mut all = self.store.list_all().unwrap();
        assert_eq!(all.len(), 1, "expected exactly one workflow");
        all.remove(0)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
