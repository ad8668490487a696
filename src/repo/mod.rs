//! Repository adapter port: issues, comments, branches, commits and PRs.

pub mod git;
pub mod github;

pub use github::GitHubAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;
use crate::state::IssueNumber;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: IssueNumber,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub state: String,
    #[serde(default)]
    pub html_url: String,
}

/// Something that happened on an issue, as seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    Opened,
    Comment { id: u64, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueActivity {
    pub issue: IssueNumber,
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait RepositoryAdapter: Send + Sync {
    async fn fetch_issue(&self, issue: IssueNumber) -> Result<Issue, CollaboratorError>;

    async fn comment(&self, issue: IssueNumber, body: &str) -> Result<(), CollaboratorError>;

    /// Create `branch` from the current HEAD, or check it out if it exists.
    async fn create_branch(&self, branch: &str) -> Result<(), CollaboratorError>;

    async fn checkout(&self, branch: &str) -> Result<(), CollaboratorError>;

    /// Commit everything in the working tree. `Ok(false)` when there was
    /// nothing to commit.
    async fn commit(&self, message: &str) -> Result<bool, CollaboratorError>;

    async fn push(&self, branch: &str) -> Result<(), CollaboratorError>;

    /// Open a PR for `branch` unless one is already open; returns its URL.
    async fn ensure_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, CollaboratorError>;

    /// New issues and comments at or after `since`, oldest first.
    async fn list_activity(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueActivity>, CollaboratorError>;
}
