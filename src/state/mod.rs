//! Workflow state model: identifiers, phases, classification and history.
//!
//! A [`WorkflowState`] is the durable record of one end-to-end run for one
//! triggering issue. It is only ever mutated through
//! [`WorkflowStore::save`](store::WorkflowStore::save).

pub mod store;

pub use store::{FileStore, WorkflowStore};

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque short token identifying one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub const LEN: usize = 12;

    /// 12 lowercase hex characters from a fresh UUID v4.
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = String;

    /// Ids double as directory names, so only `[a-z0-9_-]` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.len() > 64 {
            return Err(format!("invalid workflow id '{}'", s));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(format!("invalid workflow id '{}'", s));
        }
        Ok(Self(s.to_string()))
    }
}

/// Issue number in the hosted repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueNumber(pub u64);

impl fmt::Display for IssueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Issue numbers start at 1.
impl TryFrom<u64> for IssueNumber {
    type Error = String;

    fn try_from(n: u64) -> Result<Self, Self::Error> {
        if n == 0 {
            Err("invalid issue reference '0': issue numbers start at 1".to_string())
        } else {
            Ok(IssueNumber(n))
        }
    }
}

impl FromStr for IssueNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('#');
        let n = digits
            .parse::<u64>()
            .map_err(|_| format!("invalid issue reference '{}'", s))?;
        IssueNumber::try_from(n)
    }
}

/// Pipeline phase. Declaration order is the forward order of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Plan,
    Build,
    Test,
    Review,
    Document,
    Done,
    Failed,
}

impl Phase {
    /// The working phases, in execution order.
    pub const PIPELINE: [Phase; 5] = [
        Phase::Plan,
        Phase::Build,
        Phase::Test,
        Phase::Review,
        Phase::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "PLAN",
            Phase::Build => "BUILD",
            Phase::Test => "TEST",
            Phase::Review => "REVIEW",
            Phase::Document => "DOCUMENT",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// The phase entered when this one completes successfully.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Plan => Some(Phase::Build),
            Phase::Build => Some(Phase::Test),
            Phase::Test => Some(Phase::Review),
            Phase::Review => Some(Phase::Document),
            Phase::Document => Some(Phase::Done),
            Phase::Done | Phase::Failed => None,
        }
    }

    /// Whether a persisted record may move from `self` to `to`.
    ///
    /// Staying put is allowed for non-terminal phases (TEST retry entries).
    pub fn can_transition_to(&self, to: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == *self || to == Phase::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAN" => Ok(Phase::Plan),
            "BUILD" => Ok(Phase::Build),
            "TEST" => Ok(Phase::Test),
            "REVIEW" => Ok(Phase::Review),
            "DOCUMENT" => Ok(Phase::Document),
            "DONE" => Ok(Phase::Done),
            "FAILED" => Ok(Phase::Failed),
            _ => Err(format!("unknown phase '{}'", s)),
        }
    }
}

static CLASSIFICATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(bug|feature|chore)\b").unwrap());

/// Issue classification, decided once during PLAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueClass {
    Bug,
    Feature,
    Chore,
    #[default]
    Unclassified,
}

impl IssueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueClass::Bug => "bug",
            IssueClass::Feature => "feature",
            IssueClass::Chore => "chore",
            IssueClass::Unclassified => "unclassified",
        }
    }

    /// Planning command for this class.
    pub fn plan_command(&self) -> Option<&'static str> {
        match self {
            IssueClass::Bug => Some("/bug"),
            IssueClass::Feature => Some("/feature"),
            IssueClass::Chore => Some("/chore"),
            IssueClass::Unclassified => None,
        }
    }

    /// Extract the class from classifier output (`/bug`, `/feature`, `/chore`).
    /// Anything else, including `0`, yields `None`.
    pub fn from_classifier_output(output: &str) -> Option<IssueClass> {
        let caps = CLASSIFICATION_REGEX.captures(output)?;
        match caps[1].to_ascii_lowercase().as_str() {
            "bug" => Some(IssueClass::Bug),
            "feature" => Some(IssueClass::Feature),
            "chore" => Some(IssueClass::Chore),
            _ => None,
        }
    }
}

impl fmt::Display for IssueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow ended up FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ClassificationFailure,
    RetryExhausted,
    FatalCollaborator,
    MissingArtifact,
    Abandoned,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ClassificationFailure => "ClassificationFailure",
            FailureKind::RetryExhausted => "RetryExhausted",
            FailureKind::FatalCollaborator => "FatalCollaborator",
            FailureKind::MissingArtifact => "MissingArtifact",
            FailureKind::Abandoned => "Abandoned",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded in a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed,
    Retried { attempt: u32, summary: String },
    Failed { kind: FailureKind, message: String },
}

/// One append-only audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub phase: Phase,
    pub outcome: PhaseOutcome,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn completed(phase: Phase) -> Self {
        Self {
            phase,
            outcome: PhaseOutcome::Completed,
            timestamp: Utc::now(),
        }
    }

    pub fn retried(phase: Phase, attempt: u32, summary: impl Into<String>) -> Self {
        Self {
            phase,
            outcome: PhaseOutcome::Retried {
                attempt,
                summary: summary.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn failed(phase: Phase, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            outcome: PhaseOutcome::Failed {
                kind,
                message: message.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn is_completion(&self) -> bool {
        self.outcome == PhaseOutcome::Completed
    }
}

/// Failure details kept on the record of a FAILED workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub kind: FailureKind,
    pub phase: Phase,
    pub message: String,
}

/// Durable record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub issue_reference: IssueNumber,
    #[serde(default)]
    pub classification: IssueClass,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub plan_location: Option<String>,
    pub current_phase: Phase,
    #[serde(default)]
    pub phase_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub issue_title: Option<String>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub failure: Option<WorkflowFailure>,
    /// Bumped by every successful save; detects concurrent writers.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(workflow_id: WorkflowId, issue_reference: IssueNumber) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            issue_reference,
            classification: IssueClass::Unclassified,
            branch_name: None,
            plan_location: None,
            current_phase: Phase::Plan,
            phase_history: Vec::new(),
            retry_count: 0,
            issue_title: None,
            pr_url: None,
            failure: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// Phases with a completion entry, in history order.
    pub fn completed_phases(&self) -> Vec<Phase> {
        self.phase_history
            .iter()
            .filter(|e| e.is_completion())
            .map(|e| e.phase)
            .collect()
    }

    pub fn retry_entries(&self) -> usize {
        self.phase_history
            .iter()
            .filter(|e| matches!(e.outcome, PhaseOutcome::Retried { .. }))
            .count()
    }
}

/// Lowercase slug of `title`: ASCII alphanumerics kept, everything else
/// collapsed to single dashes, cut to at most `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

pub const BRANCH_SLUG_LEN: usize = 30;

/// `{class}-issue-{n}-adw-{id}-{slug}`. The class segment reads `issue` until
/// classification is known.
pub fn branch_name(
    workflow_id: &WorkflowId,
    issue: IssueNumber,
    class: IssueClass,
    title: &str,
) -> String {
    let prefix = match class {
        IssueClass::Unclassified => "issue",
        other => other.as_str(),
    };
    let slug = slugify(title, BRANCH_SLUG_LEN);
    if slug.is_empty() {
        format!("{}-issue-{}-adw-{}", prefix, issue.0, workflow_id)
    } else {
        format!("{}-issue-{}-adw-{}-{}", prefix, issue.0, workflow_id, slug)
    }
}
