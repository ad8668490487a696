//! Typed error hierarchy for the workflow engine.
//!
//! One enum per subsystem:
//! - `StoreError`: workflow state store contract violations and I/O
//! - `CollaboratorError`: agent invoker and repository adapter failures
//! - `WorkflowError`: phase orchestration failures
//! - `TriggerError`: webhook / cron ingestion failures

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{FailureKind, IssueNumber, Phase, WorkflowId};

/// Errors from the workflow state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Workflow {workflow_id} not found")]
    NotFound { workflow_id: String },

    #[error("Issue {issue} already has an active workflow {workflow_id}")]
    DuplicateWorkflow {
        issue: IssueNumber,
        workflow_id: WorkflowId,
    },

    #[error("Workflow {workflow_id} was modified concurrently")]
    ConcurrentModification { workflow_id: WorkflowId },

    #[error("Invalid phase transition for workflow {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        workflow_id: WorkflowId,
        from: Phase,
        to: Phase,
    },

    #[error("Field '{field}' of workflow {workflow_id} is immutable once set")]
    ImmutableField {
        workflow_id: WorkflowId,
        field: &'static str,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// The external collaborator an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Agent,
    Repository,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collaborator::Agent => write!(f, "agent"),
            Collaborator::Repository => write!(f, "repository"),
        }
    }
}

/// Errors surfaced by the agent invoker or the repository adapter.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached. Retried by whoever invoked the
    /// command, never inside the orchestrator.
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: Collaborator,
        message: String,
    },

    /// The collaborator was reached but the operation failed for good.
    #[error("{collaborator} failed: {message}")]
    Fatal {
        collaborator: Collaborator,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator,
            message: message.into(),
        }
    }

    pub fn fatal(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::Fatal {
            collaborator,
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors from running workflow phases.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Could not classify issue {issue}: {message}")]
    ClassificationFailure { issue: IssueNumber, message: String },

    #[error(transparent)]
    CollaboratorUnavailable(CollaboratorError),

    #[error("Tests still failing after {attempts} attempts: {last_failure}")]
    RetryExhausted { attempts: u32, last_failure: String },

    #[error(transparent)]
    FatalCollaborator(CollaboratorError),

    #[error("Phase {phase} produced no {artifact}")]
    MissingArtifact { phase: Phase, artifact: &'static str },

    #[error("Workflow {workflow_id} is already terminal ({phase})")]
    AlreadyTerminal { workflow_id: WorkflowId, phase: Phase },

    #[error("Workflow {workflow_id} belongs to issue {actual}, not {expected}")]
    IssueMismatch {
        workflow_id: WorkflowId,
        expected: IssueNumber,
        actual: IssueNumber,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CollaboratorError> for WorkflowError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_unavailable() {
            WorkflowError::CollaboratorUnavailable(err)
        } else {
            WorkflowError::FatalCollaborator(err)
        }
    }
}

impl WorkflowError {
    /// The failure kind recorded when this error moves a workflow to FAILED.
    /// `None` for errors that must leave the persisted phase untouched.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            WorkflowError::ClassificationFailure { .. } => Some(FailureKind::ClassificationFailure),
            WorkflowError::RetryExhausted { .. } => Some(FailureKind::RetryExhausted),
            WorkflowError::FatalCollaborator(_) => Some(FailureKind::FatalCollaborator),
            WorkflowError::MissingArtifact { .. } => Some(FailureKind::MissingArtifact),
            WorkflowError::CollaboratorUnavailable(_)
            | WorkflowError::AlreadyTerminal { .. }
            | WorkflowError::IssueMismatch { .. }
            | WorkflowError::Store(_) => None,
        }
    }
}

/// Errors from trigger ingestion (webhook and cron).
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Malformed trigger event: {0}")]
    Malformed(String),

    #[error("Trigger event failed authentication")]
    Unauthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_error_maps_to_workflow_error_by_severity() {
        let unavailable = CollaboratorError::unavailable(Collaborator::Agent, "spawn failed");
        let fatal = CollaboratorError::fatal(Collaborator::Repository, "push rejected");

        assert!(matches!(
            WorkflowError::from(unavailable),
            WorkflowError::CollaboratorUnavailable(_)
        ));
        assert!(matches!(
            WorkflowError::from(fatal),
            WorkflowError::FatalCollaborator(_)
        ));
    }

    #[test]
    fn unavailable_errors_never_mark_a_workflow_failed() {
        let err = WorkflowError::CollaboratorUnavailable(CollaboratorError::unavailable(
            Collaborator::Repository,
            "connection refused",
        ));
        assert!(err.failure_kind().is_none());
    }

    #[test]
    fn retry_exhausted_carries_attempts() {
        let err = WorkflowError::RetryExhausted {
            attempts: 5,
            last_failure: "unit".into(),
        };
        assert_eq!(err.failure_kind(), Some(FailureKind::RetryExhausted));
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn collaborator_error_display_names_the_collaborator() {
        let err = CollaboratorError::fatal(Collaborator::Agent, "exit code 2");
        assert_eq!(err.to_string(), "agent failed: exit code 2");
    }

    #[test]
    fn store_error_converts_into_workflow_error() {
        let err: WorkflowError = StoreError::NotFound {
            workflow_id: "abc".into(),
        }
        .into();
        assert!(matches!(err, WorkflowError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::NotFound {
            workflow_id: "x".into(),
        });
        assert_std_error(&CollaboratorError::fatal(Collaborator::Agent, "x"));
        assert_std_error(&TriggerError::Unauthenticated);
    }
}
