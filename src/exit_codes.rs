//! Stable exit codes for adw CLI commands.

use crate::errors::{CollaboratorError, StoreError, WorkflowError};

/// Command succeeded (including a phase command that had nothing to do).
pub const OK: u8 = 0;
/// Invalid input, unknown workflow, workflow already terminal, or any other error.
pub const INVALID: u8 = 1;
/// The issue could not be classified.
pub const CLASSIFICATION: u8 = 2;
/// The agent or repository could not be reached; the workflow is resumable.
pub const UNAVAILABLE: u8 = 3;
/// The workflow moved to FAILED.
pub const WORKFLOW_FAILED: u8 = 4;
/// Duplicate workflow or concurrent modification.
pub const STORE_VIOLATION: u8 = 5;

fn for_store(err: &StoreError) -> u8 {
    match err {
        StoreError::DuplicateWorkflow { .. }
        | StoreError::ConcurrentModification { .. }
        | StoreError::InvalidTransition { .. }
        | StoreError::ImmutableField { .. } => STORE_VIOLATION,
        StoreError::NotFound { .. } | StoreError::Io { .. } | StoreError::Corrupt { .. } => INVALID,
    }
}

pub fn for_workflow(err: &WorkflowError) -> u8 {
    match err {
        WorkflowError::ClassificationFailure { .. } => CLASSIFICATION,
        WorkflowError::CollaboratorUnavailable(_) => UNAVAILABLE,
        WorkflowError::RetryExhausted { .. }
        | WorkflowError::FatalCollaborator(_)
        | WorkflowError::MissingArtifact { .. } => WORKFLOW_FAILED,
        WorkflowError::AlreadyTerminal { .. } | WorkflowError::IssueMismatch { .. } => INVALID,
        WorkflowError::Store(e) => for_store(e),
    }
}

/// Map an error surfaced by a command to its exit code.
pub fn for_error(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<WorkflowError>() {
            return for_workflow(e);
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return for_store(e);
        }
        if let Some(e) = cause.downcast_ref::<CollaboratorError>()
            && e.is_unavailable()
        {
            return UNAVAILABLE;
        }
    }
    INVALID
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Collaborator;
    use crate::state::{IssueNumber, WorkflowId};
    use anyhow::Context;

    #[test]
    fn maps_workflow_errors() {
        let err = anyhow::Error::new(WorkflowError::ClassificationFailure {
            issue: IssueNumber(1),
            message: "0".into(),
        });
        assert_eq!(for_error(&err), CLASSIFICATION);

        let err = anyhow::Error::new(WorkflowError::from(CollaboratorError::unavailable(
            Collaborator::Agent,
            "down",
        )));
        assert_eq!(for_error(&err), UNAVAILABLE);

        let err = anyhow::Error::new(WorkflowError::RetryExhausted {
            attempts: 5,
            last_failure: "x".into(),
        });
        assert_eq!(for_error(&err), WORKFLOW_FAILED);
    }

    #[test]
    fn looks_through_context() {
        let err: anyhow::Result<()> = Err(StoreError::DuplicateWorkflow {
            issue: IssueNumber(2),
            workflow_id: WorkflowId::generate(),
        })
        .context("creating workflow");
        assert_eq!(for_error(&err.unwrap_err()), STORE_VIOLATION);
    }

    #[test]
    fn unknown_errors_are_invalid() {
        assert_eq!(for_error(&anyhow::anyhow!("bad flag")), INVALID);
        let err = anyhow::Error::new(WorkflowError::Store(StoreError::NotFound {
            workflow_id: "x".into(),
        }));
        assert_eq!(for_error(&err), INVALID);
    }
}
