use std::sync::Arc;

use tracing::{error, info, warn};

use super::report::{format_completion, format_issue_message};
use super::retry::RetryPolicy;
use crate::agent::{AGENT_OPS, AgentInvoker};
use crate::audit::AuditLogger;
use crate::errors::{StoreError, WorkflowError};
use crate::repo::RepositoryAdapter;
use crate::state::{
    FailureKind, HistoryEntry, IssueNumber, Phase, WorkflowFailure, WorkflowId, WorkflowState,
    WorkflowStore,
};

/// Sequences PLAN → BUILD → TEST → REVIEW → DOCUMENT for one workflow at a
/// time, persisting after every transition.
pub struct Orchestrator {
    pub(super) store: Arc<dyn WorkflowStore>,
    pub(super) agent: Arc<dyn AgentInvoker>,
    pub(super) repo: Arc<dyn RepositoryAdapter>,
    pub(super) audit: AuditLogger,
    pub(super) retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        agent: Arc<dyn AgentInvoker>,
        repo: Arc<dyn RepositoryAdapter>,
        audit: AuditLogger,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            agent,
            repo,
            audit,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Load a workflow and check it belongs to `issue`.
    pub fn load_for_issue(
        &self,
        workflow_id: &WorkflowId,
        issue: IssueNumber,
    ) -> Result<WorkflowState, WorkflowError> {
        let state = self.store.load(workflow_id)?;
        if state.issue_reference != issue {
            return Err(WorkflowError::IssueMismatch {
                workflow_id: workflow_id.clone(),
                expected: issue,
                actual: state.issue_reference,
            });
        }
        Ok(state)
    }

    /// Run the workflow from its persisted phase up to and including
    /// `through`. Completed phases are never re-run; if `through` is already
    /// behind the workflow this is a no-op.
    pub async fn advance(
        &self,
        workflow_id: &WorkflowId,
        through: Phase,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.store.load(workflow_id)?;
        if state.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                workflow_id: workflow_id.clone(),
                phase: state.current_phase,
            });
        }

        while !state.is_terminal() && state.current_phase <= through {
            let phase = state.current_phase;
            info!(workflow_id = %workflow_id, issue = %state.issue_reference, phase = %phase, "entering phase");

            if let Err(err) = self.execute_phase(&mut state).await {
                return Err(self.handle_failure(&mut state, phase, err).await);
            }

            let Some(next) = phase.next() else {
                break;
            };
            state.current_phase = next;
            if next == Phase::Test {
                state.retry_count = 0;
            }
            self.store
                .save(&mut state, HistoryEntry::completed(phase))?;
            info!(workflow_id = %workflow_id, from = %phase, to = %next, "phase completed");

            if next == Phase::Done {
                self.notify(&state, AGENT_OPS, &format_completion(&state))
                    .await;
            }
        }

        Ok(state)
    }

    /// Resume at the persisted phase and run to completion.
    pub async fn resume(&self, workflow_id: &WorkflowId) -> Result<WorkflowState, WorkflowError> {
        self.advance(workflow_id, Phase::Document).await
    }

    /// Create a workflow for `issue` and run it through `through`.
    pub async fn start(
        &self,
        issue: IssueNumber,
        through: Phase,
    ) -> Result<WorkflowState, WorkflowError> {
        let state = self.store.create(issue)?;
        info!(workflow_id = %state.workflow_id, issue = %issue, "workflow created");
        self.advance(&state.workflow_id, through).await
    }

    /// Mark a workflow FAILED out-of-band.
    pub async fn abandon(
        &self,
        workflow_id: &WorkflowId,
        reason: &str,
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = self.store.load(workflow_id)?;
        if state.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                workflow_id: workflow_id.clone(),
                phase: state.current_phase,
            });
        }
        let phase = state.current_phase;
        self.mark_failed(&mut state, phase, FailureKind::Abandoned, reason)?;
        self.notify(
            &state,
            AGENT_OPS,
            &format!("🛑 Workflow abandoned during {}: {}", phase, reason),
        )
        .await;
        Ok(state)
    }

    fn mark_failed(
        &self,
        state: &mut WorkflowState,
        phase: Phase,
        kind: FailureKind,
        message: &str,
    ) -> Result<(), StoreError> {
        let before = (state.current_phase, state.failure.clone());
        state.current_phase = Phase::Failed;
        state.failure = Some(WorkflowFailure {
            kind,
            phase,
            message: message.to_string(),
        });
        if let Err(e) = self
            .store
            .save(state, HistoryEntry::failed(phase, kind, message))
        {
            (state.current_phase, state.failure) = before;
            return Err(e);
        }
        Ok(())
    }

    /// Decide what a phase error does to the record, report it, and hand the
    /// error back to the caller.
    async fn handle_failure(
        &self,
        state: &mut WorkflowState,
        phase: Phase,
        err: WorkflowError,
    ) -> WorkflowError {
        let Some(kind) = err.failure_kind() else {
            // Unavailable collaborators and store violations leave the record
            // untouched so a later resume retries the phase.
            warn!(
                workflow_id = %state.workflow_id,
                phase = %phase,
                error = %err,
                "phase interrupted, workflow left resumable"
            );
            if matches!(err, WorkflowError::CollaboratorUnavailable(_)) {
                self.notify(
                    state,
                    AGENT_OPS,
                    &format!("⏸️ {} interrupted, will resume: {}", phase, err),
                )
                .await;
            }
            return err;
        };

        let message = err.to_string();
        error!(
            workflow_id = %state.workflow_id,
            phase = %phase,
            kind = %kind,
            error = %message,
            "workflow failed"
        );
        if let Err(store_err) = self.mark_failed(state, phase, kind, &message) {
            error!(workflow_id = %state.workflow_id, error = %store_err, "could not record failure");
            return store_err.into();
        }
        self.notify(
            state,
            AGENT_OPS,
            &format!("❌ {} failed ({}): {}", phase, kind, message),
        )
        .await;
        err
    }

    /// Best-effort issue comment; failures are logged, never propagated.
    pub(super) async fn notify(&self, state: &WorkflowState, agent: &str, message: &str) {
        let body = format_issue_message(&state.workflow_id, agent, message);
        if let Err(e) = self.repo.comment(state.issue_reference, &body).await {
            warn!(workflow_id = %state.workflow_id, error = %e, "could not post issue comment");
        }
    }
}
