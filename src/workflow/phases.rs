//! Phase operations. Each one talks to collaborators only through the agent
//! and repository ports and records every interaction in the audit log.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::orchestrator::Orchestrator;
use super::report::{
    DocumentationReport, ReviewReport, TestResult, format_documentation_comment,
    format_review_comment, summarize_test_failures,
};
use super::retry::{AttemptFailure, AttemptResult, RetryOutcome, RetryableOperation, run_with_retry};
use crate::agent::{
    AGENT_CLASSIFIER, AGENT_DOCUMENTER, AGENT_IMPLEMENTOR, AGENT_OPS, AGENT_PLANNER,
    AGENT_REVIEWER, AGENT_TEST_RESOLVER, AGENT_TESTER, AgentRequest, AgentResponse, last_line,
    parse_json_output,
};
use crate::audit::{AuditEntry, InteractionOutcome};
use crate::errors::{Collaborator, CollaboratorError, WorkflowError};
use crate::repo::Issue;
use crate::state::{IssueClass, Phase, WorkflowState, branch_name};

impl Orchestrator {
    pub(super) async fn execute_phase(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        match state.current_phase {
            Phase::Plan => self.plan(state).await,
            Phase::Build => self.build(state).await,
            Phase::Test => self.test(state).await,
            Phase::Review => self.review(state).await,
            Phase::Document => self.document(state).await,
            Phase::Done | Phase::Failed => Ok(()),
        }
    }

    fn record(&self, state: &WorkflowState, entry: AuditEntry) {
        if let Err(e) = self.audit.record(&state.workflow_id, &entry) {
            warn!(workflow_id = %state.workflow_id, error = %e, "could not write audit entry");
        }
    }

    /// Invoke the agent and audit the exchange.
    async fn call_agent(
        &self,
        state: &WorkflowState,
        request: AgentRequest,
    ) -> Result<AgentResponse, CollaboratorError> {
        let entry = AuditEntry::new(
            state.current_phase,
            Collaborator::Agent,
            &request.command,
            request.prompt(),
        )
        .with_agent(&request.agent_name);
        let result = self.agent.invoke(&request).await;
        let entry = match &result {
            Ok(resp) if resp.success => entry.finish(InteractionOutcome::Success, &resp.output),
            Ok(resp) => entry.finish(InteractionOutcome::Failure, &resp.output),
            Err(e) => entry.finish(outcome_of(e), e.to_string()),
        };
        self.record(state, entry);
        result
    }

    /// Agent call whose non-success answer is fatal for the phase.
    async fn require_agent(
        &self,
        state: &WorkflowState,
        request: AgentRequest,
    ) -> Result<AgentResponse, WorkflowError> {
        let command = request.command.clone();
        let resp = self.call_agent(state, request).await?;
        if !resp.success {
            return Err(WorkflowError::FatalCollaborator(CollaboratorError::fatal(
                Collaborator::Agent,
                format!("{} reported failure: {}", command, resp.output),
            )));
        }
        Ok(resp)
    }

    async fn repo_call<T, F>(
        &self,
        state: &WorkflowState,
        operation: &str,
        request: &str,
        fut: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
        T: std::fmt::Debug,
    {
        let entry = AuditEntry::new(state.current_phase, Collaborator::Repository, operation, request);
        let result = fut.await;
        let entry = match &result {
            Ok(value) => entry.finish(InteractionOutcome::Success, format!("{:?}", value)),
            Err(e) => entry.finish(outcome_of(e), e.to_string()),
        };
        self.record(state, entry);
        result
    }

    fn branch(state: &WorkflowState) -> Result<String, WorkflowError> {
        state.branch_name.clone().ok_or(WorkflowError::MissingArtifact {
            phase: state.current_phase,
            artifact: "branch",
        })
    }

    async fn checkout_branch(&self, state: &WorkflowState) -> Result<String, WorkflowError> {
        let branch = Self::branch(state)?;
        self.repo_call(state, "checkout", &branch, self.repo.checkout(&branch))
            .await?;
        Ok(branch)
    }

    /// Commit with `{agent}: {class}: {title}` and push the workflow branch.
    async fn commit_and_push(&self, state: &WorkflowState, agent: &str) -> Result<(), WorkflowError> {
        let branch = Self::branch(state)?;
        let title = state.issue_title.as_deref().unwrap_or("untitled");
        let message = format!("{}: {}: {}", agent, state.classification, title);
        let committed = self
            .repo_call(state, "commit", &message, self.repo.commit(&message))
            .await?;
        if !committed {
            debug!(workflow_id = %state.workflow_id, agent, "nothing to commit");
        }
        self.repo_call(state, "push", &branch, self.repo.push(&branch))
            .await?;
        Ok(())
    }

    async fn ensure_pr(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let branch = Self::branch(state)?;
        let title = format!(
            "{}: #{} - {}",
            state.classification,
            state.issue_reference.0,
            state.issue_title.as_deref().unwrap_or("untitled")
        );
        let mut body = format!(
            "Closes #{}\n\nADW ID: {}",
            state.issue_reference.0, state.workflow_id
        );
        if let Some(plan) = &state.plan_location {
            body.push_str(&format!("\nPlan: `{}`", plan));
        }
        let url = self
            .repo_call(
                state,
                "ensure_pull_request",
                &branch,
                self.repo.ensure_pull_request(&branch, &title, &body),
            )
            .await?;
        state.pr_url = Some(url);
        Ok(())
    }

    async fn fetch_issue(&self, state: &WorkflowState) -> Result<Issue, WorkflowError> {
        let issue = state.issue_reference;
        Ok(self
            .repo_call(state, "fetch_issue", &issue.to_string(), self.repo.fetch_issue(issue))
            .await?)
    }

    async fn classify(&self, state: &WorkflowState, issue_json: &str) -> Result<IssueClass, WorkflowError> {
        let request = AgentRequest::new(&state.workflow_id, AGENT_CLASSIFIER, "/classify_issue")
            .arg(issue_json);
        let resp = self.call_agent(state, request).await?;
        let class = resp
            .success
            .then(|| IssueClass::from_classifier_output(&resp.output))
            .flatten();
        class.ok_or_else(|| WorkflowError::ClassificationFailure {
            issue: state.issue_reference,
            message: format!("classifier answered '{}'", resp.output.trim()),
        })
    }

    async fn plan(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        self.notify(state, AGENT_OPS, "✅ Starting planning phase").await;

        let issue = self.fetch_issue(state).await?;
        state.issue_title = Some(issue.title.clone());
        let issue_json = serde_json::json!({
            "number": issue.number.0,
            "title": issue.title,
            "body": issue.body,
        })
        .to_string();

        if state.classification == IssueClass::Unclassified {
            state.classification = self.classify(state, &issue_json).await?;
            info!(workflow_id = %state.workflow_id, class = %state.classification, "issue classified");
            self.notify(
                state,
                AGENT_OPS,
                &format!("✅ Issue classified as: {}", state.classification),
            )
            .await;
        }

        let branch = match &state.branch_name {
            Some(branch) => branch.clone(),
            None => {
                let branch = branch_name(
                    &state.workflow_id,
                    state.issue_reference,
                    state.classification,
                    &issue.title,
                );
                state.branch_name = Some(branch.clone());
                branch
            }
        };
        self.repo_call(state, "create_branch", &branch, self.repo.create_branch(&branch))
            .await?;

        let Some(command) = state.classification.plan_command() else {
            return Err(WorkflowError::ClassificationFailure {
                issue: state.issue_reference,
                message: "no classification available for planning".into(),
            });
        };
        let request = AgentRequest::new(&state.workflow_id, AGENT_PLANNER, command)
            .arg(state.issue_reference.0.to_string())
            .arg(state.workflow_id.as_str())
            .arg(&issue_json);
        let resp = self.require_agent(state, request).await?;
        let plan = last_line(&resp.output).ok_or(WorkflowError::MissingArtifact {
            phase: Phase::Plan,
            artifact: "plan file",
        })?;
        state.plan_location = Some(plan.clone());

        self.commit_and_push(state, AGENT_PLANNER).await?;
        self.ensure_pr(state).await?;
        self.notify(state, AGENT_PLANNER, &format!("✅ Plan created: `{}`", plan))
            .await;
        Ok(())
    }

    async fn build(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let plan = state
            .plan_location
            .clone()
            .ok_or(WorkflowError::MissingArtifact {
                phase: Phase::Build,
                artifact: "plan file",
            })?;
        self.checkout_branch(state).await?;
        self.notify(state, AGENT_IMPLEMENTOR, "✅ Implementing solution").await;

        let request =
            AgentRequest::new(&state.workflow_id, AGENT_IMPLEMENTOR, "/implement").arg(&plan);
        self.require_agent(state, request).await?;

        self.commit_and_push(state, AGENT_IMPLEMENTOR).await?;
        self.notify(state, AGENT_IMPLEMENTOR, "✅ Solution implemented")
            .await;
        Ok(())
    }

    async fn test(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        self.checkout_branch(state).await?;
        self.notify(state, AGENT_TESTER, "✅ Running tests").await;

        let op = TestOperation { orchestrator: self };
        match run_with_retry(self.retry, self.store.as_ref(), state, &op).await? {
            RetryOutcome::Success { attempts } => {
                self.commit_and_push(state, AGENT_TESTER).await?;
                self.notify(
                    state,
                    AGENT_TESTER,
                    &format!("✅ All tests passed (attempt {})", attempts),
                )
                .await;
                Ok(())
            }
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => Err(WorkflowError::RetryExhausted {
                attempts,
                last_failure: last_failure.summary,
            }),
        }
    }

    async fn review(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        self.checkout_branch(state).await?;
        self.notify(state, AGENT_REVIEWER, "✅ Starting code review").await;

        let request = AgentRequest::new(&state.workflow_id, AGENT_REVIEWER, "/review");
        let resp = self.require_agent(state, request).await?;
        let report = parse_json_output::<ReviewReport>(&resp.output).unwrap_or_else(|e| {
            warn!(workflow_id = %state.workflow_id, error = %e, "review output was not JSON");
            ReviewReport::unparsed(&resp.output)
        });
        info!(
            workflow_id = %state.workflow_id,
            assessment = ?report.overall_assessment,
            issues = report.issues.len(),
            "review completed"
        );
        self.notify(state, AGENT_REVIEWER, &format_review_comment(&report))
            .await;

        self.commit_and_push(state, AGENT_REVIEWER).await?;
        Ok(())
    }

    async fn document(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        self.checkout_branch(state).await?;
        self.notify(state, AGENT_DOCUMENTER, "✅ Generating documentation")
            .await;

        let request = AgentRequest::new(&state.workflow_id, AGENT_DOCUMENTER, "/document");
        let resp = self.require_agent(state, request).await?;
        let report = parse_json_output::<DocumentationReport>(&resp.output).unwrap_or_else(|e| {
            warn!(workflow_id = %state.workflow_id, error = %e, "documentation output was not JSON");
            DocumentationReport::unparsed(&resp.output)
        });
        self.notify(state, AGENT_DOCUMENTER, &format_documentation_comment(&report))
            .await;

        self.commit_and_push(state, AGENT_DOCUMENTER).await?;
        self.ensure_pr(state).await?;
        Ok(())
    }
}

fn outcome_of(err: &CollaboratorError) -> InteractionOutcome {
    if err.is_unavailable() {
        InteractionOutcome::Unavailable
    } else {
        InteractionOutcome::Fatal
    }
}

/// One TEST attempt runs `/test`; remediation runs `/resolve_failed_test`.
struct TestOperation<'a> {
    orchestrator: &'a Orchestrator,
}

#[async_trait]
impl RetryableOperation for TestOperation<'_> {
    async fn attempt(&self, state: &WorkflowState) -> Result<AttemptResult, WorkflowError> {
        let request = AgentRequest::new(&state.workflow_id, AGENT_TESTER, "/test");
        let resp = self.orchestrator.call_agent(state, request).await?;
        if !resp.success {
            return Ok(AttemptResult::Failed(AttemptFailure {
                summary: "test runner reported failure".into(),
                details: resp.output,
            }));
        }
        let results = match parse_json_output::<Vec<TestResult>>(&resp.output) {
            Ok(results) => results,
            Err(e) => {
                return Ok(AttemptResult::Failed(AttemptFailure {
                    summary: format!("unparseable test output: {}", e),
                    details: resp.output,
                }));
            }
        };
        let failed: Vec<&TestResult> = results.iter().filter(|r| !r.passed).collect();
        if failed.is_empty() {
            return Ok(AttemptResult::Passed);
        }
        Ok(AttemptResult::Failed(AttemptFailure {
            summary: summarize_test_failures(&results),
            details: serde_json::to_string(&failed).unwrap_or_default(),
        }))
    }

    async fn resolve(
        &self,
        state: &WorkflowState,
        failure: &AttemptFailure,
    ) -> Result<(), WorkflowError> {
        let orch = self.orchestrator;
        orch.notify(
            state,
            AGENT_TESTER,
            &format!(
                "❌ {} (retry {}/{})",
                failure.summary,
                state.retry_count,
                orch.retry.max_retries
            ),
        )
        .await;

        let request = AgentRequest::new(&state.workflow_id, AGENT_TEST_RESOLVER, "/resolve_failed_test")
            .arg(&failure.details);
        match orch.call_agent(state, request).await {
            Ok(resp) if resp.success => {
                orch.commit_and_push(state, AGENT_TEST_RESOLVER).await?;
                Ok(())
            }
            Ok(resp) => {
                warn!(workflow_id = %state.workflow_id, output = %resp.output, "resolver reported failure");
                Ok(())
            }
            Err(e) if e.is_unavailable() => Err(e.into()),
            Err(e) => {
                // The next attempt decides; a broken resolver only costs budget.
                warn!(workflow_id = %state.workflow_id, error = %e, "resolver failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{IssueNumber, PhaseOutcome, WorkflowStore};
    use crate::test_support::{Harness, StubReply};

    #[tokio::test]
    async fn plan_classifies_branches_and_records_plan() {
        let h = Harness::new();
        let state = h.orchestrator.start(IssueNumber(1), Phase::Plan).await.unwrap();

        assert_eq!(state.current_phase, Phase::Build);
        assert_eq!(state.classification, IssueClass::Feature);
        let branch = state.branch_name.clone().unwrap();
        assert!(branch.starts_with("feature-issue-1-adw-"), "{branch}");
        assert_eq!(state.plan_location.as_deref(), Some("specs/plan.md"));
        assert!(state.pr_url.is_some());
        assert_eq!(h.repo.branches(), vec![branch.clone()]);
        assert_eq!(h.repo.pushes(), vec![branch]);
        assert_eq!(h.repo.commits(), vec!["sdlc_planner: feature: Add feature 1"]);
        assert_eq!(h.agent.commands(), vec!["/classify_issue", "/feature"]);
    }

    #[tokio::test]
    async fn classifier_zero_fails_the_workflow() {
        let h = Harness::new();
        h.agent
            .script("/classify_issue", vec![StubReply::Ok("0".into())]);
        let err = h
            .orchestrator
            .start(IssueNumber(4), Phase::Plan)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ClassificationFailure { .. }));

        let state = h.only_workflow();
        assert_eq!(state.current_phase, Phase::Failed);
        assert!(h.repo.comments().iter().any(|c| c.contains("ClassificationFailure")));
    }

    #[tokio::test]
    async fn empty_plan_output_is_missing_artifact() {
        let h = Harness::new();
        h.agent.script("/feature", vec![StubReply::Ok("   ".into())]);
        let err = h
            .orchestrator
            .start(IssueNumber(2), Phase::Plan)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingArtifact { phase: Phase::Plan, .. }));
    }

    #[tokio::test]
    async fn fatal_implementation_error_fails_build() {
        let h = Harness::new();
        h.agent.script(
            "/implement",
            vec![StubReply::Err(CollaboratorError::fatal(Collaborator::Agent, "crashed"))],
        );
        let err = h
            .orchestrator
            .start(IssueNumber(3), Phase::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::FatalCollaborator(_)));

        let state = h.only_workflow();
        assert_eq!(state.current_phase, Phase::Failed);
        let failure = state.failure.unwrap();
        assert_eq!(failure.phase, Phase::Build);
        assert!(matches!(
            state.phase_history.last().unwrap().outcome,
            PhaseOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn unavailable_agent_leaves_phase_resumable() {
        let h = Harness::new();
        h.agent.script(
            "/implement",
            vec![StubReply::Err(CollaboratorError::unavailable(
                Collaborator::Agent,
                "spawn failed",
            ))],
        );
        let err = h
            .orchestrator
            .start(IssueNumber(5), Phase::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CollaboratorUnavailable(_)));

        let stuck = h.only_workflow();
        assert_eq!(stuck.current_phase, Phase::Build);
        assert!(stuck.failure.is_none());

        let done = h.orchestrator.resume(&stuck.workflow_id).await.unwrap();
        assert_eq!(done.current_phase, Phase::Done);
        // PLAN ran exactly once across both invocations.
        assert_eq!(h.agent.count("/feature"), 1);
    }

    #[tokio::test]
    async fn review_findings_never_block_documentation() {
        let h = Harness::new();
        h.agent.script(
            "/review",
            vec![StubReply::Ok(
                r#"{"overall_assessment":"needs_changes","summary":"bad","issues":[{"severity":"critical","file":"a.rs","issue":"panic"}]}"#.into(),
            )],
        );
        let state = h
            .orchestrator
            .start(IssueNumber(6), Phase::Document)
            .await
            .unwrap();
        assert_eq!(state.current_phase, Phase::Done);
        assert!(h.repo.comments().iter().any(|c| c.contains("NEEDS CHANGES")));
    }

    #[tokio::test]
    async fn every_collaborator_call_is_audited() {
        let h = Harness::new();
        let state = h
            .orchestrator
            .start(IssueNumber(7), Phase::Build)
            .await
            .unwrap();
        let entries = h.audit().entries(&state.workflow_id).unwrap();
        let ops: Vec<&str> = entries.iter().map(|e| e.operation.as_str()).collect();
        assert!(ops.contains(&"/classify_issue"));
        assert!(ops.contains(&"/implement"));
        assert!(ops.contains(&"push"));
        assert!(h.store.load(&state.workflow_id).is_ok());
    }
}
