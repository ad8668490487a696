//! End-to-end workflow scenarios against deterministic collaborators.

use std::sync::Arc;

use adw::errors::{Collaborator, CollaboratorError, StoreError, WorkflowError};
use adw::state::{
    FailureKind, IssueClass, IssueNumber, Phase, PhaseOutcome, WorkflowState, WorkflowStore,
};
use adw::test_support::{FAILING_TESTS, Harness, StubReply};
use adw::trigger::{Disposition, EventKind, EventSource, Ingestor, TriggerEvent};
use adw::workflow::RetryPolicy;

fn completed_phases(state: &WorkflowState) -> Vec<Phase> {
    state
        .phase_history
        .iter()
        .filter(|e| e.is_completion())
        .map(|e| e.phase)
        .collect()
}

fn failing(n: usize) -> Vec<StubReply> {
    vec![StubReply::Ok(FAILING_TESTS.to_string()); n]
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn feature_issue_recovers_from_two_test_failures() {
        let h = Harness::new();
        h.agent.script("/test", failing(2));

        let state = h
            .orchestrator
            .start(IssueNumber(1), Phase::Document)
            .await
            .unwrap();

        assert_eq!(state.current_phase, Phase::Done);
        assert_eq!(state.classification, IssueClass::Feature);
        assert_eq!(state.retry_count, 2);
        assert_eq!(
            completed_phases(&state),
            vec![Phase::Plan, Phase::Build, Phase::Test, Phase::Review, Phase::Document]
        );
        let retries: Vec<u32> = state
            .phase_history
            .iter()
            .filter_map(|e| match &e.outcome {
                PhaseOutcome::Retried { attempt, .. } => {
                    assert_eq!(e.phase, Phase::Test);
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(state.phase_history.len(), 7);

        assert_eq!(h.agent.count("/test"), 3);
        assert_eq!(h.agent.count("/resolve_failed_test"), 2);
        assert!(h.repo.comments().iter().any(|c| c.contains("Workflow complete")));
    }

    #[tokio::test]
    async fn five_test_failures_exhaust_retries() {
        let h = Harness::new();
        h.agent.script("/test", failing(5));

        let err = h
            .orchestrator
            .start(IssueNumber(2), Phase::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RetryExhausted { attempts: 5, .. }));

        let state = h.only_workflow();
        assert_eq!(state.current_phase, Phase::Failed);
        let failure = state.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::RetryExhausted);
        assert_eq!(failure.phase, Phase::Test);
        assert!(
            state
                .phase_history
                .iter()
                .all(|e| e.phase != Phase::Review && e.phase != Phase::Document)
        );

        assert_eq!(h.agent.count("/test"), 5);
        assert_eq!(h.agent.count("/resolve_failed_test"), 4);
        assert_eq!(h.agent.count("/review"), 0);

        let last = h.repo.comments().last().cloned().unwrap();
        assert!(last.starts_with("[ADW-BOT]"), "{last}");
        assert!(last.contains("TEST"), "{last}");
        assert!(last.contains("RetryExhausted"), "{last}");
    }

    #[tokio::test]
    async fn retry_cap_comes_from_policy() {
        let h = Harness::with_policy(RetryPolicy::new(1));
        h.agent.script("/test", failing(2));

        let err = h
            .orchestrator
            .start(IssueNumber(3), Phase::Test)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RetryExhausted { attempts: 2, .. }));
        assert_eq!(h.agent.count("/test"), 2);
    }

    #[tokio::test]
    async fn phase_order_never_regresses() {
        let h = Harness::new();
        h.agent.script("/test", failing(1));
        let state = h
            .orchestrator
            .start(IssueNumber(4), Phase::Document)
            .await
            .unwrap();

        let phases: Vec<Phase> = state.phase_history.iter().map(|e| e.phase).collect();
        assert!(phases.windows(2).all(|w| w[0] <= w[1]), "{phases:?}");
    }
}

mod resumption {
    use super::*;

    #[tokio::test]
    async fn resume_runs_only_remaining_phases() {
        let h = Harness::new();
        let state = h
            .orchestrator
            .start(IssueNumber(5), Phase::Build)
            .await
            .unwrap();
        assert_eq!(state.current_phase, Phase::Test);
        assert_eq!(
            h.agent.commands(),
            vec!["/classify_issue", "/feature", "/implement"]
        );

        let state = h.orchestrator.resume(&state.workflow_id).await.unwrap();
        assert_eq!(state.current_phase, Phase::Done);
        assert_eq!(
            h.agent.commands(),
            vec![
                "/classify_issue",
                "/feature",
                "/implement",
                "/test",
                "/review",
                "/document"
            ]
        );
    }

    #[tokio::test]
    async fn advancing_to_a_completed_phase_is_a_noop() {
        let h = Harness::new();
        let state = h
            .orchestrator
            .start(IssueNumber(6), Phase::Build)
            .await
            .unwrap();
        let calls = h.agent.commands().len();

        let again = h
            .orchestrator
            .advance(&state.workflow_id, Phase::Plan)
            .await
            .unwrap();
        assert_eq!(again.current_phase, Phase::Test);
        assert_eq!(again.revision, state.revision);
        assert_eq!(h.agent.commands().len(), calls);
    }

    #[tokio::test]
    async fn unavailable_repository_mid_build_is_resumable() {
        let h = Harness::new();
        let state = h
            .orchestrator
            .start(IssueNumber(7), Phase::Plan)
            .await
            .unwrap();
        let history_len = state.phase_history.len();

        h.repo.set_unavailable(true);
        let err = h
            .orchestrator
            .resume(&state.workflow_id)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CollaboratorUnavailable(_)));

        let stored = h.store.load(&state.workflow_id).unwrap();
        assert_eq!(stored.current_phase, Phase::Build);
        assert_eq!(stored.phase_history.len(), history_len);
        assert!(stored.failure.is_none());

        h.repo.set_unavailable(false);
        let done = h.orchestrator.resume(&state.workflow_id).await.unwrap();
        assert_eq!(done.current_phase, Phase::Done);
        assert_eq!(h.agent.count("/classify_issue"), 1);
    }

    #[tokio::test]
    async fn terminal_workflows_cannot_be_resumed() {
        let h = Harness::new();
        let created = h.store.create(IssueNumber(8)).unwrap();
        h.orchestrator
            .abandon(&created.workflow_id, "superseded")
            .await
            .unwrap();

        let err = h.orchestrator.resume(&created.workflow_id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyTerminal { phase: Phase::Failed, .. }));
        assert!(h.repo.comments().iter().any(|c| c.contains("superseded")));

        // A terminal workflow frees the issue for a new one.
        let next = h.store.create(IssueNumber(8)).unwrap();
        assert_ne!(next.workflow_id, created.workflow_id);
    }
}

mod triggering {
    use super::*;

    #[test]
    fn duplicate_create_is_rejected_while_active() {
        let h = Harness::new();
        let first = h.store.create(IssueNumber(9)).unwrap();
        match h.store.create(IssueNumber(9)) {
            Err(StoreError::DuplicateWorkflow { workflow_id, .. }) => {
                assert_eq!(workflow_id, first.workflow_id)
            }
            other => panic!("expected DuplicateWorkflow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_identical_events_yield_one_workflow() {
        let h = Harness::new();
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());
        let event = TriggerEvent::new(
            EventSource::Webhook,
            IssueNumber(10),
            EventKind::IssueOpened,
            Some("delivery-1"),
        );

        let (a, b) = tokio::join!(ingestor.submit(event.clone()), ingestor.submit(event));
        let outcomes = [a.unwrap(), b.unwrap()];
        let started = outcomes
            .iter()
            .filter(|d| matches!(d, Disposition::Started(_)))
            .count();
        assert_eq!(started, 1);

        drop(ingestor);
        handle.await.unwrap();
        assert_eq!(h.store.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_and_cron_events_for_one_issue_share_a_workflow() {
        let h = Harness::new();
        // Keep the workflow parked in PLAN so it is still active for the
        // second event.
        h.agent.script(
            "/classify_issue",
            vec![StubReply::Err(CollaboratorError::unavailable(
                Collaborator::Agent,
                "agent offline",
            ))],
        );
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());

        let from_webhook =
            TriggerEvent::new(EventSource::Webhook, IssueNumber(11), EventKind::IssueOpened, None);
        let from_cron =
            TriggerEvent::new(EventSource::Cron, IssueNumber(11), EventKind::Comment, Some("77"));
        let first = ingestor.submit(from_webhook).await.unwrap();
        let second = ingestor.submit(from_cron).await.unwrap();

        assert!(matches!(first, Disposition::Started(_)));
        assert_eq!(second.workflow_id(), first.workflow_id());

        drop(ingestor);
        handle.await.unwrap();
        let only = h.only_workflow();
        assert_eq!(only.current_phase, Phase::Plan);
        assert_eq!(Some(&only.workflow_id), first.workflow_id());
    }

    #[tokio::test]
    async fn different_issues_run_independently() {
        let h = Harness::new();
        let (ingestor, handle) = Ingestor::spawn(h.orchestrator.clone());
        let ingestor = Arc::new(ingestor);

        let mut submits = Vec::new();
        for n in 20..24 {
            let ingestor = ingestor.clone();
            submits.push(tokio::spawn(async move {
                ingestor
                    .submit(TriggerEvent::new(
                        EventSource::Webhook,
                        IssueNumber(n),
                        EventKind::IssueOpened,
                        None,
                    ))
                    .await
            }));
        }
        for submit in submits {
            assert!(matches!(submit.await.unwrap().unwrap(), Disposition::Started(_)));
        }

        drop(ingestor);
        handle.await.unwrap();
        let all = h.store.list_all().unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.current_phase == Phase::Done));
        let mut branches: Vec<_> = all.iter().filter_map(|s| s.branch_name.clone()).collect();
        branches.sort();
        branches.dedup();
        assert_eq!(branches.len(), 4);
    }
}
