//! Bounded re-attempt policy for the TEST phase.
//!
//! A failed attempt is recorded (retry entry persisted, `retry_count`
//! incremented) before the remediation step runs, so partial progress is
//! always visible in the store.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::WorkflowError;
use crate::state::{HistoryEntry, WorkflowState, WorkflowStore};

pub const DEFAULT_MAX_RETRIES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-attempts after the first one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Why a single attempt did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub summary: String,
    /// Machine-readable details handed to the remediation step.
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Passed,
    Failed(AttemptFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Success { attempts: u32 },
    Exhausted { attempts: u32, last_failure: AttemptFailure },
}

/// An operation supervised by [`run_with_retry`].
///
/// Errors returned from either method abort the loop immediately; only
/// `AttemptResult::Failed` counts against the retry budget.
#[async_trait]
pub trait RetryableOperation: Send + Sync {
    async fn attempt(&self, state: &WorkflowState) -> Result<AttemptResult, WorkflowError>;

    async fn resolve(
        &self,
        state: &WorkflowState,
        failure: &AttemptFailure,
    ) -> Result<(), WorkflowError>;
}

/// Run `op` until it passes or the policy's retry budget is spent.
///
/// `state.retry_count` is the number of retries already used, so a workflow
/// resumed mid-TEST continues with its remaining budget.
pub async fn run_with_retry(
    policy: RetryPolicy,
    store: &dyn WorkflowStore,
    state: &mut WorkflowState,
    op: &dyn RetryableOperation,
) -> Result<RetryOutcome, WorkflowError> {
    let phase = state.current_phase;
    loop {
        let attempt = state.retry_count + 1;
        info!(
            workflow_id = %state.workflow_id,
            phase = %phase,
            attempt,
            max_attempts = policy.max_attempts(),
            "running attempt"
        );

        let failure = match op.attempt(state).await? {
            AttemptResult::Passed => return Ok(RetryOutcome::Success { attempts: attempt }),
            AttemptResult::Failed(failure) => failure,
        };

        if state.retry_count >= policy.max_retries {
            warn!(
                workflow_id = %state.workflow_id,
                attempts = attempt,
                "retry budget exhausted"
            );
            return Ok(RetryOutcome::Exhausted {
                attempts: attempt,
                last_failure: failure,
            });
        }

        state.retry_count += 1;
        if let Err(e) = store.save(
            state,
            HistoryEntry::retried(phase, attempt, failure.summary.clone()),
        ) {
            state.retry_count -= 1;
            return Err(e.into());
        }
        warn!(
            workflow_id = %state.workflow_id,
            attempt,
            retry_count = state.retry_count,
            summary = %failure.summary,
            "attempt failed, resolving before retry"
        );

        op.resolve(state, &failure).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FileStore, IssueNumber, Phase, PhaseOutcome};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fails the first `failures` attempts, then passes.
    struct Flaky {
        failures: u32,
        attempts: Mutex<u32>,
        resolutions: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: Mutex::new(0),
                resolutions: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RetryableOperation for Flaky {
        async fn attempt(&self, _state: &WorkflowState) -> Result<AttemptResult, WorkflowError> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts <= self.failures {
                Ok(AttemptResult::Failed(AttemptFailure {
                    summary: format!("failure {}", attempts),
                    details: "[]".into(),
                }))
            } else {
                Ok(AttemptResult::Passed)
            }
        }

        async fn resolve(
            &self,
            _state: &WorkflowState,
            _failure: &AttemptFailure,
        ) -> Result<(), WorkflowError> {
            *self.resolutions.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn test_state(store: &FileStore) -> WorkflowState {
        let mut state = store.create(IssueNumber(1)).unwrap();
        for phase in [Phase::Plan, Phase::Build] {
            state.current_phase = phase.next().unwrap();
            store.save(&mut state, HistoryEntry::completed(phase)).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn always_failing_operation_is_exhausted_after_five_attempts() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut state = test_state(&store);
        let op = Flaky::new(u32::MAX);

        let outcome = run_with_retry(RetryPolicy::default(), &store, &mut state, &op)
            .await
            .unwrap();

        match outcome {
            RetryOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(*op.attempts.lock().unwrap(), 5);
        assert_eq!(*op.resolutions.lock().unwrap(), 4);
        assert_eq!(state.retry_count, 4);
        assert_eq!(store.load(&state.workflow_id).unwrap().retry_entries(), 4);
    }

    #[tokio::test]
    async fn passes_on_third_attempt_with_two_retries() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut state = test_state(&store);
        let op = Flaky::new(2);

        let outcome = run_with_retry(RetryPolicy::default(), &store, &mut state, &op)
            .await
            .unwrap();

        assert_eq!(outcome, RetryOutcome::Success { attempts: 3 });
        assert_eq!(state.retry_count, 2);
        let persisted = store.load(&state.workflow_id).unwrap();
        let retries: Vec<u32> = persisted
            .phase_history
            .iter()
            .filter_map(|e| match e.outcome {
                PhaseOutcome::Retried { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(persisted.current_phase, Phase::Test);
    }

    #[tokio::test]
    async fn zero_retry_policy_makes_one_attempt() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut state = test_state(&store);
        let op = Flaky::new(u32::MAX);

        let outcome = run_with_retry(RetryPolicy::new(0), &store, &mut state, &op)
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(*op.resolutions.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn resumed_budget_counts_prior_retries() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut state = test_state(&store);
        state.retry_count = 3;
        let op = Flaky::new(u32::MAX);

        let outcome = run_with_retry(RetryPolicy::default(), &store, &mut state, &op)
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 5, .. }));
        assert_eq!(*op.attempts.lock().unwrap(), 2);
    }
}
