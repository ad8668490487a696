//! Phase orchestration: the resumable PLAN → DONE state machine, its phase
//! operations, the TEST retry controller and issue reporting.

pub mod orchestrator;
pub mod phases;
pub mod report;
pub mod retry;

pub use orchestrator::Orchestrator;
pub use retry::{RetryOutcome, RetryPolicy, RetryableOperation, run_with_retry};
