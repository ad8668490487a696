//! Phase commands: `adw plan|build|test|review|document|plan-build|plan-build-test|sdlc`.

use anyhow::Result;
use console::style;

use adw::config::AdwConfig;
use adw::state::{IssueNumber, Phase, WorkflowId, WorkflowState, WorkflowStore};

use super::Runtime;

/// Run a workflow from its persisted phase up to and including `through`.
///
/// With `--workflow-id` the named workflow is used and must belong to
/// `issue`. Without it the issue's active workflow is resumed, or a new one
/// is created when there is none.
pub async fn cmd_phase(
    config: &AdwConfig,
    issue: IssueNumber,
    workflow_id: Option<&WorkflowId>,
    through: Phase,
) -> Result<()> {
    let runtime = Runtime::build(config).await?;
    let orchestrator = &runtime.orchestrator;

    let existing = match workflow_id {
        Some(id) => Some(orchestrator.load_for_issue(id, issue)?),
        None => runtime.store.find_active(issue)?,
    };

    let state = match existing {
        Some(state) if state.current_phase == Phase::Done => {
            println!(
                "{} Workflow {} already completed; nothing to do.",
                style("✓").green(),
                state.workflow_id
            );
            state
        }
        Some(state) => {
            if state.current_phase > through {
                println!(
                    "{} Workflow {} is already past {}; nothing to do.",
                    style("✓").green(),
                    state.workflow_id,
                    through
                );
            }
            orchestrator.advance(&state.workflow_id, through).await?
        }
        None => orchestrator.start(issue, through).await?,
    };

    print_summary(&state);
    Ok(())
}

pub fn print_summary(state: &WorkflowState) {
    let phase = match state.current_phase {
        Phase::Done => style(state.current_phase.as_str()).green().bold(),
        Phase::Failed => style(state.current_phase.as_str()).red().bold(),
        _ => style(state.current_phase.as_str()).cyan().bold(),
    };
    println!();
    println!("  Workflow:  {}", style(&state.workflow_id).bold());
    println!("  Issue:     {}", state.issue_reference);
    println!("  Phase:     {}", phase);
    println!("  Class:     {}", state.classification.as_str());
    if let Some(branch) = &state.branch_name {
        println!("  Branch:    {}", branch);
    }
    if let Some(plan) = &state.plan_location {
        println!("  Plan:      {}", plan);
    }
    if let Some(pr) = &state.pr_url {
        println!("  PR:        {}", pr);
    }
    if state.current_phase == Phase::Test || state.retry_count > 0 {
        println!("  Retries:   {}", state.retry_count);
    }
    if let Some(failure) = &state.failure {
        println!(
            "  Failure:   {} during {}: {}",
            style(failure.kind).red(),
            failure.phase,
            failure.message
        );
    }
    println!();
}
