//! Workflow inspection and out-of-band failure: `adw status`, `adw abandon`.

use anyhow::{Context, Result};
use console::style;

use adw::audit::AuditLogger;
use adw::config::AdwConfig;
use adw::state::{PhaseOutcome, WorkflowId, WorkflowState, WorkflowStore};

use super::phase::print_summary;
use super::{Runtime, open_store};

pub fn cmd_status(
    config: &AdwConfig,
    workflow_id: Option<&WorkflowId>,
    all: bool,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;

    if let Some(id) = workflow_id {
        let state = store.load(id)?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&state).context("Failed to serialize workflow")?
            );
            return Ok(());
        }
        print_summary(&state);
        print_history(&state);
        let audit = AuditLogger::new(&config.state_dir);
        if let Ok(entries) = audit.entries(id) {
            println!("  {} collaborator interactions in {}", entries.len(), audit.audit_file(id).display());
            println!();
        }
        return Ok(());
    }

    let states = if all {
        store.list_all()?
    } else {
        store.list_active()?
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&states).context("Failed to serialize workflows")?
        );
        return Ok(());
    }

    if states.is_empty() {
        println!();
        println!("No {}workflows.", if all { "" } else { "active " });
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<14} {:<8} {:<10} {:<8} {:<22} Branch",
        "Workflow", "Issue", "Phase", "Retries", "Updated"
    );
    println!(
        "{:<14} {:<8} {:<10} {:<8} {:<22} ------",
        "--------", "-----", "-----", "-------", "-------"
    );
    for state in &states {
        println!(
            "{:<14} {:<8} {:<10} {:<8} {:<22} {}",
            state.workflow_id.as_str(),
            state.issue_reference.to_string(),
            state.current_phase.as_str(),
            state.retry_count,
            state.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            state.branch_name.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(())
}

fn print_history(state: &WorkflowState) {
    if state.phase_history.is_empty() {
        return;
    }
    println!("  History:");
    for entry in &state.phase_history {
        let outcome = match &entry.outcome {
            PhaseOutcome::Completed => style("completed".to_string()).green(),
            PhaseOutcome::Retried { attempt, summary } => {
                style(format!("retry after attempt {}: {}", attempt, summary)).yellow()
            }
            PhaseOutcome::Failed { kind, message } => {
                style(format!("failed ({}): {}", kind, message)).red()
            }
        };
        println!(
            "    {}  {:<9} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.phase.as_str(),
            outcome
        );
    }
    println!();
}

pub async fn cmd_abandon(config: &AdwConfig, workflow_id: &WorkflowId, reason: &str) -> Result<()> {
    let runtime = Runtime::build(config).await?;
    let state = runtime.orchestrator.abandon(workflow_id, reason).await?;
    println!(
        "{} Workflow {} abandoned.",
        style("✗").red(),
        state.workflow_id
    );
    print_summary(&state);
    Ok(())
}
