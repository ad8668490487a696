use super::AuditEntry;
use crate::state::WorkflowId;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUDIT_FILE: &str = "audit.jsonl";

/// Appends collaborator interactions to a JSON-lines file per workflow.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    state_dir: PathBuf,
}

impl AuditLogger {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
        }
    }

    pub fn audit_file(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.state_dir.join(workflow_id.as_str()).join(AUDIT_FILE)
    }

    pub fn record(&self, workflow_id: &WorkflowId, entry: &AuditEntry) -> Result<()> {
        let path = self.audit_file(workflow_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create workflow audit directory")?;
        }
        let line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        writeln!(file, "{}", line).context("Failed to append audit entry")?;
        Ok(())
    }

    pub fn entries(&self, workflow_id: &WorkflowId) -> Result<Vec<AuditEntry>> {
        let path = self.audit_file(workflow_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context("Failed to read audit log")?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Failed to parse audit entry"))
            .collect()
    }
}
