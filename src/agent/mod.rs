//! Agent invoker port.
//!
//! Phases talk to the code-generation agent only through [`AgentInvoker`].
//! [`ClaudeInvoker`] binds it to the `claude` CLI; tests substitute a
//! deterministic stub.

pub mod claude;
pub mod stream;

pub use claude::ClaudeInvoker;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::errors::CollaboratorError;
use crate::state::WorkflowId;

pub const AGENT_CLASSIFIER: &str = "issue_classifier";
pub const AGENT_PLANNER: &str = "sdlc_planner";
pub const AGENT_IMPLEMENTOR: &str = "sdlc_implementor";
pub const AGENT_TESTER: &str = "test_runner";
pub const AGENT_TEST_RESOLVER: &str = "test_resolver";
pub const AGENT_REVIEWER: &str = "code_reviewer";
pub const AGENT_DOCUMENTER: &str = "documenter";
/// Name used for orchestration messages that come from no particular agent.
pub const AGENT_OPS: &str = "ops";

/// A slash command for the agent, plus positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub workflow_id: WorkflowId,
    pub agent_name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl AgentRequest {
    pub fn new(workflow_id: &WorkflowId, agent_name: &str, command: &str) -> Self {
        Self {
            workflow_id: workflow_id.clone(),
            agent_name: agent_name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `"/command arg1 arg2"` as handed to the agent.
    pub fn prompt(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub output: String,
    /// False when the agent ran but reported that it failed.
    pub success: bool,
    pub session_id: Option<String>,
}

impl AgentResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            session_id: None,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            session_id: None,
        }
    }
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Blocks until the agent answers. Spawn or connectivity problems are
    /// `Unavailable`; a crashed agent is `Fatal`.
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, CollaboratorError>;
}

/// Strip surrounding Markdown code fences from agent output.
pub fn strip_code_fences(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a JSON payload out of agent output, tolerating code fences and
/// leading prose before the first `{` or `[`.
pub fn parse_json_output<T: DeserializeOwned>(output: &str) -> Result<T, serde_json::Error> {
    let body = strip_code_fences(output);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first_err) => match body.find(['{', '[']) {
            Some(start) if start > 0 => serde_json::from_str(&body[start..]),
            _ => Err(first_err),
        },
    }
}

/// Last non-empty line of agent output, with wrapping backticks removed.
pub fn last_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(|l| l.trim().trim_matches('`').trim())
        .rfind(|l| !l.is_empty())
        .map(str::to_string)
}
