use crate::errors::Collaborator;
use crate::state::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw collaborator interaction, appended to `{workflow}/audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub collaborator: Collaborator,
    /// Agent command (`/implement`) or repository operation (`push`).
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub request: String,
    pub response: String,
    pub outcome: InteractionOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    Success,
    /// The collaborator answered but reported failure.
    Failure,
    Unavailable,
    Fatal,
}

impl AuditEntry {
    pub fn new(
        phase: Phase,
        collaborator: Collaborator,
        operation: impl Into<String>,
        request: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase,
            collaborator,
            operation: operation.into(),
            agent_name: None,
            request: request.into(),
            response: String::new(),
            outcome: InteractionOutcome::Success,
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn finish(mut self, outcome: InteractionOutcome, response: impl Into<String>) -> Self {
        self.outcome = outcome;
        self.response = response.into();
        self
    }
}

pub mod logger;
pub use logger::AuditLogger;
