use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::stream::StreamCollector;
use super::{AgentInvoker, AgentRequest, AgentResponse};
use crate::config::AdwConfig;
use crate::errors::{Collaborator, CollaboratorError};

/// Runs agent commands through the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeInvoker {
    command: String,
    model: String,
    api_key: Option<String>,
    skip_permissions: bool,
    project_dir: PathBuf,
    state_dir: PathBuf,
}

impl ClaudeInvoker {
    pub fn new(config: &AdwConfig) -> Self {
        Self {
            command: config.agent_command.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            skip_permissions: config.skip_permissions,
            project_dir: config.project_dir.clone(),
            state_dir: config.state_dir.clone(),
        }
    }

    /// CLI flags; the prompt itself goes over stdin.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.extend([
            "--print".to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);
        flags
    }

    fn output_dir(&self, request: &AgentRequest) -> PathBuf {
        self.state_dir
            .join(request.workflow_id.as_str())
            .join(&request.agent_name)
    }

    fn unavailable(&self, message: impl Into<String>) -> CollaboratorError {
        CollaboratorError::unavailable(Collaborator::Agent, message)
    }

    fn fatal(&self, message: impl Into<String>) -> CollaboratorError {
        CollaboratorError::fatal(Collaborator::Agent, message)
    }
}

fn write_artifact(path: &Path, content: &str) {
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(path = %parent.display(), error = %e, "could not create agent output directory");
        return;
    }
    if let Err(e) = std::fs::write(path, content) {
        warn!(path = %path.display(), error = %e, "could not write agent artifact");
    }
}

#[async_trait]
impl AgentInvoker for ClaudeInvoker {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, CollaboratorError> {
        let prompt = request.prompt();
        let output_dir = self.output_dir(request);
        write_artifact(&output_dir.join("prompt.txt"), &prompt);

        let mut cmd = Command::new(&self.command);
        cmd.args(self.flags())
            .current_dir(&self.project_dir)
            .env_remove("CLAUDECODE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &self.api_key {
            cmd.env("ANTHROPIC_API_KEY", key);
        }

        debug!(
            workflow_id = %request.workflow_id,
            agent = %request.agent_name,
            command = %request.command,
            "spawning agent"
        );
        let mut child = cmd.spawn().map_err(|e| {
            self.unavailable(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {}
                // The agent exited without reading its prompt; its exit status says why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(agent = %request.agent_name, "agent closed stdin early");
                }
                Err(e) => return Err(self.unavailable(format!("failed to write prompt: {}", e))),
            }
        }

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.unavailable("agent stdout was not captured"))?;
        let mut reader = BufReader::new(stdout).lines();
        let mut collector = StreamCollector::new();
        let mut raw = String::new();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| self.fatal(format!("failed to read agent output: {}", e)))?
        {
            raw.push_str(&line);
            raw.push('\n');
            collector.push_line(&line);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| self.fatal(format!("failed to wait for agent: {}", e)))?;
        let stderr = stderr_task.await.unwrap_or_default();
        write_artifact(&output_dir.join("raw_output.jsonl"), &raw);

        if !status.success() {
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(self.fatal(format!(
                "agent exited with {} ({})",
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                tail
            )));
        }

        let success = !collector.is_error();
        let session_id = collector.session_id().map(str::to_string);
        Ok(AgentResponse {
            output: collector.into_output(),
            success,
            session_id,
        })
    }
}
