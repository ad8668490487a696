//! Layered configuration for adw.
//!
//! Settings come from `.adw/adw.toml`, then the environment (a `.env` file
//! is loaded by `main` first), then CLI flags applied by the commands.
//!
//! ```toml
//! [agent]
//! command = "claude"
//! model = "sonnet"
//! skip_permissions = true
//!
//! [repository]
//! repo = "acme/app"
//! base_branch = "main"
//!
//! [trigger]
//! poll_interval_secs = 20
//! port = 8001
//! keyword = "adw"
//!
//! [workflow]
//! retry_cap = 4
//! state_dir = "agents"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;
use crate::workflow::retry::DEFAULT_MAX_RETRIES;

pub const CONFIG_DIR: &str = ".adw";
pub const CONFIG_FILE: &str = "adw.toml";

pub const DEFAULT_AGENT_COMMAND: &str = "claude";
pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_BASE_BRANCH: &str = "main";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_KEYWORD: &str = "adw";
pub const DEFAULT_STATE_DIR: &str = "agents";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    pub command: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub skip_permissions: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositorySection {
    /// `owner/repo`.
    pub repo: Option<String>,
    pub token: Option<String>,
    pub api_url: Option<String>,
    pub base_branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSection {
    pub poll_interval_secs: Option<u64>,
    pub port: Option<u16>,
    pub webhook_secret: Option<String>,
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSection {
    pub retry_cap: Option<u32>,
    pub state_dir: Option<PathBuf>,
}

/// Contents of `.adw/adw.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdwToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub repository: RepositorySection,
    #[serde(default)]
    pub trigger: TriggerSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
}

impl AdwToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse adw.toml")
    }

    /// Load `{config_dir}/adw.toml`, or defaults when it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AdwConfig {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,

    pub agent_command: String,
    pub model: String,
    pub api_key: Option<String>,
    pub skip_permissions: bool,

    pub repo: Option<String>,
    pub github_token: Option<String>,
    pub api_url: String,
    pub base_branch: String,

    pub poll_interval: Duration,
    pub port: u16,
    pub webhook_secret: Option<String>,
    pub keyword: String,

    pub retry_cap: u32,
}

impl AdwConfig {
    /// Resolve from `.adw/adw.toml` and the process environment.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let toml = AdwToml::load_or_default(&project_dir.join(CONFIG_DIR))?;
        Self::resolve_with(project_dir, toml, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup. Environment values win
    /// over the file; empty values count as unset.
    pub fn resolve_with(
        project_dir: &Path,
        toml: AdwToml,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let AdwToml {
            agent,
            repository,
            trigger,
            workflow,
        } = toml;

        let state_dir = env("ADW_STATE_DIR")
            .map(PathBuf::from)
            .or(workflow.state_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let state_dir = if state_dir.is_absolute() {
            state_dir
        } else {
            project_dir.join(state_dir)
        };

        let poll_secs = match env("ADW_POLL_INTERVAL") {
            Some(raw) => parse_env::<u64>("ADW_POLL_INTERVAL", &raw)?,
            None => trigger
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        };
        let port = match env("PORT") {
            Some(raw) => parse_env::<u16>("PORT", &raw)?,
            None => trigger.port.unwrap_or(DEFAULT_PORT),
        };
        let retry_cap = match env("ADW_RETRY_CAP") {
            Some(raw) => parse_env::<u32>("ADW_RETRY_CAP", &raw)?,
            None => workflow.retry_cap.unwrap_or(DEFAULT_MAX_RETRIES),
        };

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            state_dir,
            agent_command: env("CLAUDE_CODE_PATH")
                .or(agent.command)
                .unwrap_or_else(|| DEFAULT_AGENT_COMMAND.to_string()),
            model: agent.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: env("ANTHROPIC_API_KEY").or(agent.api_key),
            skip_permissions: agent.skip_permissions.unwrap_or(true),
            repo: env("GITHUB_REPO").or(repository.repo),
            github_token: env("GITHUB_PAT")
                .or_else(|| env("GITHUB_TOKEN"))
                .or(repository.token),
            api_url: repository
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            base_branch: repository
                .base_branch
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            port,
            webhook_secret: env("ADW_WEBHOOK_SECRET").or(trigger.webhook_secret),
            keyword: trigger
                .keyword
                .unwrap_or_else(|| DEFAULT_KEYWORD.to_string()),
            retry_cap,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_cap)
    }

    /// Human-readable warnings about settings that will misbehave.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.poll_interval.is_zero() {
            warnings.push("poll_interval_secs is 0; the poller will use 1 second".to_string());
        }
        if self.github_token.is_none() {
            warnings.push(
                "No GitHub token (GITHUB_PAT or GITHUB_TOKEN); API calls will be unauthenticated"
                    .to_string(),
            );
        }
        if self.webhook_secret.is_none() {
            warnings.push(
                "No webhook secret (ADW_WEBHOOK_SECRET); webhook deliveries are not authenticated"
                    .to_string(),
            );
        }
        if self.keyword.trim().is_empty() {
            warnings.push("Trigger keyword is empty; no comment will ever activate a workflow".to_string());
        }

        warnings
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: '{}'", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(toml: AdwToml, vars: &[(&str, &str)]) -> Result<AdwConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AdwConfig::resolve_with(Path::new("/work/app"), toml, |k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let config = resolve(AdwToml::default(), &[]).unwrap();
        assert_eq!(config.agent_command, "claude");
        assert_eq!(config.model, "sonnet");
        assert!(config.skip_permissions);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.poll_interval, Duration::from_secs(20));
        assert_eq!(config.port, 8001);
        assert_eq!(config.keyword, "adw");
        assert_eq!(config.retry_cap, 4);
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(config.state_dir, PathBuf::from("/work/app/agents"));
    }

    #[test]
    fn parses_every_section() {
        let toml = AdwToml::parse(
            r#"
[agent]
command = "/opt/claude"
model = "opus"
skip_permissions = false

[repository]
repo = "acme/app"
base_branch = "develop"

[trigger]
poll_interval_secs = 60
port = 9000
keyword = "robot"

[workflow]
retry_cap = 2
state_dir = "/var/adw"
"#,
        )
        .unwrap();
        let config = resolve(toml, &[]).unwrap();
        assert_eq!(config.agent_command, "/opt/claude");
        assert_eq!(config.model, "opus");
        assert!(!config.skip_permissions);
        assert_eq!(config.repo.as_deref(), Some("acme/app"));
        assert_eq!(config.base_branch, "develop");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.port, 9000);
        assert_eq!(config.keyword, "robot");
        assert_eq!(config.retry_cap, 2);
        assert_eq!(config.state_dir, PathBuf::from("/var/adw"));
    }

    #[test]
    fn environment_overrides_file() {
        let mut toml = AdwToml::default();
        toml.trigger.port = Some(9000);
        toml.repository.token = Some("from-file".into());
        let config = resolve(
            toml,
            &[
                ("PORT", "7000"),
                ("GITHUB_TOKEN", "from-env"),
                ("ADW_RETRY_CAP", "1"),
                ("ADW_STATE_DIR", "state"),
            ],
        )
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.github_token.as_deref(), Some("from-env"));
        assert_eq!(config.retry_cap, 1);
        assert_eq!(config.state_dir, PathBuf::from("/work/app/state"));
    }

    #[test]
    fn github_pat_takes_precedence_over_token() {
        let config = resolve(
            AdwToml::default(),
            &[("GITHUB_PAT", "pat"), ("GITHUB_TOKEN", "tok")],
        )
        .unwrap();
        assert_eq!(config.github_token.as_deref(), Some("pat"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = resolve(AdwToml::default(), &[("ADW_WEBHOOK_SECRET", "  ")]).unwrap();
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn invalid_numeric_env_is_an_error() {
        let err = resolve(AdwToml::default(), &[("ADW_POLL_INTERVAL", "soon")]).unwrap_err();
        assert!(err.to_string().contains("ADW_POLL_INTERVAL"));
    }

    #[test]
    fn invalid_toml_value_is_rejected_with_context() {
        let err = AdwToml::parse("[trigger]\nport = \"high\"").unwrap_err();
        assert!(err.to_string().contains("adw.toml"));
    }

    #[test]
    fn validate_warns_about_missing_secrets() {
        let config = resolve(AdwToml::default(), &[]).unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("GitHub token")));
        assert!(warnings.iter().any(|w| w.contains("webhook secret")));

        let config = resolve(
            AdwToml::default(),
            &[("GITHUB_PAT", "x"), ("ADW_WEBHOOK_SECRET", "y")],
        )
        .unwrap();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn load_reads_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_DIR).join(CONFIG_FILE),
            "[agent]\nmodel = \"haiku\"\n",
        )
        .unwrap();
        let toml = AdwToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(toml.agent.model.as_deref(), Some("haiku"));
        assert_eq!(
            AdwToml::load_or_default(&dir.path().join("missing")).unwrap(),
            AdwToml::default()
        );
    }
}
