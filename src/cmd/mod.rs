//! CLI command implementations.
//!
//! | Module    | Commands handled                                              |
//! |-----------|---------------------------------------------------------------|
//! | `phase`   | `Plan`, `Build`, `Test`, `Review`, `Document`, `PlanBuild`, `PlanBuildTest`, `Sdlc` |
//! | `trigger` | `Serve`, `Poll`                                               |
//! | `status`  | `Status`, `Abandon`                                           |
//! | `config`  | `Config`                                                      |

pub mod config;
pub mod phase;
pub mod status;
pub mod trigger;

use std::sync::Arc;

use anyhow::{Context, Result};

use adw::agent::claude::ClaudeInvoker;
use adw::audit::AuditLogger;
use adw::config::AdwConfig;
use adw::repo::github::GitHubAdapter;
use adw::state::FileStore;
use adw::workflow::Orchestrator;

pub use config::cmd_config;
pub use phase::cmd_phase;
pub use status::{cmd_abandon, cmd_status};
pub use trigger::{cmd_poll, cmd_serve};

/// Store, repository adapter and orchestrator wired from configuration.
pub struct Runtime {
    pub store: Arc<FileStore>,
    pub repo: Arc<GitHubAdapter>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Runtime {
    pub async fn build(config: &AdwConfig) -> Result<Self> {
        let store = Arc::new(open_store(config)?);
        let repo = Arc::new(
            GitHubAdapter::from_config(config)
                .await
                .context("Failed to set up the repository adapter")?,
        );
        let agent = Arc::new(ClaudeInvoker::new(config));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            agent,
            repo.clone(),
            AuditLogger::new(&config.state_dir),
            config.retry_policy(),
        ));
        Ok(Self {
            store,
            repo,
            orchestrator,
        })
    }
}

pub fn open_store(config: &AdwConfig) -> Result<FileStore> {
    FileStore::open(&config.state_dir).with_context(|| {
        format!(
            "Failed to open workflow store at {}",
            config.state_dir.display()
        )
    })
}
