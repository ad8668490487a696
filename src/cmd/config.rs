//! Configuration view and validation commands: `adw config`.

use std::path::Path;

use anyhow::Result;
use console::style;

use adw::config::{AdwConfig, CONFIG_DIR, CONFIG_FILE};

use crate::ConfigCommands;

fn secret(value: &Option<String>) -> &'static str {
    if value.is_some() { "(set)" } else { "(unset)" }
}

pub fn cmd_config(project_dir: &Path, config: &AdwConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("adw configuration");
            println!("=================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; using defaults and environment.", config_path.display());
            }
            println!();
            println!("[agent]");
            println!("  command = \"{}\"", config.agent_command);
            println!("  model = \"{}\"", config.model);
            println!("  api_key = {}", secret(&config.api_key));
            println!("  skip_permissions = {}", config.skip_permissions);
            println!();
            println!("[repository]");
            println!(
                "  repo = \"{}\"",
                config.repo.as_deref().unwrap_or("(from git remote)")
            );
            println!("  token = {}", secret(&config.github_token));
            println!("  api_url = \"{}\"", config.api_url);
            println!("  base_branch = \"{}\"", config.base_branch);
            println!();
            println!("[trigger]");
            println!("  poll_interval_secs = {}", config.poll_interval.as_secs());
            println!("  port = {}", config.port);
            println!("  webhook_secret = {}", secret(&config.webhook_secret));
            println!("  keyword = \"{}\"", config.keyword);
            println!();
            println!("[workflow]");
            println!("  retry_cap = {}", config.retry_cap);
            println!("  state_dir = \"{}\"", config.state_dir.display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            println!();
            if warnings.is_empty() {
                println!("{} Configuration is valid.", style("✓").green());
            } else {
                println!("{} {} warning(s):", style("!").yellow(), warnings.len());
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }
    Ok(())
}
