//! Migrate command

use std::path::Path;

use clap::Args;
use tracing::info;

use apksmith_core::config::{load_config_from_dir, save_config};
use apksmith_core::migration::{is_migrated, migrate_config};
use apksmith_core::Config;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Convert legacy multi-entry signing steps into single-entry steps
#[derive(Debug, Args)]
pub struct MigrateCommand {
    /// Rewrite the configuration file instead of printing the result
    #[arg(long)]
    pub write: bool,
}

impl MigrateCommand {
    /// Execute the migrate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(write = self.write, "executing migrate command");
        let cwd = std::env::current_dir()?;
        let (mut config, config_path) = load_config_from_dir(&cwd)?;

        let already_migrated = is_migrated(&config);
        let converted = migrate_config(&mut config);
        let written = self.write && converted > 0;
        if written {
            save_config(&config_path, &config)?;
        }

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "config_path": config_path,
                    "converted_entries": converted,
                    "written": written,
                    "steps": config.steps,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if already_migrated {
                    if !cli.quiet {
                        output::info("Configuration has no legacy steps, nothing to migrate");
                    }
                    return Ok(());
                }
                if written {
                    if !cli.quiet {
                        output::success(&format!(
                            "Converted {} legacy entries in {}",
                            converted,
                            output::path_style().apply_to(config_path.display())
                        ));
                    }
                } else {
                    print!("{}", render(&config_path, &config)?);
                }
            }
        }
        Ok(())
    }
}

/// The configuration in the format of `path`
fn render(path: &Path, config: &Config) -> anyhow::Result<String> {
    if path.extension().is_some_and(|e| e == "toml") {
        Ok(toml::to_string_pretty(config)?)
    } else {
        Ok(serde_yaml::to_string(config)?)
    }
}
