//! Locate command

use clap::Args;
use tracing::info;

use apksmith_core::config::load_config_or_default;
use apksmith_tools::{
    ToolEnvironment, ZipalignLocator, ZipalignOverrides, ENV_ANDROID_HOME, ENV_PATH,
    ENV_ZIPALIGN,
};

use crate::cli::output;
use crate::cli::{project_root, Cli, OutputFormat};

/// Show which zipalign a signing step would use
#[derive(Debug, Args)]
pub struct LocateCommand {
    /// Android SDK home to search, as a step's android_home
    #[arg(long)]
    pub android_home: Option<String>,

    /// Path to zipalign, as a step's zipalign_path
    #[arg(long)]
    pub zipalign_path: Option<String>,
}

impl LocateCommand {
    /// Execute the locate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!("executing locate command");
        let cwd = std::env::current_dir()?;
        let (_, config_path) = load_config_or_default(&cwd)?;
        let root = project_root(config_path.as_deref(), &cwd);

        let env = ToolEnvironment::from_process();
        let overrides = ZipalignOverrides {
            zipalign_path: self.zipalign_path.clone(),
            android_home: self.android_home.clone(),
        };
        let sources = [
            ("zipalign_path", overrides.zipalign_path.clone()),
            ("android_home", overrides.android_home.clone()),
            (ENV_ZIPALIGN, env.get(ENV_ZIPALIGN).map(str::to_string)),
            (ENV_ANDROID_HOME, env.get(ENV_ANDROID_HOME).map(str::to_string)),
            (ENV_PATH, env.get(ENV_PATH).map(str::to_string)),
        ];

        let location = ZipalignLocator::new(&env, &root).locate(&overrides)?;

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "path": location.path,
                    "source": location.source,
                    "workspace": root,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    println!("{}", location.path.display());
                    return Ok(());
                }
                output::success(&format!(
                    "zipalign: {}",
                    output::path_style().apply_to(location.path.display())
                ));
                println!("{}", output::key_value("Found via", &location.source.to_string()));
                println!();
                println!("{}", output::header("Sources in precedence order"));
                for (name, value) in &sources {
                    let value = value.as_deref().unwrap_or("(not set)");
                    println!("{}", output::key_value(name, value));
                }
            }
        }
        Ok(())
    }
}
