//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use commands::{AgentCommand, LocateCommand, MigrateCommand, SignCommand, VerifyCommand};

/// apksmith - align and sign unsigned Android APKs
#[derive(Debug, Parser)]
#[command(name = "apksmith")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Align and sign the APKs of the configured steps, or of one ad-hoc step
    Sign(SignCommand),

    /// Verify the signatures of an APK
    Verify(VerifyCommand),

    /// Show which zipalign would be used
    Locate(LocateCommand),

    /// Convert legacy multi-entry steps into single-entry steps
    Migrate(MigrateCommand),

    /// Serve workspace operations for a remote orchestrator
    Agent(AgentCommand),
}

impl Cli {
    /// Console log level implied by -v and -q
    pub fn console_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "warn",
            (false, 1) => "info",
            (false, _) => "debug",
        }
    }

    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Sign(cmd) => cmd.execute(self),
            Commands::Verify(cmd) => cmd.execute(self),
            Commands::Locate(cmd) => cmd.execute(self),
            Commands::Migrate(cmd) => cmd.execute(self),
            Commands::Agent(cmd) => cmd.execute(self),
        }
    }
}

/// Project root for a configuration file: its directory, or the directory
/// above `.github/`. Without a file, the current directory.
pub fn project_root(config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    let Some(dir) = config_path.and_then(Path::parent) else {
        return cwd.to_path_buf();
    };
    if dir.file_name().is_some_and(|name| name == ".github") {
        if let Some(parent) = dir.parent() {
            return parent.to_path_buf();
        }
    }
    dir.to_path_buf()
}
