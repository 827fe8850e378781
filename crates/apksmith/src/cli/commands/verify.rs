//! Verify command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use apksmith_signing::verify_apk;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Verify the v1 and v2 signatures of an APK
#[derive(Debug, Args)]
pub struct VerifyCommand {
    /// Path to the APK
    #[arg(required = true)]
    pub apk: PathBuf,
}

impl VerifyCommand {
    /// Execute the verify command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(apk = %self.apk.display(), "executing verify command");
        let report = verify_apk(&self.apk)?;

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "apk": self.apk,
                    "verified": true,
                    "v1": report.v1,
                    "v2": report.v2,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                println!(
                    "{} {}",
                    output::header("Verified"),
                    output::path_style().apply_to(self.apk.display())
                );
                output::scheme("v1 (JAR signing)", report.v1.as_ref());
                output::scheme("v2 (APK Signature Scheme)", report.v2.as_ref());
            }
        }
        Ok(())
    }
}
