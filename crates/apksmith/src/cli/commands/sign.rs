//! Sign command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tracing::{error, info};

use apksmith_core::config::load_config_or_default;
use apksmith_core::{
    BuildResult, Config, PipelineError, ProducedArtifact, SignedApkMapping, SigningRequest,
    StepOutcome,
};
use apksmith_pipeline::{
    AlignAndSignPipeline, DirectoryArchiver, LocalExecutor, RemoteExecutor, WorkspaceExecutor,
};
use apksmith_signing::FileCredentialStore;

use crate::cli::output;
use crate::cli::{project_root, Cli, OutputFormat};

/// Align and sign unsigned APKs
#[derive(Debug, Args)]
pub struct SignCommand {
    /// Credential id of the keystore; signs one ad-hoc step instead of the
    /// configured steps
    #[arg(long, requires = "apks")]
    pub keystore_id: Option<String>,

    /// Key alias inside the keystore
    #[arg(long, requires = "keystore_id")]
    pub alias: Option<String>,

    /// Comma-separated globs selecting the unsigned APKs
    #[arg(long, requires = "keystore_id")]
    pub apks: Option<String>,

    /// Sign the APKs without running zipalign
    #[arg(long)]
    pub skip_zipalign: bool,

    /// Android SDK home to find zipalign in
    #[arg(long)]
    pub android_home: Option<String>,

    /// Path to zipalign, taking precedence over the SDK home
    #[arg(long)]
    pub zipalign_path: Option<String>,

    /// Also archive the unsigned APKs
    #[arg(long)]
    pub archive_unsigned: bool,

    /// Do not archive the signed APKs
    #[arg(long)]
    pub no_archive_signed: bool,

    /// Where signed APKs are written (unsigned_apk_name_dir, unsigned_apk_sibling)
    #[arg(long)]
    pub mapping: Option<SignedApkMapping>,

    /// Address of a workspace agent (host:port) to run workspace operations on
    #[arg(long, env = "APKSMITH_AGENT")]
    pub agent: Option<String>,

    /// Result of the build so far; steps are skipped when it is worse than unstable
    #[arg(long, default_value = "success")]
    pub previous_result: BuildResult,
}

/// What happened to one step
#[derive(Debug, Serialize)]
struct StepReport {
    step: usize,
    key_store_id: String,
    apks_to_sign: String,
    status: &'static str,
    artifacts: Vec<ProducedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<StepError>,
}

#[derive(Debug, Serialize)]
struct StepError {
    kind: &'static str,
    message: String,
}

impl SignCommand {
    /// Execute the sign command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            ad_hoc = self.keystore_id.is_some(),
            agent = self.agent.as_deref().unwrap_or("local"),
            previous = %self.previous_result,
            "executing sign command"
        );
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(cli))
    }

    async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, config_path) = load_config_or_default(&cwd)?;
        let root = project_root(config_path.as_deref(), &cwd);

        let requests = self.requests(&config)?;
        let credentials = Arc::new(FileCredentialStore::new(&root, config.credentials.clone()));
        let archive_dir = config.archive.resolve(&root);

        let (executor, excludes): (Arc<dyn WorkspaceExecutor>, Vec<String>) = match &self.agent {
            Some(address) => {
                info!(address = %address, "connecting to workspace agent");
                let stream = tokio::net::TcpStream::connect(address).await.map_err(|e| {
                    PipelineError::Transport(format!("connecting to agent {address}: {e}"))
                })?;
                (Arc::new(RemoteExecutor::new(stream)), Vec::new())
            }
            None => (
                Arc::new(LocalExecutor::new(&root)),
                archive_excludes(&root, &archive_dir),
            ),
        };

        let archiver = Arc::new(DirectoryArchiver::new(&archive_dir, executor.clone()));
        let pipeline =
            AlignAndSignPipeline::new(executor, credentials, archiver).with_excludes(excludes);

        let mut previous = self.previous_result;
        let mut reports = Vec::new();
        let mut failure = None;
        for (index, request) in requests.iter().enumerate() {
            let mut report = StepReport {
                step: index + 1,
                key_store_id: request.key_store_id.clone(),
                apks_to_sign: request.apks_to_sign.clone(),
                status: "completed",
                artifacts: Vec::new(),
                error: None,
            };
            match pipeline.run_step(request, previous).await {
                Ok(StepOutcome::Skipped) => report.status = "skipped",
                Ok(StepOutcome::Completed(artifacts)) => report.artifacts = artifacts,
                Err(err) => {
                    error!(step = index + 1, kind = err.kind(), error = %err, "signing step failed");
                    report.status = "failed";
                    report.error = Some(StepError {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    previous = BuildResult::Failure;
                    failure.get_or_insert(err);
                }
            }
            reports.push(report);
        }

        self.print(cli, &reports, &archive_dir)?;

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// The ad-hoc step from flags, or the configured steps
    fn requests(&self, config: &Config) -> anyhow::Result<Vec<SigningRequest>> {
        let (Some(keystore_id), Some(apks)) = (&self.keystore_id, &self.apks) else {
            let requests = config.requests();
            if requests.is_empty() {
                anyhow::bail!(
                    "No signing steps configured. Add [[steps]] to apksmith.toml or pass --keystore-id and --apks"
                );
            }
            return Ok(requests);
        };

        let mut request = SigningRequest::new(keystore_id.clone(), apks.clone())
            .with_skip_zipalign(self.skip_zipalign)
            .with_archive(!self.no_archive_signed, self.archive_unsigned)
            .with_mapping(self.mapping.unwrap_or_default());
        request.key_alias = self.alias.clone();
        request.android_home = self.android_home.clone();
        request.zipalign_path = self.zipalign_path.clone();
        Ok(vec![request])
    }

    fn print(&self, cli: &Cli, reports: &[StepReport], archive_dir: &Path) -> anyhow::Result<()> {
        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "archive_dir": archive_dir,
                    "steps": reports,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                for report in reports {
                    output::step_header(report.step, &report.key_store_id, &report.apks_to_sign);
                    match report.status {
                        "skipped" => output::step_skipped(),
                        "failed" => {
                            if let Some(err) = &report.error {
                                output::error(&err.message);
                            }
                        }
                        _ => {
                            for artifact in &report.artifacts {
                                output::artifact(artifact.kind, &artifact.name, artifact.archived);
                            }
                        }
                    }
                    println!();
                }
                let archived = reports
                    .iter()
                    .flat_map(|r| &r.artifacts)
                    .filter(|a| a.archived)
                    .count();
                if archived > 0 {
                    println!("{}", output::key_value("Archive", &archive_dir.display().to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Keep the archive out of the inputs when it lives inside the workspace
fn archive_excludes(root: &Path, archive_dir: &Path) -> Vec<String> {
    match archive_dir.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            let relative: PathBuf = relative.components().collect();
            vec![format!(
                "{}/**",
                relative.to_string_lossy().replace('\\', "/")
            )]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn command(args: &[&str]) -> SignCommand {
        let mut argv = vec!["apksmith", "sign"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Commands::Sign(cmd) => cmd,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ad_hoc_request_from_flags() {
        let cmd = command(&[
            "--keystore-id",
            "release",
            "--alias",
            "upload",
            "--apks",
            "*.apk",
            "--archive-unsigned",
            "--no-archive-signed",
            "--zipalign-path",
            "$SDK/zipalign",
        ]);
        let requests = cmd.requests(&Config::default()).unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.alias(), Some("upload"));
        assert!(request.archive_unsigned_apks);
        assert!(!request.archive_signed_apks);
        assert_eq!(request.zipalign_override(), Some("$SDK/zipalign"));
        assert_eq!(request.signed_apk_mapping, SignedApkMapping::UnsignedApkNameDir);
    }

    #[test]
    fn test_configured_steps_are_used_without_flags() {
        let mut config = Config::default();
        config.steps.push(apksmith_core::StepConfig::Single(SigningRequest::new(
            "release", "*.apk",
        )));
        let requests = command(&[]).requests(&config).unwrap();
        assert_eq!(requests[0].key_store_id, "release");

        assert!(command(&[]).requests(&Config::default()).is_err());
    }

    #[test]
    fn test_keystore_id_requires_apks() {
        let result = Cli::try_parse_from(["apksmith", "sign", "--keystore-id", "release"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_archive_inside_workspace_is_excluded() {
        let root = Path::new("/ws");
        assert_eq!(
            archive_excludes(root, Path::new("/ws/apksmith-artifacts")),
            vec!["apksmith-artifacts/**".to_string()]
        );
        assert!(archive_excludes(root, Path::new("/archive")).is_empty());
    }
}
