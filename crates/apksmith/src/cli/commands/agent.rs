//! Agent command

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use apksmith_pipeline::{serve_agent, LocalExecutor};

use crate::cli::output;
use crate::cli::Cli;

/// Serve workspace operations to a remote `apksmith sign --agent`
#[derive(Debug, Args)]
pub struct AgentCommand {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7911")]
    pub listen: String,

    /// Workspace root served to clients
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,
}

impl AgentCommand {
    /// Execute the agent command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(listen = %self.listen, workspace = %self.workspace.display(), "executing agent command");
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(cli))
    }

    async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let workspace = std::fs::canonicalize(&self.workspace)?;
        let executor = Arc::new(LocalExecutor::new(&workspace));
        let listener = TcpListener::bind(&self.listen).await?;
        let address = listener.local_addr()?;

        if !cli.quiet {
            output::info(&format!(
                "Serving {} on {}",
                output::path_style().apply_to(workspace.display()),
                address
            ));
        }
        info!(%address, workspace = %workspace.display(), "workspace agent listening");
        if !address.ip().is_loopback() {
            warn!(%address, "agent is reachable from other hosts; requests and key material are not encrypted");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!(%peer, "orchestrator connected");
                    let executor = executor.clone();
                    tokio::spawn(async move {
                        match serve_agent(stream, &executor).await {
                            Ok(()) => debug!(%peer, "orchestrator disconnected"),
                            Err(e) => warn!(%peer, error = %e, "agent connection failed"),
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down workspace agent");
                    return Ok(());
                }
            }
        }
    }
}
