//! Executor forwarding operations to an agent next to the workspace

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use apksmith_core::{MatchedInput, PipelineError, Result, WorkspaceError};
use apksmith_signing::KeySigningMaterial;
use apksmith_tools::{ToolLocation, ZipalignOverrides};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::local::LocalExecutor;
use super::protocol::{
    read_frame, write_frame, RequestFrame, ResponseFrame, WorkspaceRequest, WorkspaceResponse,
};
use super::WorkspaceExecutor;
use crate::launcher::LaunchOutcome;

/// Sends every operation to a workspace agent over a byte stream.
///
/// Requests are answered one at a time in order.
pub struct RemoteExecutor<S> {
    stream: Mutex<S>,
}

impl<S> RemoteExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    async fn call(&self, request: WorkspaceRequest) -> Result<WorkspaceResponse> {
        let op = request.op();
        let frame = RequestFrame {
            id: Uuid::new_v4(),
            request,
        };

        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &frame)
            .await
            .map_err(|e| PipelineError::Transport(format!("sending {op}: {e}")))?;
        let reply: ResponseFrame = read_frame(&mut *stream)
            .await
            .map_err(|e| PipelineError::Transport(format!("receiving {op}: {e}")))?
            .ok_or_else(|| {
                PipelineError::Transport(format!("agent closed the connection during {op}"))
            })?;
        drop(stream);

        if reply.id != frame.id {
            return Err(PipelineError::Transport(format!(
                "response to {op} carries id {} instead of {}",
                reply.id, frame.id
            )));
        }
        debug!(op, "remote operation finished");
        match reply.response {
            WorkspaceResponse::Error { error } => Err(error.into()),
            response => Ok(response),
        }
    }
}

fn unexpected(op: &str, response: &WorkspaceResponse) -> PipelineError {
    PipelineError::Transport(format!("unexpected response to {op}: {response:?}"))
}

#[async_trait]
impl<S> WorkspaceExecutor for RemoteExecutor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn workspace_root(&self) -> Result<PathBuf> {
        match self.call(WorkspaceRequest::WorkspaceRoot).await? {
            WorkspaceResponse::Root { path } => Ok(path),
            other => Err(unexpected("workspace_root", &other)),
        }
    }

    async fn match_inputs(
        &self,
        patterns: &str,
        excludes: &[String],
    ) -> Result<BTreeSet<MatchedInput>> {
        let request = WorkspaceRequest::MatchInputs {
            patterns: patterns.to_string(),
            excludes: excludes.to_vec(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Inputs { inputs } => Ok(inputs),
            other => Err(unexpected("match_inputs", &other)),
        }
    }

    async fn locate_zipalign(&self, overrides: &ZipalignOverrides) -> Result<ToolLocation> {
        let request = WorkspaceRequest::LocateZipalign {
            overrides: overrides.clone(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Tool { location } => Ok(location),
            other => Err(unexpected("locate_zipalign", &other)),
        }
    }

    async fn prepare_dir(&self, dir: &Path) -> Result<()> {
        let request = WorkspaceRequest::PrepareDir {
            path: dir.to_path_buf(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Done => Ok(()),
            other => Err(unexpected("prepare_dir", &other)),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let request = WorkspaceRequest::Exists {
            path: path.to_path_buf(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Exists { exists } => Ok(exists),
            other => Err(unexpected("exists", &other)),
        }
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        let request = WorkspaceRequest::Delete {
            path: path.to_path_buf(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Deleted { deleted } => Ok(deleted),
            other => Err(unexpected("delete", &other)),
        }
    }

    async fn align(
        &self,
        tool: &ToolLocation,
        input: &Path,
        output: &Path,
    ) -> Result<LaunchOutcome> {
        let request = WorkspaceRequest::Align {
            tool: tool.clone(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Aligned { outcome } => Ok(outcome),
            other => Err(unexpected("align", &other)),
        }
    }

    async fn sign_apk(
        &self,
        input: &Path,
        output: &Path,
        material: &KeySigningMaterial,
    ) -> Result<()> {
        let request = WorkspaceRequest::SignApk {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            material: material.clone(),
        };
        match self.call(request).await? {
            WorkspaceResponse::Done => Ok(()),
            other => Err(unexpected("sign_apk", &other)),
        }
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let request = WorkspaceRequest::ReadFile {
            path: path.to_path_buf(),
        };
        match self.call(request).await? {
            WorkspaceResponse::File { content } => Ok(content),
            other => Err(unexpected("read_file", &other)),
        }
    }
}

async fn dispatch(
    executor: &LocalExecutor,
    request: WorkspaceRequest,
) -> std::result::Result<WorkspaceResponse, WorkspaceError> {
    let response = match request {
        WorkspaceRequest::WorkspaceRoot => WorkspaceResponse::Root {
            path: executor.root().to_path_buf(),
        },
        WorkspaceRequest::MatchInputs { patterns, excludes } => WorkspaceResponse::Inputs {
            inputs: executor.match_inputs_local(&patterns, &excludes).await?,
        },
        WorkspaceRequest::LocateZipalign { overrides } => WorkspaceResponse::Tool {
            location: executor.locate_zipalign_local(&overrides)?,
        },
        WorkspaceRequest::PrepareDir { path } => {
            executor.prepare_dir_local(&path).await?;
            WorkspaceResponse::Done
        }
        WorkspaceRequest::Exists { path } => WorkspaceResponse::Exists {
            exists: executor.exists_local(&path).await?,
        },
        WorkspaceRequest::Delete { path } => WorkspaceResponse::Deleted {
            deleted: executor.delete_local(&path).await?,
        },
        WorkspaceRequest::Align {
            tool,
            input,
            output,
        } => WorkspaceResponse::Aligned {
            outcome: executor.align_local(&tool, &input, &output).await?,
        },
        WorkspaceRequest::SignApk {
            input,
            output,
            material,
        } => {
            executor.sign_apk_local(&input, &output, &material).await?;
            WorkspaceResponse::Done
        }
        WorkspaceRequest::ReadFile { path } => WorkspaceResponse::File {
            content: executor.read_file_local(&path).await?,
        },
    };
    Ok(response)
}

/// Answer requests from one connection until the peer closes it
pub async fn serve_agent<S>(mut stream: S, executor: &LocalExecutor) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = read_frame::<_, RequestFrame>(&mut stream).await? {
        let op = frame.request.op();
        debug!(op, id = %frame.id, "agent request");
        let response = match dispatch(executor, frame.request).await {
            Ok(response) => response,
            Err(error) => {
                info!(op, %error, "agent operation failed");
                WorkspaceResponse::Error { error }
            }
        };
        write_frame(
            &mut stream,
            &ResponseFrame {
                id: frame.id,
                response,
            },
        )
        .await?;
    }
    debug!("agent connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn connected(root: &Path) -> RemoteExecutor<tokio::io::DuplexStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let executor = LocalExecutor::new(root);
        tokio::spawn(async move { serve_agent(server, &executor).await });
        RemoteExecutor::new(client)
    }

    #[tokio::test]
    async fn test_operations_round_trip_through_agent() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app-unsigned.apk"), b"apk").unwrap();
        let remote = connected(temp.path()).await;

        assert_eq!(remote.workspace_root().await.unwrap(), temp.path());
        let inputs = remote.match_inputs("*.apk", &[]).await.unwrap();
        assert_eq!(inputs.len(), 1);

        let dir = temp.path().join("apksmith-out/release");
        remote.prepare_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert!(remote.exists(&dir).await.unwrap());

        let content = remote
            .read_file(&temp.path().join("app-unsigned.apk"))
            .await
            .unwrap();
        assert_eq!(content, b"apk");
        assert!(remote
            .delete(&temp.path().join("app-unsigned.apk"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_agent_errors_keep_their_kind() {
        let temp = TempDir::new().unwrap();
        let remote = connected(temp.path()).await;

        let err = remote.match_inputs("*.apk", &[]).await.unwrap_err();
        assert_eq!(err.kind(), "no_match");

        let err = remote
            .read_file(&temp.path().join("absent.apk"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "workspace");
        assert!(err.to_string().contains("absent.apk"));
    }

    #[tokio::test]
    async fn test_agent_stays_inside_its_workspace() {
        let workspace = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let precious = elsewhere.path().join("precious");
        std::fs::create_dir_all(&precious).unwrap();
        std::fs::write(precious.join("data.txt"), b"data").unwrap();
        let remote = connected(workspace.path()).await;

        let err = remote.read_file(&precious.join("data.txt")).await.unwrap_err();
        assert_eq!(err.kind(), "workspace");
        assert!(err.to_string().contains("outside the workspace"));

        assert!(remote.prepare_dir(&precious).await.is_err());
        assert!(remote
            .prepare_dir(&workspace.path().join("apksmith-out/../../precious"))
            .await
            .is_err());
        assert!(remote.delete(&precious.join("data.txt")).await.is_err());
        assert!(precious.join("data.txt").exists());

        let shell = ToolLocation {
            path: PathBuf::from("/bin/sh"),
            source: apksmith_tools::ToolSource::ZipalignPathOverride,
        };
        std::fs::write(workspace.path().join("app.apk"), b"apk").unwrap();
        let err = remote
            .align(&shell, Path::new("app.apk"), Path::new("apksmith-out/app.apk"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "workspace");
        assert!(!workspace.path().join("apksmith-out/app.apk").exists());
    }

    #[tokio::test]
    async fn test_closed_agent_is_a_transport_error() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let remote = RemoteExecutor::new(client);
        let err = remote.workspace_root().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
