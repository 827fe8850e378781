//! Archiving of produced artifacts

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use apksmith_core::config::ARTIFACT_MANIFEST;
use apksmith_core::{PipelineError, Result, WorkspaceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::executor::WorkspaceExecutor;

/// Receives the artifacts of a successful request
#[async_trait]
pub trait ArtifactArchiver: Send + Sync {
    /// Archive the file at `source` on the workspace host under the
    /// workspace-relative `name`
    async fn archive(&self, name: &str, source: &Path) -> Result<()>;
}

/// One entry of the archive manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub name: String,
    pub source: PathBuf,
    pub size: u64,
    /// SHA256 hash (hex encoded)
    pub sha256: String,
    pub archived_at: DateTime<Utc>,
}

/// Copies artifacts into a local directory and records them in
/// `artifacts.json`
pub struct DirectoryArchiver {
    dir: PathBuf,
    executor: Arc<dyn WorkspaceExecutor>,
    manifest_lock: Mutex<()>,
}

impl DirectoryArchiver {
    /// Archive into `dir`, reading artifacts through `executor`
    pub fn new(dir: impl Into<PathBuf>, executor: Arc<dyn WorkspaceExecutor>) -> Self {
        Self {
            dir: dir.into(),
            executor,
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_MANIFEST)
    }

    /// Records of everything archived so far
    pub async fn records(&self) -> Result<Vec<ArchiveRecord>> {
        let path = self.manifest_path();
        match tokio::fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content).map_err(|e| {
                PipelineError::Workspace {
                    operation: "read archive manifest".to_string(),
                    path,
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(WorkspaceError::io("read archive manifest", path, e).into()),
        }
    }

    /// Destination of `name`, refusing names that would leave the archive
    fn destination(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(PipelineError::Workspace {
                operation: "archive".to_string(),
                path: relative.to_path_buf(),
                reason: "artifact name must be a relative path inside the archive".to_string(),
            });
        }
        Ok(self.dir.join(relative))
    }
}

#[async_trait]
impl ArtifactArchiver for DirectoryArchiver {
    async fn archive(&self, name: &str, source: &Path) -> Result<()> {
        let destination = self.destination(name)?;
        let content = self.executor.read_file(source).await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io("create directory", parent, e))?;
        }
        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            warn!(name, "replacing previously archived artifact");
        }
        tokio::fs::write(&destination, &content)
            .await
            .map_err(|e| WorkspaceError::io("archive", &destination, e))?;

        let record = ArchiveRecord {
            name: name.to_string(),
            source: source.to_path_buf(),
            size: content.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&content)),
            archived_at: Utc::now(),
        };

        let _guard = self.manifest_lock.lock().await;
        let mut records = self.records().await?;
        records.retain(|r| r.name != record.name);
        records.push(record);
        let json = serde_json::to_vec_pretty(&records).map_err(|e| PipelineError::Workspace {
            operation: "write archive manifest".to_string(),
            path: self.manifest_path(),
            reason: e.to_string(),
        })?;
        let manifest = self.manifest_path();
        tokio::fs::write(&manifest, json)
            .await
            .map_err(|e| WorkspaceError::io("write archive manifest", &manifest, e))?;

        info!(name, destination = %destination.display(), "archived artifact");
        Ok(())
    }
}
