//! Operations on the workspace host
//!
//! The pipeline never touches the workspace directly. Everything it needs
//! from the machine holding the workspace is one of the operations below,
//! each taking and returning only serializable values, so the same pipeline
//! drives a local checkout or a workspace on another machine.

mod local;
mod protocol;
mod remote;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use apksmith_core::{MatchedInput, Result};
use apksmith_signing::KeySigningMaterial;
use apksmith_tools::{ToolLocation, ZipalignOverrides};
use async_trait::async_trait;

use crate::launcher::LaunchOutcome;

pub use local::LocalExecutor;
pub use protocol::{read_frame, write_frame, WorkspaceRequest, WorkspaceResponse, MAX_FRAME_LEN};
pub use remote::{serve_agent, RemoteExecutor};

/// Operations the pipeline runs on the workspace host
#[async_trait]
pub trait WorkspaceExecutor: Send + Sync {
    /// Absolute workspace root on the host
    async fn workspace_root(&self) -> Result<PathBuf>;

    /// Expand comma-separated globs against the workspace
    async fn match_inputs(
        &self,
        patterns: &str,
        excludes: &[String],
    ) -> Result<BTreeSet<MatchedInput>>;

    /// Find zipalign with the host's environment
    async fn locate_zipalign(&self, overrides: &ZipalignOverrides) -> Result<ToolLocation>;

    /// Create `dir` below the working subtree, removing anything already in it
    async fn prepare_dir(&self, dir: &Path) -> Result<()>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Delete a file; `false` if there was nothing to delete
    async fn delete(&self, path: &Path) -> Result<bool>;

    /// Run `tool`, as returned by [`Self::locate_zipalign`], on `input` into
    /// `output` with the host's environment
    async fn align(
        &self,
        tool: &ToolLocation,
        input: &Path,
        output: &Path,
    ) -> Result<LaunchOutcome>;

    /// Sign `input` into `output` with v1 and v2
    async fn sign_apk(
        &self,
        input: &Path,
        output: &Path,
        material: &KeySigningMaterial,
    ) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
}
