//! zipalign invocation for one signing request

use std::path::Path;

use apksmith_core::{PipelineError, Result, SigningRequest};
use apksmith_tools::{ToolLocation, ZipalignOverrides};
use tracing::info;

use crate::executor::WorkspaceExecutor;

/// zipalign as used by one request.
///
/// The binary is located on first use and reused for every later input of
/// the request.
pub struct ZipalignTool<'a> {
    executor: &'a dyn WorkspaceExecutor,
    overrides: ZipalignOverrides,
    location: Option<ToolLocation>,
}

impl<'a> ZipalignTool<'a> {
    pub fn new(executor: &'a dyn WorkspaceExecutor, request: &SigningRequest) -> Self {
        Self {
            executor,
            overrides: ZipalignOverrides::from_request(request),
            location: None,
        }
    }

    /// The resolved zipalign, locating it on first call
    pub async fn location(&mut self) -> Result<&ToolLocation> {
        let location = match self.location.take() {
            Some(location) => location,
            None => self.executor.locate_zipalign(&self.overrides).await?,
        };
        Ok(self.location.insert(location))
    }

    /// Align `input` into `output`.
    ///
    /// A non-zero exit, or a zero exit without the output file, fails with
    /// [`PipelineError::AlignmentFailed`].
    pub async fn align(&mut self, input: &Path, output: &Path) -> Result<()> {
        let tool = self.location().await?.clone();
        info!(input = %input.display(), output = %output.display(), "aligning APK");

        let outcome = self.executor.align(&tool, input, output).await?;
        if !outcome.is_success() {
            let reason = match outcome.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(line) => format!("zipalign failed: {}", line.trim()),
                None => "zipalign failed".to_string(),
            };
            return Err(PipelineError::AlignmentFailed {
                input: input.to_path_buf(),
                exit_code: outcome.exit_code,
                reason,
            });
        }

        if !self.executor.exists(output).await? {
            return Err(PipelineError::AlignmentFailed {
                input: input.to_path_buf(),
                exit_code: outcome.exit_code,
                reason: format!("zipalign did not produce {}", output.display()),
            });
        }
        Ok(())
    }
}
