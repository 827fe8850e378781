//! The align-and-sign orchestrator

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use std::sync::Arc;

use apksmith_core::config::validate_request;
use apksmith_core::{
    ArtifactKind, BuildResult, ConfigError, MatchedInput, OutputNamer, OutputPaths,
    PipelineError, ProducedArtifact, Result, SigningRequest, StepOutcome,
};
use apksmith_signing::{CredentialStore, KeyMaterialResolver};
use tracing::{debug, info};

use crate::archive::ArtifactArchiver;
use crate::executor::WorkspaceExecutor;
use crate::zipalign::ZipalignTool;

/// One input together with where its outputs go
struct PlannedInput {
    input: MatchedInput,
    paths: OutputPaths,
}

/// Aligns and signs every APK selected by a [`SigningRequest`].
///
/// Inputs are processed one after another in glob order. The first error
/// aborts the request, and artifacts are only handed to the archiver once
/// every input has been signed.
pub struct AlignAndSignPipeline {
    executor: Arc<dyn WorkspaceExecutor>,
    credentials: Arc<dyn CredentialStore>,
    archiver: Arc<dyn ArtifactArchiver>,
    excludes: Vec<String>,
}

impl AlignAndSignPipeline {
    pub fn new(
        executor: Arc<dyn WorkspaceExecutor>,
        credentials: Arc<dyn CredentialStore>,
        archiver: Arc<dyn ArtifactArchiver>,
    ) -> Self {
        Self {
            executor,
            credentials,
            archiver,
            excludes: Vec::new(),
        }
    }

    /// Extra globs never matched as inputs, e.g. the archive directory
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(excludes.into_iter().map(Into::into));
        self
    }

    /// Run the request as a build step.
    ///
    /// Nothing is done when the build is already worse than unstable.
    pub async fn run_step(
        &self,
        request: &SigningRequest,
        previous: BuildResult,
    ) -> Result<StepOutcome> {
        if previous.is_worse_than_unstable() {
            info!(previous = %previous, key_store = %request.key_store_id, "build already failed, skipping signing step");
            return Ok(StepOutcome::Skipped);
        }
        Ok(StepOutcome::Completed(self.run(request).await?))
    }

    /// Align, sign and archive every input of `request`
    pub async fn run(&self, request: &SigningRequest) -> Result<Vec<ProducedArtifact>> {
        validate_request(request)?;

        let root = self.executor.workspace_root().await?;
        let inputs = self
            .executor
            .match_inputs(&request.apks_to_sign, &self.excludes)
            .await?;
        info!(patterns = %request.apks_to_sign, count = inputs.len(), "matched unsigned APKs");

        let namer = OutputNamer::new(&root, request.working_key(), request.signed_apk_mapping);
        let planned: Vec<PlannedInput> = inputs
            .into_iter()
            .map(|input| PlannedInput {
                paths: namer.names_for(&input),
                input,
            })
            .collect();
        check_collisions(&planned)?;

        let material = KeyMaterialResolver::new(self.credentials.as_ref())
            .resolve(request.key_store_id.trim(), request.alias())?;

        let mut zipalign = ZipalignTool::new(self.executor.as_ref(), request);
        for plan in &planned {
            self.sign_one(request, plan, &mut zipalign, &material).await?;
        }

        let mut produced = Vec::new();
        for plan in &planned {
            if request.archive_unsigned_apks {
                produced.push(self.handoff(&root, plan, ArtifactKind::Unsigned, true).await?);
            }
            produced.push(
                self.handoff(&root, plan, ArtifactKind::Signed, request.archive_signed_apks)
                    .await?,
            );
        }

        info!(
            key_store = %request.key_store_id,
            signed = planned.len(),
            archived = produced.iter().filter(|a| a.archived).count(),
            "signing request finished"
        );
        Ok(produced)
    }

    async fn sign_one(
        &self,
        request: &SigningRequest,
        plan: &PlannedInput,
        zipalign: &mut ZipalignTool<'_>,
        material: &apksmith_signing::KeySigningMaterial,
    ) -> Result<()> {
        let PlannedInput { input, paths } = plan;
        self.executor.prepare_dir(&paths.working_dir).await?;

        let to_sign = if request.skip_zipalign {
            debug!(input = %input.relative_path, "skipping zipalign");
            input.path.clone()
        } else {
            zipalign.align(&input.path, &paths.aligned).await?;
            paths.aligned.clone()
        };

        if self.executor.delete(&paths.signed).await? {
            info!(path = %paths.signed.display(), "deleted previous signed APK");
        }

        info!(input = %input.relative_path, output = %paths.signed.display(), "signing APK");
        self.executor
            .sign_apk(&to_sign, &paths.signed, material)
            .await
            .map_err(|e| match e {
                PipelineError::Signing { reason, .. } => PipelineError::Signing {
                    input: input.path.clone(),
                    reason,
                },
                other => other,
            })
    }

    async fn handoff(
        &self,
        root: &Path,
        plan: &PlannedInput,
        kind: ArtifactKind,
        archive: bool,
    ) -> Result<ProducedArtifact> {
        let source = match kind {
            ArtifactKind::Unsigned => plan.input.path.clone(),
            ArtifactKind::Signed => plan.paths.signed.clone(),
        };
        let name = archive_name(root, &plan.input, &source)?;
        if archive {
            self.archiver.archive(&name, &source).await?;
        }
        Ok(ProducedArtifact {
            name,
            source,
            kind,
            archived: archive,
        })
    }
}

/// Fail before any work when two inputs would write the same signed APK, or
/// when a signed APK would replace another input
fn check_collisions(planned: &[PlannedInput]) -> Result<()> {
    let inputs: BTreeSet<&Path> = planned.iter().map(|p| p.input.path.as_path()).collect();

    let mut outputs: BTreeMap<&Path, &Path> = BTreeMap::new();
    for plan in planned {
        let signed = plan.paths.signed.as_path();
        let owner = plan.input.path.as_path();
        let clash = outputs
            .insert(signed, owner)
            .or_else(|| inputs.get(signed).copied());
        if let Some(first) = clash {
            return Err(ConfigError::OutputCollision {
                output: signed.to_path_buf(),
                first: first.to_path_buf(),
                second: owner.to_path_buf(),
            }
            .into());
        }
    }
    Ok(())
}

/// Workspace-relative, `/`-separated name of `path`.
///
/// Matched inputs carry canonical paths, which may differ from the root the
/// executor reports, so the canonical root is recovered from the input.
fn archive_name(root: &Path, input: &MatchedInput, path: &Path) -> Result<String> {
    let depth = input
        .relative_path
        .split('/')
        .filter(|s| !s.is_empty())
        .count();
    let canonical_root = input.path.ancestors().nth(depth);

    let relative = canonical_root
        .and_then(|r| path.strip_prefix(r).ok())
        .or_else(|| path.strip_prefix(root).ok())
        .ok_or_else(|| PipelineError::Workspace {
            operation: "archive".to_string(),
            path: path.to_path_buf(),
            reason: format!("not inside workspace {}", root.display()),
        })?;

    let name = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    Ok(name)
}
