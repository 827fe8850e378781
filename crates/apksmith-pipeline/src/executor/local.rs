//! Executor working directly on the local filesystem

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use apksmith_core::config::WORK_DIR_NAME;
use apksmith_core::{GlobMatcher, MatchedInput, Result, WorkspaceError};
use apksmith_signing::KeySigningMaterial;
use apksmith_tools::{ToolEnvironment, ToolLocation, ZipalignLocator, ZipalignOverrides};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::WorkspaceExecutor;
use crate::launcher::{LaunchOutcome, LaunchSpec, ProcessLauncher, SystemLauncher};

type WorkspaceResult<T> = std::result::Result<T, WorkspaceError>;

/// Runs workspace operations in this process.
///
/// Every path must stay inside the workspace root once symlinks are
/// followed, and the only program ever launched is a zipalign this executor
/// located itself. The inherent methods report [`WorkspaceError`]s so the
/// agent can send them back over the wire unchanged.
pub struct LocalExecutor {
    root: PathBuf,
    env: ToolEnvironment,
    launcher: Arc<dyn ProcessLauncher>,
    located: Mutex<BTreeSet<PathBuf>>,
}

impl LocalExecutor {
    /// Executor for `root` using this process's environment and real processes
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            env: ToolEnvironment::from_process(),
            launcher: Arc::new(SystemLauncher),
            located: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_env(mut self, env: ToolEnvironment) -> Self {
        self.env = env;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env(&self) -> &ToolEnvironment {
        &self.env
    }

    /// `path` inside the canonical workspace root.
    ///
    /// Relative paths resolve against the root. Absolute paths must start
    /// with the root as given or as canonicalized. `..` is never accepted,
    /// and the nearest existing ancestor must canonicalize into the root.
    fn resolve(&self, operation: &str, path: &Path) -> WorkspaceResult<PathBuf> {
        let refused = |reason: &str| WorkspaceError::Refused {
            operation: operation.to_string(),
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(refused("parent directory components are not allowed"));
        }

        let root = std::fs::canonicalize(&self.root)
            .map_err(|e| WorkspaceError::io("resolve workspace root", &self.root, e))?;
        let joined = self.root.join(path);
        let relative = joined
            .strip_prefix(&self.root)
            .or_else(|_| joined.strip_prefix(&root))
            .map_err(|_| refused("outside the workspace"))?;
        let resolved = root.join(relative);

        let existing = resolved
            .ancestors()
            .find(|a| a.symlink_metadata().is_ok())
            .unwrap_or(root.as_path());
        let canonical = std::fs::canonicalize(existing)
            .map_err(|e| WorkspaceError::io(operation, existing, e))?;
        if !canonical.starts_with(&root) {
            warn!(operation, path = %path.display(), target = %canonical.display(), "refused path leaving the workspace");
            return Err(refused("outside the workspace"));
        }
        Ok(resolved)
    }

    pub async fn match_inputs_local(
        &self,
        patterns: &str,
        excludes: &[String],
    ) -> WorkspaceResult<BTreeSet<MatchedInput>> {
        let matcher = GlobMatcher::new(self.root.clone()).with_excludes(excludes.to_vec());
        let patterns = patterns.to_string();
        tokio::task::spawn_blocking(move || matcher.match_patterns(&patterns))
            .await
            .map_err(|e| WorkspaceError::Io {
                operation: "match".to_string(),
                path: self.root.clone(),
                reason: e.to_string(),
            })?
    }

    /// Locate zipalign and remember it as the one program [`Self::align_local`]
    /// may run
    pub fn locate_zipalign_local(
        &self,
        overrides: &ZipalignOverrides,
    ) -> WorkspaceResult<ToolLocation> {
        let location = ZipalignLocator::new(&self.env, &self.root).locate(overrides)?;
        if !location.is_zipalign() {
            return Err(WorkspaceError::Refused {
                operation: "locate zipalign".to_string(),
                path: location.path,
                reason: "not a zipalign binary".to_string(),
            });
        }
        if let Ok(mut located) = self.located.lock() {
            located.insert(location.path.clone());
        }
        Ok(location)
    }

    /// Clear and create a directory of the working subtree
    pub async fn prepare_dir_local(&self, dir: &Path) -> WorkspaceResult<()> {
        let resolved = self.resolve("prepare directory", dir)?;
        let work_dir = self.resolve("prepare directory", Path::new(WORK_DIR_NAME))?;
        if resolved == work_dir || !resolved.starts_with(&work_dir) {
            return Err(WorkspaceError::Refused {
                operation: "prepare directory".to_string(),
                path: dir.to_path_buf(),
                reason: format!("only directories below {WORK_DIR_NAME}/ are prepared"),
            });
        }

        match tokio::fs::remove_dir_all(&resolved).await {
            Ok(()) => debug!(dir = %resolved.display(), "cleared working directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(WorkspaceError::io("clear directory", &resolved, e)),
        }
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| WorkspaceError::io("create directory", &resolved, e))
    }

    pub async fn exists_local(&self, path: &Path) -> WorkspaceResult<bool> {
        let path = self.resolve("stat", path)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| WorkspaceError::io("stat", &path, e))
    }

    pub async fn delete_local(&self, path: &Path) -> WorkspaceResult<bool> {
        let path = self.resolve("delete", path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(WorkspaceError::io("delete", &path, e)),
        }
    }

    /// Run `tool` on `input` into `output` from the workspace root.
    ///
    /// `tool` must be a location this executor returned earlier.
    pub async fn align_local(
        &self,
        tool: &ToolLocation,
        input: &Path,
        output: &Path,
    ) -> WorkspaceResult<LaunchOutcome> {
        let known = self
            .located
            .lock()
            .map(|located| located.contains(&tool.path))
            .unwrap_or(false);
        if !known {
            warn!(program = %tool.path.display(), "refused to launch a program it did not locate");
            return Err(WorkspaceError::Refused {
                operation: "align".to_string(),
                path: tool.path.clone(),
                reason: "not a zipalign located on this host".to_string(),
            });
        }

        let input = self.resolve("align", input)?;
        let output = self.resolve("align", output)?;
        let command = tool.align_command(&input, &output);
        let spec = LaunchSpec::from_command(&command, &self.root)
            .ok_or_else(|| WorkspaceError::Io {
                operation: "align".to_string(),
                path: tool.path.clone(),
                reason: "empty command line".to_string(),
            })?
            .with_env(self.env.vars().clone());
        self.launcher
            .launch(&spec)
            .await
            .map_err(|e| WorkspaceError::io("launch", &spec.program, e))
    }

    pub async fn sign_apk_local(
        &self,
        input: &Path,
        output: &Path,
        material: &KeySigningMaterial,
    ) -> WorkspaceResult<()> {
        let input = self.resolve("sign", input)?;
        let output = self.resolve("sign", output)?;
        let material = material.clone();
        let signed_input = input.clone();
        tokio::task::spawn_blocking(move || {
            apksmith_signing::sign_apk(&signed_input, &output, &material)
                .map_err(|e| e.for_input(&signed_input))
        })
        .await
        .map_err(|e| WorkspaceError::Signing {
            input,
            reason: e.to_string(),
        })?
    }

    pub async fn read_file_local(&self, path: &Path) -> WorkspaceResult<Vec<u8>> {
        let path = self.resolve("read", path)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| WorkspaceError::io("read", &path, e))
    }
}

#[async_trait]
impl WorkspaceExecutor for LocalExecutor {
    async fn workspace_root(&self) -> Result<PathBuf> {
        Ok(self.root.clone())
    }

    async fn match_inputs(
        &self,
        patterns: &str,
        excludes: &[String],
    ) -> Result<BTreeSet<MatchedInput>> {
        Ok(self.match_inputs_local(patterns, excludes).await?)
    }

    async fn locate_zipalign(&self, overrides: &ZipalignOverrides) -> Result<ToolLocation> {
        Ok(self.locate_zipalign_local(overrides)?)
    }

    async fn prepare_dir(&self, dir: &Path) -> Result<()> {
        Ok(self.prepare_dir_local(dir).await?)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.exists_local(path).await?)
    }

    async fn delete(&self, path: &Path) -> Result<bool> {
        Ok(self.delete_local(path).await?)
    }

    async fn align(
        &self,
        tool: &ToolLocation,
        input: &Path,
        output: &Path,
    ) -> Result<LaunchOutcome> {
        Ok(self.align_local(tool, input, output).await?)
    }

    async fn sign_apk(
        &self,
        input: &Path,
        output: &Path,
        material: &KeySigningMaterial,
    ) -> Result<()> {
        Ok(self.sign_apk_local(input, output, material).await?)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(self.read_file_local(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apksmith_tools::ToolSource;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_dir_clears_previous_contents() {
        let temp = TempDir::new().unwrap();
        let executor = LocalExecutor::new(temp.path());
        let dir = temp.path().join("apksmith-out/release/app.apk");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale-signed.apk"), b"old").unwrap();

        executor.prepare_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_dir_stays_in_working_subtree() {
        let temp = TempDir::new().unwrap();
        let executor = LocalExecutor::new(temp.path());
        std::fs::create_dir_all(temp.path().join("app/src")).unwrap();
        std::fs::write(temp.path().join("app/src/Main.kt"), b"keep").unwrap();

        for dir in [
            temp.path().join("app"),
            temp.path().to_path_buf(),
            temp.path().join("apksmith-out"),
            PathBuf::from("apksmith-out/../app"),
        ] {
            let err = executor.prepare_dir(&dir).await.unwrap_err();
            assert_eq!(err.kind(), "workspace", "{}", dir.display());
        }
        assert!(temp.path().join("app/src/Main.kt").exists());
    }

    #[tokio::test]
    async fn test_paths_outside_the_workspace_are_refused() {
        let workspace = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let secret = elsewhere.path().join("secret.txt");
        std::fs::write(&secret, b"data").unwrap();
        let executor = LocalExecutor::new(workspace.path());

        let err = executor.read_file_local(&secret).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Refused { .. }));
        assert!(executor.delete_local(&secret).await.is_err());
        assert!(executor
            .exists_local(Path::new("../secret.txt"))
            .await
            .is_err());
        assert!(secret.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_leaving_the_workspace_are_refused() {
        let workspace = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        std::fs::write(elsewhere.path().join("secret.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), workspace.path().join("link")).unwrap();
        let executor = LocalExecutor::new(workspace.path());

        let err = executor
            .read_file_local(Path::new("link/secret.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Refused { .. }));
        assert!(executor
            .sign_apk_local(
                Path::new("link/secret.txt"),
                Path::new("link/out.apk"),
                &test_material(),
            )
            .await
            .is_err());
        assert!(!elsewhere.path().join("out.apk").exists());
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let temp = TempDir::new().unwrap();
        let executor = LocalExecutor::new(temp.path());
        std::fs::write(temp.path().join("a.apk"), b"x").unwrap();

        assert!(executor.exists(Path::new("a.apk")).await.unwrap());
        assert!(executor.delete(Path::new("a.apk")).await.unwrap());
        assert!(!executor.delete(Path::new("a.apk")).await.unwrap());
        assert!(!executor.exists(Path::new("a.apk")).await.unwrap());
    }

    #[tokio::test]
    async fn test_match_inputs_reports_unmatched_token() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("app-unsigned.apk"), b"x").unwrap();
        let executor = LocalExecutor::new(temp.path());

        let inputs = executor.match_inputs("*.apk", &[]).await.unwrap();
        assert_eq!(inputs.len(), 1);

        let err = executor
            .match_inputs("*.apk, missing/**", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no_match");
        assert!(err.to_string().contains("missing/**"));
    }

    #[tokio::test]
    async fn test_locate_uses_executor_environment() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("zipalign");
        std::fs::write(&tool, b"").unwrap();
        let env = ToolEnvironment::new([("ANDROID_ZIPALIGN", tool.to_string_lossy().to_string())]);
        let executor = LocalExecutor::new(temp.path()).with_env(env);

        let location = executor
            .locate_zipalign(&ZipalignOverrides::default())
            .await
            .unwrap();
        assert_eq!(location.path, tool);

        let executor = LocalExecutor::new(temp.path()).with_env(ToolEnvironment::default());
        let err = executor
            .locate_zipalign(&ZipalignOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_not_found");
    }

    #[tokio::test]
    async fn test_only_located_zipalign_is_launched() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("zipalign"), b"").unwrap();
        std::fs::write(temp.path().join("app.apk"), b"x").unwrap();
        let executor = LocalExecutor::new(temp.path()).with_env(ToolEnvironment::default());

        let shell = ToolLocation {
            path: PathBuf::from("/bin/sh"),
            source: ToolSource::ZipalignPathOverride,
        };
        let err = executor
            .align(&shell, Path::new("app.apk"), Path::new("out.apk"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "workspace");

        let overrides = ZipalignOverrides {
            zipalign_path: Some("/bin/sh".to_string()),
            android_home: None,
        };
        assert!(executor.locate_zipalign(&overrides).await.is_err());
        assert!(executor
            .align(&shell, Path::new("app.apk"), Path::new("out.apk"))
            .await
            .is_err());
    }

    fn test_material() -> KeySigningMaterial {
        use openssl::pkey::PKey;
        use openssl::rsa::Rsa;
        use openssl::x509::{X509Builder, X509NameBuilder};

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Test").unwrap();
        let name = name.build();
        let mut builder = X509Builder::new().unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .sign(&key, openssl::hash::MessageDigest::sha256())
            .unwrap();
        KeySigningMaterial::new(&key, &[builder.build()], "test").unwrap()
    }
}
