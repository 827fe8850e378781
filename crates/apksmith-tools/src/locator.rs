//! zipalign discovery
//!
//! Sources are tried in a fixed order and the first one that yields an
//! existing binary wins:
//!
//! 1. the step's `zipalign_path` override
//! 2. the step's `android_home` override
//! 3. `ANDROID_ZIPALIGN`
//! 4. `ANDROID_HOME`
//! 5. the directories on `PATH`, including SDKs recognised from their layout
//!
//! An SDK home is searched in its newest `build-tools/<version>` directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use apksmith_core::SigningRequest;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ToolError};
use crate::version::DottedVersion;

/// Environment variable naming the zipalign binary
pub const ENV_ZIPALIGN: &str = "ANDROID_ZIPALIGN";
/// Environment variable naming the Android SDK home
pub const ENV_ANDROID_HOME: &str = "ANDROID_HOME";
/// Executable search path
pub const ENV_PATH: &str = "PATH";

const TOOL_NAMES: &[&str] = &["zipalign", "zipalign.exe", "zipalign.bat"];
const WINDOWS_SUFFIXES: &[&str] = &[".exe", ".bat"];

/// The build environment of the workspace host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEnvironment {
    vars: BTreeMap<String, String>,
    path_separator: char,
}

impl ToolEnvironment {
    /// Environment of the current process
    pub fn from_process() -> Self {
        Self::new(std::env::vars()).with_path_separator(if cfg!(windows) { ';' } else { ':' })
    }

    /// Environment built from explicit variables, using `:` between `PATH`
    /// entries
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            path_separator: ':',
        }
    }

    pub fn with_path_separator(mut self, separator: char) -> Self {
        self.path_separator = separator;
        self
    }

    pub fn path_separator(&self) -> char {
        self.path_separator
    }

    /// Value of a variable, treating an empty value as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// All variables, e.g. to hand to a child process
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Expand `$VAR`, `${VAR}` and a leading `~` against this environment
    pub fn expand(&self, value: &str) -> String {
        shellexpand::full_with_context_no_errors(
            value,
            || {
                self.get("HOME").map(str::to_string).or_else(|| {
                    dirs::home_dir().map(|home| home.to_string_lossy().into_owned())
                })
            },
            |name| self.get(name),
        )
        .into_owned()
    }
}

impl Default for ToolEnvironment {
    fn default() -> Self {
        Self::new(std::iter::empty::<(String, String)>())
    }
}

/// The per-step overrides that take precedence over the environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipalignOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zipalign_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_home: Option<String>,
}

impl ZipalignOverrides {
    pub fn from_request(request: &SigningRequest) -> Self {
        Self {
            zipalign_path: request.zipalign_override().map(str::to_string),
            android_home: request.android_home_override().map(str::to_string),
        }
    }
}

/// Which source a zipalign location came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    ZipalignPathOverride,
    AndroidHomeOverride,
    ZipalignEnv,
    AndroidHomeEnv,
    SearchPath,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZipalignPathOverride => f.write_str("zipalign_path"),
            Self::AndroidHomeOverride => f.write_str("android_home"),
            Self::ZipalignEnv => f.write_str(ENV_ZIPALIGN),
            Self::AndroidHomeEnv => f.write_str(ENV_ANDROID_HOME),
            Self::SearchPath => f.write_str(ENV_PATH),
        }
    }
}

/// A resolved zipalign binary that existed when it was located
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLocation {
    pub path: PathBuf,
    pub source: ToolSource,
}

impl ToolLocation {
    /// Whether the located file carries one of zipalign's platform names
    pub fn is_zipalign(&self) -> bool {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| TOOL_NAMES.iter().any(|t| t.eq_ignore_ascii_case(name)))
    }

    /// Command line aligning `input` to 4 bytes into `output`, overwriting it
    /// and page-aligning uncompressed shared libraries
    pub fn align_command(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            self.path.to_string_lossy().into_owned(),
            "-f".to_string(),
            "-p".to_string(),
            "4".to_string(),
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

/// Finds zipalign on the workspace host
#[derive(Debug, Clone)]
pub struct ZipalignLocator<'a> {
    env: &'a ToolEnvironment,
    workspace: &'a Path,
}

impl<'a> ZipalignLocator<'a> {
    /// Relative paths from any source resolve against `workspace`
    pub fn new(env: &'a ToolEnvironment, workspace: &'a Path) -> Self {
        Self { env, workspace }
    }

    /// Resolve zipalign, trying each source in precedence order
    pub fn locate(&self, overrides: &ZipalignOverrides) -> Result<ToolLocation> {
        let zipalign_path = non_empty(overrides.zipalign_path.as_deref());
        let android_home = non_empty(overrides.android_home.as_deref());

        if let Some(value) = zipalign_path {
            if let Some(path) = self.tool_at(value) {
                return Ok(found(path, ToolSource::ZipalignPathOverride));
            }
        }
        if let Some(value) = android_home {
            if let Some(path) = self.in_android_home(value) {
                return Ok(found(path, ToolSource::AndroidHomeOverride));
            }
        }
        if let Some(value) = self.env.get(ENV_ZIPALIGN) {
            if let Some(path) = self.tool_at(value) {
                return Ok(found(path, ToolSource::ZipalignEnv));
            }
        }
        if let Some(value) = self.env.get(ENV_ANDROID_HOME) {
            if let Some(path) = self.in_android_home(value) {
                return Ok(found(path, ToolSource::AndroidHomeEnv));
            }
        }
        if let Some(value) = self.env.get(ENV_PATH) {
            if let Some(path) = self.on_search_path(value) {
                return Ok(found(path, ToolSource::SearchPath));
            }
        }

        let checked = vec![
            describe("zipalign_path", zipalign_path),
            describe("android_home", android_home),
            describe(ENV_ZIPALIGN, self.env.get(ENV_ZIPALIGN)),
            describe(ENV_ANDROID_HOME, self.env.get(ENV_ANDROID_HOME)),
            describe(ENV_PATH, self.env.get(ENV_PATH).map(|_| "...")),
        ];
        let detail = if checked.iter().all(|c| c.ends_with("(not set)")) {
            format!(
                "none of zipalign_path, android_home, {ENV_ZIPALIGN}, {ENV_ANDROID_HOME} or {ENV_PATH} is set"
            )
        } else {
            "no zipalign binary exists at any configured location".to_string()
        };
        Err(ToolError::NotFound { checked, detail })
    }

    fn resolve(&self, value: &str) -> PathBuf {
        self.workspace.join(self.env.expand(value.trim()))
    }

    /// A path given for the tool itself
    fn tool_at(&self, value: &str) -> Option<PathBuf> {
        let path = self.resolve(value);
        debug!(path = %path.display(), "checking zipalign path");
        tool_in(&path)
    }

    /// zipalign in the newest build-tools of an SDK home given as a setting
    fn in_android_home(&self, value: &str) -> Option<PathBuf> {
        find_in_android_home(&self.resolve(value))
    }

    fn on_search_path(&self, value: &str) -> Option<PathBuf> {
        value
            .split(self.env.path_separator())
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .find_map(|dir| {
                let dir = self.resolve(dir);
                if let Some(path) = direct_tool(&dir) {
                    return Some(path);
                }
                let home = sdk_home_from_path_dir(&dir)?;
                debug!(dir = %dir.display(), home = %home.display(), "recognised Android SDK on PATH");
                find_in_android_home(&home)
            })
    }
}

fn found(path: PathBuf, source: ToolSource) -> ToolLocation {
    info!(path = %path.display(), %source, "found zipalign");
    ToolLocation { path, source }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn describe(name: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{name}={v}"),
        None => format!("{name} (not set)"),
    }
}

/// The tool inside a directory, under any of its platform names
fn direct_tool(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    TOOL_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// A tool path as configured: a directory holding the tool, the tool itself,
/// or the tool's name without its `.exe`/`.bat` suffix
fn tool_in(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        return direct_tool(path);
    }
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let parent = path.parent()?;
    let name = path.file_name()?.to_string_lossy();
    WINDOWS_SUFFIXES
        .iter()
        .map(|suffix| parent.join(format!("{name}{suffix}")))
        .find(|candidate| candidate.is_file())
}

/// zipalign inside the newest `build-tools/<version>` of an SDK home
pub fn find_in_android_home(home: &Path) -> Option<PathBuf> {
    let build_tools = home.join("build-tools");
    let entries = std::fs::read_dir(&build_tools).ok()?;

    let latest = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            (DottedVersion::parse(&name), name, e.path())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))?;

    debug!(build_tools = %latest.2.display(), "selected newest build-tools");
    direct_tool(&latest.2)
}

/// Infer the SDK home from a `PATH` entry inside an SDK
fn sdk_home_from_path_dir(dir: &Path) -> Option<PathBuf> {
    let name = dir.file_name().map(|n| n.to_string_lossy().into_owned());
    let parent = dir.parent();

    match name.as_deref() {
        // <sdk>/tools/bin, holding sdkmanager
        Some("bin") if has_marker(dir, "sdkmanager") => {
            let tools = parent?;
            if tools.file_name().is_some_and(|n| n == "tools") {
                return tools.parent().map(Path::to_path_buf);
            }
        }
        // <sdk>/tools, holding the legacy android launcher
        Some("tools") if has_marker(dir, "android") => {
            return parent.map(Path::to_path_buf);
        }
        _ => {}
    }

    if has_marker(&dir.join("tools"), "android") {
        return Some(dir.to_path_buf());
    }
    None
}

fn has_marker(dir: &Path, name: &str) -> bool {
    std::iter::once(String::new())
        .chain(WINDOWS_SUFFIXES.iter().map(|s| s.to_string()))
        .any(|suffix| dir.join(format!("{name}{suffix}")).is_file())
}
