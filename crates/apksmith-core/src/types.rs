//! Core value types shared across crates

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One unsigned APK found by glob expansion.
///
/// Ordered and compared by its canonical absolute path first, so a set of
/// inputs is deterministic and never holds the same file twice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchedInput {
    /// Canonical absolute path
    pub path: PathBuf,
    /// File name, e.g. `app-unsigned.apk`
    pub name: String,
    /// Path relative to the workspace root, always `/`-separated
    pub relative_path: String,
}

/// Where the intermediate and final artifacts for one input are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    /// Per-input working directory, cleared before each run
    pub working_dir: PathBuf,
    /// zipalign output
    pub aligned: PathBuf,
    /// Final signed APK
    pub signed: PathBuf,
}

/// Whether an archived artifact is the input or the output of signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Unsigned,
    Signed,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned => f.write_str("unsigned"),
            Self::Signed => f.write_str("signed"),
        }
    }
}

/// An artifact produced or consumed by a signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    /// Workspace-relative name the artifact is archived under
    pub name: String,
    /// Absolute path on the workspace host
    pub source: PathBuf,
    pub kind: ArtifactKind,
    /// Whether the artifact was handed to the archiver
    pub archived: bool,
}

/// Result of the build so far, as reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    #[default]
    Success,
    Unstable,
    Failure,
    Aborted,
}

impl BuildResult {
    /// A step is skipped when the build is already in a worse state than unstable
    pub fn is_worse_than_unstable(&self) -> bool {
        *self > Self::Unstable
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Unstable => "unstable",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for BuildResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "unstable" => Ok(Self::Unstable),
            "failure" | "failed" => Ok(Self::Failure),
            "aborted" => Ok(Self::Aborted),
            other => Err(format!(
                "unknown build result '{other}', expected success, unstable, failure or aborted"
            )),
        }
    }
}

/// Outcome of one signing step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "artifacts", rename_all = "lowercase")]
pub enum StepOutcome {
    /// The step did nothing because an earlier part of the build failed
    Skipped,
    /// The step ran to completion
    Completed(Vec<ProducedArtifact>),
}

impl StepOutcome {
    /// Artifacts of a completed step, empty when skipped
    pub fn artifacts(&self) -> &[ProducedArtifact] {
        match self {
            Self::Skipped => &[],
            Self::Completed(artifacts) => artifacts,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}
