//! apksmith core - shared types for the APK align-and-sign pipeline
//!
//! This crate holds everything that does not need key material or an
//! external process: the signing request and project configuration, glob
//! matching of unsigned APKs, derivation of output names, and migration of
//! legacy multi-entry configuration.

pub mod config;
pub mod error;
pub mod matcher;
pub mod migration;
pub mod naming;
pub mod types;

pub use config::{
    Config, CredentialConfig, KeyStoreFormat, SignedApkMapping, SigningRequest, StepConfig,
};
pub use error::{ConfigError, KeyStoreError, PipelineError, Result, WorkspaceError};
pub use matcher::{split_globs, GlobMatcher};
pub use naming::{unqualified_name, OutputNamer};
pub use types::{ArtifactKind, BuildResult, MatchedInput, OutputPaths, ProducedArtifact, StepOutcome};
