//! Error types for apksmith

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort a signing request.
///
/// Every variant is fatal: the request stops at the point the error is raised
/// and nothing produced so far is archived.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A glob token matched no files in the workspace
    #[error("No APKs in workspace matching {pattern}")]
    NoMatch { pattern: String },

    /// zipalign could not be found through any configured source
    #[error("failed to find zipalign: {detail} (checked: {})", .checked.join(", "))]
    ToolNotFound { checked: Vec<String>, detail: String },

    /// zipalign exited non-zero or did not produce its output
    #[error("failed aligning APK {input}{}: {reason}", exit_code_suffix(.exit_code))]
    AlignmentFailed {
        input: PathBuf,
        exit_code: Option<i32>,
        reason: String,
    },

    /// Key material could not be resolved from the credential
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// The signing engine failed
    #[error("failed to sign APK {input}: {reason}")]
    Signing { input: PathBuf, reason: String },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A filesystem operation on the workspace host failed
    #[error("workspace operation '{operation}' failed for {path}: {reason}")]
    Workspace {
        operation: String,
        path: PathBuf,
        reason: String,
    },

    /// The remote workspace agent could not be reached or answered garbage
    #[error("remote workspace transport error: {0}")]
    Transport(String),
}

fn exit_code_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => String::new(),
    }
}

impl PipelineError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoMatch { .. } => "no_match",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::AlignmentFailed { .. } => "alignment_failed",
            Self::KeyStore(_) => "key_store",
            Self::Signing { .. } => "signing",
            Self::Config(_) => "config",
            Self::Workspace { .. } => "workspace",
            Self::Transport(_) => "transport",
        }
    }
}

/// Key material resolution errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No credential with the given id
    #[error("key store credential {credential_id} not found")]
    CredentialNotFound { credential_id: String },

    /// The keystore needs a password but the credential supplied none.
    ///
    /// Credential backends normalise an empty password to "no password", which
    /// keystore formats cannot open. This is reported separately from a wrong
    /// password so the credential can be fixed instead of retried.
    #[error(
        "the password for key store credential {credential_id} is null - configure a non-empty password for the credential"
    )]
    NullPassword { credential_id: String },

    /// The password did not unlock the keystore or key
    #[error("incorrect password for key store credential {credential_id}")]
    IncorrectPassword { credential_id: String },

    /// No alias given and the keystore holds more than one key entry
    #[error(
        "no key alias was given and there is more than one key entry in key store {credential_id}: {}",
        .aliases.join(", ")
    )]
    AmbiguousKey {
        credential_id: String,
        aliases: Vec<String>,
    },

    /// No alias given and the keystore holds no key entries
    #[error("no key alias was given and no key entries were found in key store {credential_id}")]
    NoKeyEntries { credential_id: String },

    /// The requested alias is missing or not a key entry
    #[error("key store credential {credential_id} has no key entry named {alias}")]
    AliasNotFound {
        credential_id: String,
        alias: String,
    },

    /// The keystore could not be read or parsed
    #[error("Error reading keystore {credential_id}: {reason}")]
    Load {
        credential_id: String,
        reason: String,
    },
}

impl KeyStoreError {
    /// The credential this error refers to
    pub fn credential_id(&self) -> &str {
        match self {
            Self::CredentialNotFound { credential_id }
            | Self::NullPassword { credential_id }
            | Self::IncorrectPassword { credential_id }
            | Self::AmbiguousKey { credential_id, .. }
            | Self::NoKeyEntries { credential_id }
            | Self::AliasNotFound { credential_id, .. }
            | Self::Load { credential_id, .. } => credential_id,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// Two inputs of one request would write the same signed APK
    #[error("signed APK {output} would be produced by both {first} and {second}")]
    OutputCollision {
        output: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by operations that run on the workspace host.
///
/// These travel across the remote executor boundary, so they only carry
/// serializable context.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkspaceError {
    /// A glob token matched no files
    #[error("No APKs in workspace matching {pattern}")]
    NoMatch { pattern: String },

    /// A glob token could not be compiled
    #[error("invalid glob pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// zipalign was not found
    #[error("failed to find zipalign: {detail} (checked: {})", .checked.join(", "))]
    ToolNotFound { checked: Vec<String>, detail: String },

    /// The signing engine failed
    #[error("failed to sign APK {input}: {reason}")]
    Signing { input: PathBuf, reason: String },

    /// The host refused to touch a path or run a program
    #[error("workspace operation '{operation}' refused for {path}: {reason}")]
    Refused {
        operation: String,
        path: PathBuf,
        reason: String,
    },

    /// Filesystem or process I/O failed
    #[error("workspace operation '{operation}' failed for {path}: {reason}")]
    Io {
        operation: String,
        path: PathBuf,
        reason: String,
    },
}

impl WorkspaceError {
    /// Wrap an I/O error with the operation and path it happened on
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<WorkspaceError> for PipelineError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NoMatch { pattern } => Self::NoMatch { pattern },
            WorkspaceError::InvalidPattern { pattern, reason } => {
                Self::Config(ConfigError::InvalidValue {
                    field: "apks_to_sign".to_string(),
                    message: format!("invalid glob {pattern}: {reason}"),
                })
            }
            WorkspaceError::ToolNotFound { checked, detail } => {
                Self::ToolNotFound { checked, detail }
            }
            WorkspaceError::Signing { input, reason } => Self::Signing { input, reason },
            WorkspaceError::Refused {
                operation,
                path,
                reason,
            } => Self::Workspace {
                operation,
                path,
                reason: format!("refused, {reason}"),
            },
            WorkspaceError::Io {
                operation,
                path,
                reason,
            } => Self::Workspace {
                operation,
                path,
                reason,
            },
        }
    }
}
