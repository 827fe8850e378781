//! Error types for the signing engine

use std::path::PathBuf;

use apksmith_core::WorkspaceError;
use thiserror::Error;

/// Result type alias for signing operations
pub type Result<T> = std::result::Result<T, SigningError>;

/// Signing engine errors.
///
/// Key resolution failures are reported as
/// [`KeyStoreError`](apksmith_core::KeyStoreError) instead.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The input is not a ZIP archive this engine can rewrite
    #[error("Invalid APK: {0}")]
    InvalidApk(String),

    /// Key material could not be decoded
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// The key type has no APK signature algorithm
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedKey(String),

    /// A signature did not verify
    #[error("Signature verification failed for {path}: {reason}")]
    VerificationFailed { path: PathBuf, reason: String },

    /// OpenSSL error
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// Error reading an entry through the zip reader
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SigningError {
    /// Report this error as a signing failure of `input` on the workspace host
    pub fn for_input(self, input: impl Into<PathBuf>) -> WorkspaceError {
        WorkspaceError::Signing {
            input: input.into(),
            reason: self.to_string(),
        }
    }
}
