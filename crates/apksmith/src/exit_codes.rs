//! Exit codes for the CLI

use apksmith_core::PipelineError;
use apksmith_signing::SigningError;
use apksmith_tools::ToolError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// A glob matched no APK
pub const NO_MATCH: i32 = 3;

/// zipalign not found
pub const TOOL_NOT_FOUND: i32 = 4;

/// Key material could not be resolved
pub const KEY_STORE_ERROR: i32 = 5;

/// zipalign failed
pub const ALIGNMENT_FAILED: i32 = 6;

/// The signing engine failed
pub const SIGNING_ERROR: i32 = 7;

/// An APK did not verify
pub const VERIFICATION_FAILED: i32 = 8;

/// The workspace agent could not be reached
pub const TRANSPORT_ERROR: i32 = 9;

/// Exit code for an error returned by a command
pub fn for_error(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<PipelineError>() {
        return match err {
            PipelineError::NoMatch { .. } => NO_MATCH,
            PipelineError::ToolNotFound { .. } => TOOL_NOT_FOUND,
            PipelineError::AlignmentFailed { .. } => ALIGNMENT_FAILED,
            PipelineError::KeyStore(_) => KEY_STORE_ERROR,
            PipelineError::Signing { .. } => SIGNING_ERROR,
            PipelineError::Config(_) => CONFIG_ERROR,
            PipelineError::Workspace { .. } => ERROR,
            PipelineError::Transport(_) => TRANSPORT_ERROR,
        };
    }
    if let Some(ToolError::NotFound { .. }) = err.downcast_ref::<ToolError>() {
        return TOOL_NOT_FOUND;
    }
    if let Some(err) = err.downcast_ref::<SigningError>() {
        return match err {
            SigningError::VerificationFailed { .. } => VERIFICATION_FAILED,
            _ => SIGNING_ERROR,
        };
    }
    ERROR
}
