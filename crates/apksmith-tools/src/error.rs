//! Error types for tool discovery

use apksmith_core::WorkspaceError;
use thiserror::Error;

/// Result type alias for tool discovery
pub type Result<T> = std::result::Result<T, ToolError>;

/// Tool discovery errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// No source yielded an existing zipalign binary
    #[error("failed to find zipalign: {detail} (checked: {})", .checked.join(", "))]
    NotFound { checked: Vec<String>, detail: String },
}

impl From<ToolError> for WorkspaceError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound { checked, detail } => Self::ToolNotFound { checked, detail },
        }
    }
}
