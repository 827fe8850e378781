//! apksmith pipeline - aligning and signing unsigned APKs
//!
//! [`AlignAndSignPipeline`] runs one signing request: it expands the
//! request's globs, runs zipalign on every match, re-signs the aligned APK
//! with the request's key and hands the results to an [`ArtifactArchiver`].
//!
//! Every operation that touches the workspace goes through a
//! [`WorkspaceExecutor`], which either works on the local filesystem or
//! forwards requests to an agent running next to the workspace.

pub mod archive;
pub mod executor;
pub mod launcher;
pub mod pipeline;
pub mod zipalign;


pub use archive::{ArchiveRecord, ArtifactArchiver, DirectoryArchiver};
pub use executor::{
    serve_agent, LocalExecutor, RemoteExecutor, WorkspaceExecutor, WorkspaceRequest,
    WorkspaceResponse,
};
pub use launcher::{LaunchOutcome, LaunchSpec, ProcessLauncher, SystemLauncher};
pub use pipeline::AlignAndSignPipeline;
pub use zipalign::ZipalignTool;
