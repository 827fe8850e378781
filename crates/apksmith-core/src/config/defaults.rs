//! Default configuration values

/// Name of the reserved working subtree under the workspace root.
///
/// Intermediate and disambiguated output lives here and is never matched by
/// input globs.
pub const WORK_DIR_NAME: &str = "apksmith-out";

/// Default archive directory, relative to the workspace root
pub const DEFAULT_ARCHIVE_DIR: &str = "apksmith-artifacts";

/// Manifest written by the directory archiver
pub const ARTIFACT_MANIFEST: &str = "artifacts.json";

/// Ant default excludes applied to every glob
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/CVS/**",
    "**/.DS_Store",
];

/// Get default config file names in priority order
pub fn config_file_names() -> &'static [&'static str] {
    &["apksmith.toml", "apksmith.yaml", "apksmith.yml"]
}

pub(crate) fn default_true() -> bool {
    true
}
