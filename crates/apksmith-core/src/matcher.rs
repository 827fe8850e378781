//! Glob expansion of unsigned APK inputs
//!
//! Patterns follow Ant conventions: `*` and `?` stay within one path segment,
//! `**` spans any number of segments, and a trailing `/` means everything
//! below that directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::defaults::{DEFAULT_EXCLUDES, WORK_DIR_NAME};
use crate::error::WorkspaceError;
use crate::types::MatchedInput;

/// Split a comma-separated pattern list into trimmed, non-empty tokens
pub fn split_globs(patterns: &str) -> Vec<String> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands glob patterns against a workspace root
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    root: PathBuf,
    excludes: Vec<String>,
}

impl GlobMatcher {
    /// Create a matcher rooted at the workspace
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excludes: Vec::new(),
        }
    }

    /// Exclude additional patterns on top of the working subtree and the
    /// Ant default excludes
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(excludes.into_iter().map(Into::into));
        self
    }

    /// Workspace root the patterns are evaluated against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Expand `patterns` into the set of matching regular files.
    ///
    /// Every token must match at least one file on its own; the first token
    /// that matches nothing fails the whole call.
    pub fn match_patterns(
        &self,
        patterns: &str,
    ) -> std::result::Result<BTreeSet<MatchedInput>, WorkspaceError> {
        let tokens = split_globs(patterns);
        if tokens.is_empty() {
            return Err(WorkspaceError::NoMatch {
                pattern: patterns.to_string(),
            });
        }
        let compiled = tokens
            .iter()
            .map(|token| compile(token).map(|glob| glob.compile_matcher()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let excludes = self.exclude_set()?;

        let root = self
            .root
            .canonicalize()
            .map_err(|e| WorkspaceError::io("resolve workspace root", &self.root, e))?;
        debug!(root = %root.display(), patterns = ?tokens, "expanding globs");

        let mut hits = vec![0usize; tokens.len()];
        let mut found: BTreeMap<PathBuf, MatchedInput> = BTreeMap::new();

        let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
            entry.depth() != 1 || entry.file_name() != WORK_DIR_NAME
        });
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                WorkspaceError::Io {
                    operation: "walk workspace".to_string(),
                    path,
                    reason: e.to_string(),
                }
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(relative) = relative_name(&root, entry.path()) else {
                continue;
            };
            if excludes.is_match(&relative) {
                continue;
            }

            let mut matched = false;
            for (i, glob) in compiled.iter().enumerate() {
                if glob.is_match(&relative) {
                    hits[i] += 1;
                    matched = true;
                }
            }
            if !matched {
                continue;
            }

            let canonical = entry
                .path()
                .canonicalize()
                .map_err(|e| WorkspaceError::io("canonicalize", entry.path(), e))?;
            found.entry(canonical.clone()).or_insert_with(|| MatchedInput {
                path: canonical,
                name: entry.file_name().to_string_lossy().into_owned(),
                relative_path: relative,
            });
        }

        if let Some((token, _)) = tokens.iter().zip(&hits).find(|(_, count)| **count == 0) {
            return Err(WorkspaceError::NoMatch {
                pattern: token.clone(),
            });
        }

        info!(count = found.len(), patterns = %tokens.join(", "), "matched APKs");
        Ok(found.into_values().collect())
    }

    fn exclude_set(&self) -> std::result::Result<GlobSet, WorkspaceError> {
        let mut builder = GlobSetBuilder::new();
        builder.add(compile(&format!("{WORK_DIR_NAME}/**"))?);
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(self.excludes.iter().map(String::as_str))
        {
            builder.add(compile(pattern)?);
        }
        builder.build().map_err(|e| WorkspaceError::InvalidPattern {
            pattern: self.excludes.join(","),
            reason: e.to_string(),
        })
    }
}

/// Compile one Ant-style token
fn compile(token: &str) -> std::result::Result<globset::Glob, WorkspaceError> {
    let mut pattern = token.replace('\\', "/");
    if let Some(stripped) = pattern.strip_prefix("./") {
        pattern = stripped.to_string();
    }
    if pattern.ends_with('/') {
        pattern.push_str("**");
    }
    GlobBuilder::new(&pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| WorkspaceError::InvalidPattern {
            pattern: token.to_string(),
            reason: e.to_string(),
        })
}

/// `/`-separated path of `path` below `root`
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"PK").unwrap();
    }

    fn names(set: &BTreeSet<MatchedInput>) -> Vec<String> {
        set.iter().map(|m| m.relative_path.clone()).collect()
    }

    #[test]
    fn test_split_globs_trims_and_drops_empty() {
        assert_eq!(split_globs("*a, b/**, c/** ,"), vec!["*a", "b/**", "c/**"]);
        assert!(split_globs(" , ,").is_empty());
        assert_eq!(split_globs("single.apk"), vec!["single.apk"]);
    }

    #[test]
    fn test_overlapping_globs_match_once() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.apk");
        touch(temp.path(), "b.apk");

        let matcher = GlobMatcher::new(temp.path());
        let matched = matcher.match_patterns("a.apk, *.apk, **/a.apk").unwrap();
        assert_eq!(names(&matched), vec!["a.apk", "b.apk"]);
    }

    #[test]
    fn test_one_empty_glob_fails_the_request_in_any_position() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "app/build/app-unsigned.apk");
        touch(temp.path(), "lib.apk");
        let matcher = GlobMatcher::new(temp.path());

        for patterns in [
            "missing/*.apk, **/*-unsigned.apk, lib.apk",
            "**/*-unsigned.apk, missing/*.apk, lib.apk",
            "**/*-unsigned.apk, lib.apk, missing/*.apk",
        ] {
            let err = matcher.match_patterns(patterns).unwrap_err();
            assert_eq!(
                err,
                WorkspaceError::NoMatch {
                    pattern: "missing/*.apk".to_string()
                }
            );
        }
    }

    #[test]
    fn test_single_star_stays_in_one_directory() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "top-unsigned.apk");
        touch(temp.path(), "app/nested-unsigned.apk");
        let matcher = GlobMatcher::new(temp.path());

        let matched = matcher.match_patterns("*-unsigned.apk").unwrap();
        assert_eq!(names(&matched), vec!["top-unsigned.apk"]);

        let matched = matcher.match_patterns("**/*-unsigned.apk").unwrap();
        assert_eq!(names(&matched), vec!["app/nested-unsigned.apk", "top-unsigned.apk"]);
    }

    #[test]
    fn test_working_subtree_and_excludes_are_skipped() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "app.apk");
        touch(temp.path(), "apksmith-out/release/app.apk/app-signed.apk");
        touch(temp.path(), ".git/objects/x.apk");
        touch(temp.path(), "apksmith-artifacts/old.apk");

        let matcher = GlobMatcher::new(temp.path()).with_excludes(["apksmith-artifacts/**"]);
        let matched = matcher.match_patterns("**/*.apk").unwrap();
        assert_eq!(names(&matched), vec!["app.apk"]);
    }

    #[test]
    fn test_trailing_slash_means_everything_below() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "out/a.apk");
        touch(temp.path(), "out/deep/b.apk");

        let matched = GlobMatcher::new(temp.path()).match_patterns("out/").unwrap();
        assert_eq!(names(&matched), vec!["out/a.apk", "out/deep/b.apk"]);
    }

    #[test]
    fn test_directories_do_not_match() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("dir.apk")).unwrap();

        let err = GlobMatcher::new(temp.path()).match_patterns("*.apk").unwrap_err();
        assert!(matches!(err, WorkspaceError::NoMatch { .. }));
    }

    #[test]
    fn test_matches_are_absolute_and_canonical() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "x/app.apk");

        let matched = GlobMatcher::new(temp.path()).match_patterns("x\\app.apk").unwrap();
        let input = matched.iter().next().unwrap();
        assert!(input.path.is_absolute());
        assert_eq!(input.path, temp.path().join("x/app.apk").canonicalize().unwrap());
        assert_eq!(input.name, "app.apk");
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let temp = TempDir::new().unwrap();
        let err = GlobMatcher::new(temp.path()).match_patterns("a[.apk").unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPattern { .. }));
    }
}
