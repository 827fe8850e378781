//! Output naming for signed APKs

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::defaults::WORK_DIR_NAME;
use crate::config::SignedApkMapping;
use crate::types::{MatchedInput, OutputPaths};

static UNSIGNED_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-?unsigned$").expect("Invalid regex"));

/// Canonical stem of an APK file name: the `.apk` extension and a trailing
/// `-unsigned`/`unsigned` are removed (`App-unsigned.apk` becomes `App`).
pub fn unqualified_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    UNSIGNED_SUFFIX.replace(&stem, "").into_owned()
}

/// Derives working directories and output names for the inputs of one request
#[derive(Debug, Clone)]
pub struct OutputNamer {
    workspace: PathBuf,
    working_key: PathBuf,
    mapping: SignedApkMapping,
}

impl OutputNamer {
    /// `working_key` scopes the request inside the working subtree, usually
    /// [`SigningRequest::working_key`](crate::config::SigningRequest::working_key)
    pub fn new(
        workspace: impl Into<PathBuf>,
        working_key: impl Into<PathBuf>,
        mapping: SignedApkMapping,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            working_key: working_key.into(),
            mapping,
        }
    }

    /// Working directory of the whole request
    pub fn request_dir(&self) -> PathBuf {
        self.workspace.join(WORK_DIR_NAME).join(&self.working_key)
    }

    /// Paths for one input.
    ///
    /// The working directory is keyed by the input's workspace-relative path,
    /// so inputs whose stems collide still get distinct directories.
    pub fn names_for(&self, input: &MatchedInput) -> OutputPaths {
        let mut working_dir = self.request_dir();
        for segment in input.relative_path.split('/').filter(|s| !s.is_empty()) {
            working_dir.push(safe_segment(segment));
        }

        let stem = unqualified_name(&input.name);
        let aligned = working_dir.join(format!("{stem}-aligned.apk"));
        let signed_name = format!("{stem}-signed.apk");
        let signed = match self.mapping {
            SignedApkMapping::UnsignedApkNameDir => working_dir.join(signed_name),
            SignedApkMapping::UnsignedApkSibling => match input.path.parent() {
                Some(parent) => parent.join(signed_name),
                None => working_dir.join(signed_name),
            },
        };

        OutputPaths {
            working_dir,
            aligned,
            signed,
        }
    }
}

/// Encode `value` as one path segment.
///
/// Letters, digits, `-`, `_` and `.` are kept and every other byte becomes
/// `%XX`, so distinct values give distinct segments and `@` never appears.
pub(crate) fn escape_segment(value: &str) -> String {
    match value {
        "" => return "%".to_string(),
        "." | ".." => return value.replace('.', "%2E"),
        _ => {}
    }
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn safe_segment(segment: &str) -> &str {
    match segment {
        "." | ".." => "_",
        other => other,
    }
}
