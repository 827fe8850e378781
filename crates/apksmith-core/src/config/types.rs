//! Configuration types

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::defaults::{default_true, DEFAULT_ARCHIVE_DIR};
use crate::matcher::split_globs;
use crate::migration::LegacyStep;
use crate::naming::escape_segment;

/// Project configuration for apksmith
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signing steps, run in order
    pub steps: Vec<StepConfig>,

    /// Keystore credentials, keyed by credential id
    pub credentials: BTreeMap<String, CredentialConfig>,

    /// Artifact archiving
    pub archive: ArchiveConfig,
}

impl Config {
    /// All steps in single-entry shape, migrating legacy entries on the way
    pub fn requests(&self) -> Vec<SigningRequest> {
        crate::migration::migrate_steps(&self.steps)
    }
}

/// One configured step: either the current single-entry shape or the legacy
/// multi-entry shape that predates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepConfig {
    /// Legacy step bundling several signing entries
    Legacy(LegacyStep),
    /// Single-entry step
    Single(SigningRequest),
}

/// Where the signed APK for an unsigned input is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedApkMapping {
    /// Inside the working subtree, in a directory keyed by the input:
    /// `<workspace>/apksmith-out/<request key>/<input path>/<name>-signed.apk`
    #[default]
    #[serde(alias = "unsignedApkNameDir")]
    UnsignedApkNameDir,

    /// Next to the unsigned input: `<input dir>/<name>-signed.apk`
    #[serde(alias = "unsignedApkSibling")]
    UnsignedApkSibling,
}

impl SignedApkMapping {
    /// Stable selection key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsignedApkNameDir => "unsigned_apk_name_dir",
            Self::UnsignedApkSibling => "unsigned_apk_sibling",
        }
    }
}

impl fmt::Display for SignedApkMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignedApkMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned_apk_name_dir" | "unsignedApkNameDir" | "name-dir" => {
                Ok(Self::UnsignedApkNameDir)
            }
            "unsigned_apk_sibling" | "unsignedApkSibling" | "sibling" => {
                Ok(Self::UnsignedApkSibling)
            }
            other => Err(format!(
                "unknown signed APK mapping '{other}', expected unsigned_apk_name_dir or unsigned_apk_sibling"
            )),
        }
    }
}

/// Configuration of one signing step.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Credential id of the keystore holding the signing key
    #[serde(alias = "keyStoreId")]
    pub key_store_id: String,

    /// Alias of the key inside the keystore; resolved automatically when absent
    #[serde(default, alias = "keyAlias", skip_serializing_if = "Option::is_none")]
    pub key_alias: Option<String>,

    /// Comma-separated Ant-style globs selecting the unsigned APKs
    #[serde(alias = "apksToSign")]
    pub apks_to_sign: String,

    /// Sign the inputs as they are, without running zipalign
    #[serde(default, alias = "skipZipalign")]
    pub skip_zipalign: bool,

    /// Archive the signed APKs
    #[serde(default = "default_true", alias = "archiveSignedApks")]
    pub archive_signed_apks: bool,

    /// Archive the unsigned inputs
    #[serde(default, alias = "archiveUnsignedApks")]
    pub archive_unsigned_apks: bool,

    /// Android SDK home override, subject to environment expansion
    #[serde(default, alias = "androidHome", skip_serializing_if = "Option::is_none")]
    pub android_home: Option<String>,

    /// zipalign path override, subject to environment expansion.
    /// Takes precedence over `android_home`.
    #[serde(default, alias = "zipalignPath", skip_serializing_if = "Option::is_none")]
    pub zipalign_path: Option<String>,

    /// Destination mapping for signed APKs
    #[serde(default, alias = "signedApkMapping")]
    pub signed_apk_mapping: SignedApkMapping,
}

impl SigningRequest {
    /// Create a request with default flags
    pub fn new(key_store_id: impl Into<String>, apks_to_sign: impl Into<String>) -> Self {
        Self {
            key_store_id: key_store_id.into(),
            key_alias: None,
            apks_to_sign: apks_to_sign.into(),
            skip_zipalign: false,
            archive_signed_apks: true,
            archive_unsigned_apks: false,
            android_home: None,
            zipalign_path: None,
            signed_apk_mapping: SignedApkMapping::default(),
        }
    }

    pub fn with_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.key_alias = Some(alias.into());
        self
    }

    pub fn with_skip_zipalign(mut self, skip: bool) -> Self {
        self.skip_zipalign = skip;
        self
    }

    pub fn with_archive(mut self, signed: bool, unsigned: bool) -> Self {
        self.archive_signed_apks = signed;
        self.archive_unsigned_apks = unsigned;
        self
    }

    pub fn with_android_home(mut self, home: impl Into<String>) -> Self {
        self.android_home = Some(home.into());
        self
    }

    pub fn with_zipalign_path(mut self, path: impl Into<String>) -> Self {
        self.zipalign_path = Some(path.into());
        self
    }

    pub fn with_mapping(mut self, mapping: SignedApkMapping) -> Self {
        self.signed_apk_mapping = mapping;
        self
    }

    /// The non-empty, trimmed glob tokens of `apks_to_sign`
    pub fn globs(&self) -> Vec<String> {
        split_globs(&self.apks_to_sign)
    }

    /// Key alias, treating an empty string as absent
    pub fn alias(&self) -> Option<&str> {
        non_empty(self.key_alias.as_deref())
    }

    /// zipalign path override, treating an empty string as absent
    pub fn zipalign_override(&self) -> Option<&str> {
        non_empty(self.zipalign_path.as_deref())
    }

    /// Android home override, treating an empty string as absent
    pub fn android_home_override(&self) -> Option<&str> {
        non_empty(self.android_home.as_deref())
    }

    /// Key of this request's directory inside the working subtree.
    ///
    /// One path segment, `<id>` or `<id>@<alias>` with both parts escaped,
    /// so distinct keys never share a directory and a key never reads as
    /// the start of an input path.
    pub fn working_key(&self) -> PathBuf {
        let mut key = escape_segment(self.key_store_id.trim());
        if let Some(alias) = self.alias() {
            key.push('@');
            key.push_str(&escape_segment(alias));
        }
        PathBuf::from(key)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Keystore file formats understood by the file credential store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStoreFormat {
    /// PKCS#12 container (`.p12`, `.pfx`, modern `keytool` output)
    #[default]
    Pkcs12,
    /// Directory of `<alias>.pem` files
    Pem,
}

impl fmt::Display for KeyStoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pkcs12 => f.write_str("pkcs12"),
            Self::Pem => f.write_str("pem"),
        }
    }
}

/// A keystore credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Path to the keystore file or directory
    pub keystore: PathBuf,

    /// Keystore format
    #[serde(default)]
    pub format: KeyStoreFormat,

    /// Keystore password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the keystore password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Artifact archive configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory archived artifacts are copied into; relative paths resolve
    /// against the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl ArchiveConfig {
    /// Absolute archive directory for a workspace
    pub fn resolve(&self, workspace: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => workspace.join(dir),
            None => workspace.join(DEFAULT_ARCHIVE_DIR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_minimal_toml() {
        let request: SigningRequest =
            toml::from_str("key_store_id = \"release\"\napks_to_sign = \"**/*-unsigned.apk\"\n")
                .unwrap();
        assert_eq!(request, SigningRequest::new("release", "**/*-unsigned.apk"));
        assert!(request.archive_signed_apks);
        assert!(!request.archive_unsigned_apks);
        assert!(!request.skip_zipalign);
        assert_eq!(request.signed_apk_mapping, SignedApkMapping::UnsignedApkNameDir);
    }

    #[test]
    fn test_request_accepts_host_field_names() {
        let json = r#"{
            "keyStoreId": "release",
            "keyAlias": "upload",
            "apksToSign": "app/*.apk",
            "skipZipalign": true,
            "archiveSignedApks": false,
            "archiveUnsignedApks": true,
            "androidHome": "$SDK",
            "zipalignPath": "/opt/zipalign",
            "signedApkMapping": "unsignedApkSibling"
        }"#;
        let request: SigningRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.key_alias.as_deref(), Some("upload"));
        assert!(request.skip_zipalign);
        assert!(!request.archive_signed_apks);
        assert!(request.archive_unsigned_apks);
        assert_eq!(request.signed_apk_mapping, SignedApkMapping::UnsignedApkSibling);
    }

    #[test]
    fn test_request_round_trips_through_toml_and_yaml() {
        let request = SigningRequest::new("release", "a.apk, b/**/*.apk")
            .with_key_alias("upload")
            .with_skip_zipalign(true)
            .with_archive(false, true)
            .with_android_home("${HOME}/sdk")
            .with_zipalign_path("/opt/zipalign")
            .with_mapping(SignedApkMapping::UnsignedApkSibling);

        let toml_text = toml::to_string(&request).unwrap();
        let from_toml: SigningRequest = toml::from_str(&toml_text).unwrap();
        assert_eq!(from_toml, request);

        let yaml_text = serde_yaml::to_string(&request).unwrap();
        let from_yaml: SigningRequest = serde_yaml::from_str(&yaml_text).unwrap();
        assert_eq!(from_yaml, request);
    }

    #[test]
    fn test_working_key_uses_id_and_alias() {
        let request = SigningRequest::new("team/release key", "*.apk").with_key_alias("up:load");
        assert_eq!(request.working_key(), PathBuf::from("team%2Frelease%20key@up%3Aload"));

        let no_alias = SigningRequest::new("..", "*.apk").with_key_alias("  ");
        assert_eq!(no_alias.working_key(), PathBuf::from("%2E%2E"));
    }

    #[test]
    fn test_working_keys_are_distinct() {
        let keys = [
            SigningRequest::new("release", "*.apk"),
            SigningRequest::new("release", "*.apk").with_key_alias("upload"),
            SigningRequest::new("release@upload", "*.apk"),
            SigningRequest::new("release upload", "*.apk"),
            SigningRequest::new("release_upload", "*.apk"),
        ]
        .map(|r| r.working_key());
        for (i, a) in keys.iter().enumerate() {
            assert_eq!(a.components().count(), 1);
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_empty_overrides_are_absent() {
        let request = SigningRequest::new("k", "*.apk")
            .with_android_home("")
            .with_zipalign_path("  ");
        assert_eq!(request.android_home_override(), None);
        assert_eq!(request.zipalign_override(), None);
    }

    #[test]
    fn test_mapping_from_str() {
        assert_eq!(
            "sibling".parse::<SignedApkMapping>().unwrap(),
            SignedApkMapping::UnsignedApkSibling
        );
        assert_eq!(
            "unsigned_apk_name_dir".parse::<SignedApkMapping>().unwrap(),
            SignedApkMapping::UnsignedApkNameDir
        );
        assert!("elsewhere".parse::<SignedApkMapping>().is_err());
    }

    #[test]
    fn test_archive_dir_resolution() {
        let ws = Path::new("/ws");
        assert_eq!(ArchiveConfig::default().resolve(ws), ws.join(DEFAULT_ARCHIVE_DIR));
        let custom = ArchiveConfig {
            dir: Some(PathBuf::from("/srv/artifacts")),
        };
        assert_eq!(custom.resolve(ws), PathBuf::from("/srv/artifacts"));
    }
}
