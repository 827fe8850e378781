//! Legacy configuration migration
//!
//! Older configurations bundled several signing entries into one step. They
//! are converted into one single-entry step per entry when the configuration
//! is loaded; the pipeline itself only ever sees [`SigningRequest`]s.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::defaults::default_true;
use crate::config::{Config, SignedApkMapping, SigningRequest, StepConfig};

/// A legacy step holding several signing entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyStep {
    pub entries: Vec<LegacyEntry>,
}

/// One signing entry of a legacy step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntry {
    /// Credential id of the keystore
    #[serde(alias = "keyStore")]
    pub key_store: String,

    /// Key alias inside the keystore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Globs selecting the APKs to sign
    #[serde(default, alias = "apksToSign", skip_serializing_if = "Option::is_none")]
    pub apks_to_sign: Option<String>,

    /// Oldest name of `apks_to_sign`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,

    #[serde(default, alias = "archiveUnsignedApks")]
    pub archive_unsigned_apks: bool,

    #[serde(default = "default_true", alias = "archiveSignedApks")]
    pub archive_signed_apks: bool,
}

impl LegacyEntry {
    /// The entry's globs, preferring the current field name over `selection`
    pub fn globs(&self) -> &str {
        self.apks_to_sign
            .as_deref()
            .or(self.selection.as_deref())
            .unwrap_or_default()
    }

    /// Convert into the single-entry shape.
    ///
    /// Legacy entries always aligned and wrote the signed APK next to its
    /// input, so the converted request keeps doing both.
    pub fn to_request(&self) -> SigningRequest {
        let mut request = SigningRequest::new(self.key_store.clone(), self.globs())
            .with_skip_zipalign(false)
            .with_archive(self.archive_signed_apks, self.archive_unsigned_apks)
            .with_mapping(SignedApkMapping::UnsignedApkSibling);
        request.key_alias = self.alias.clone();
        request
    }
}

/// Flatten steps into single-entry requests, in order
pub fn migrate_steps(steps: &[StepConfig]) -> Vec<SigningRequest> {
    steps
        .iter()
        .flat_map(|step| match step {
            StepConfig::Single(request) => vec![request.clone()],
            StepConfig::Legacy(legacy) => {
                debug!(entries = legacy.entries.len(), "converting legacy step");
                legacy.entries.iter().map(LegacyEntry::to_request).collect()
            }
        })
        .collect()
}

/// True when no step uses the legacy shape
pub fn is_migrated(config: &Config) -> bool {
    config
        .steps
        .iter()
        .all(|step| matches!(step, StepConfig::Single(_)))
}

/// Rewrite every legacy step of `config` in place.
///
/// Returns the number of legacy entries converted. Running it on a migrated
/// configuration is a no-op returning zero.
pub fn migrate_config(config: &mut Config) -> usize {
    if is_migrated(config) {
        return 0;
    }

    let converted: usize = config
        .steps
        .iter()
        .map(|step| match step {
            StepConfig::Legacy(legacy) => legacy.entries.len(),
            StepConfig::Single(_) => 0,
        })
        .sum();

    config.steps = migrate_steps(&config.steps)
        .into_iter()
        .map(StepConfig::Single)
        .collect();
    info!(converted, steps = config.steps.len(), "migrated legacy signing steps");
    converted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_config() -> Config {
        let yaml = r#"
steps:
  - entries:
      - keyStore: release
        alias: upload
        apksToSign: "app/**/*-unsigned.apk"
        archiveUnsignedApks: true
        archiveSignedApks: false
      - key_store: debug
        selection: "*.apk"
  - key_store_id: other
    apks_to_sign: "b.apk"
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_legacy_step_is_recognised() {
        let config = legacy_config();
        assert!(matches!(config.steps[0], StepConfig::Legacy(_)));
        assert!(matches!(config.steps[1], StepConfig::Single(_)));
        assert!(!is_migrated(&config));
    }

    #[test]
    fn test_one_request_per_entry_with_flags_preserved() {
        let requests = legacy_config().requests();
        assert_eq!(requests.len(), 3);

        let first = &requests[0];
        assert_eq!(first.key_store_id, "release");
        assert_eq!(first.key_alias.as_deref(), Some("upload"));
        assert_eq!(first.apks_to_sign, "app/**/*-unsigned.apk");
        assert!(first.archive_unsigned_apks);
        assert!(!first.archive_signed_apks);
        assert!(!first.skip_zipalign);
        assert_eq!(first.signed_apk_mapping, SignedApkMapping::UnsignedApkSibling);

        let second = &requests[1];
        assert_eq!(second.apks_to_sign, "*.apk");
        assert!(second.archive_signed_apks);
        assert_eq!(second.key_alias, None);

        assert_eq!(requests[2].key_store_id, "other");
    }

    #[test]
    fn test_migrate_config_is_idempotent() {
        let mut config = legacy_config();
        let expected = config.requests();

        assert_eq!(migrate_config(&mut config), 2);
        assert!(is_migrated(&config));
        assert_eq!(config.requests(), expected);

        let snapshot = config.clone();
        assert_eq!(migrate_config(&mut config), 0);
        assert_eq!(config, snapshot);
    }

    #[test]
    fn test_migrated_config_round_trips() {
        let mut config = legacy_config();
        migrate_config(&mut config);

        let text = toml::to_string_pretty(&config).unwrap();
        let reloaded: Config = toml::from_str(&text).unwrap();
        assert_eq!(reloaded, config);
    }
}
