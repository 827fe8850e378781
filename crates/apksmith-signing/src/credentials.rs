//! Keystore credentials
//!
//! A credential names a keystore and the password that opens it. Credentials
//! are looked up by id; the store itself is an external concern, and the
//! file-backed store here reads them from the project configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use apksmith_core::{CredentialConfig, KeyStoreError, KeyStoreFormat};
use tracing::debug;

use crate::keystore::{pem_dir::PemDirKeyStore, pkcs12::Pkcs12KeyStore, KeyStore};

/// Source of keystore credentials
pub trait CredentialStore: Send + Sync {
    /// Look up a credential by id
    fn credential(&self, id: &str) -> Result<StoredCredential, KeyStoreError>;
}

/// A keystore together with the password that opens it
#[derive(Clone)]
pub struct StoredCredential {
    pub id: String,
    pub keystore: PathBuf,
    pub format: KeyStoreFormat,
    /// `None` when the credential has no password. Empty passwords are
    /// normalised to `None` by the store.
    pub password: Option<String>,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("id", &self.id)
            .field("keystore", &self.keystore)
            .field("format", &self.format)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StoredCredential {
    /// Open the keystore
    pub fn open(&self) -> Result<Box<dyn KeyStore>, KeyStoreError> {
        debug!(credential = %self.id, keystore = %self.keystore.display(), format = %self.format, "opening keystore");
        let password = self.password.as_deref();
        match self.format {
            KeyStoreFormat::Pkcs12 => Ok(Box::new(Pkcs12KeyStore::load(
                &self.id,
                &self.keystore,
                password,
            )?)),
            KeyStoreFormat::Pem => Ok(Box::new(PemDirKeyStore::load(
                &self.id,
                &self.keystore,
                password,
            )?)),
        }
    }
}

/// Credential store backed by the `[credentials]` configuration section.
///
/// Relative keystore paths resolve against `base_dir`, normally the
/// directory holding the configuration file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
    credentials: BTreeMap<String, CredentialConfig>,
}

impl FileCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>, credentials: BTreeMap<String, CredentialConfig>) -> Self {
        Self {
            base_dir: base_dir.into(),
            credentials,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn password_for(&self, config: &CredentialConfig) -> Option<String> {
        let password = match (&config.password, &config.password_env) {
            (Some(password), _) => Some(password.clone()),
            (None, Some(var)) => std::env::var(var).ok(),
            (None, None) => None,
        };
        // The store cannot represent an empty password; it becomes no password.
        password.filter(|p| !p.is_empty())
    }
}

impl CredentialStore for FileCredentialStore {
    fn credential(&self, id: &str) -> Result<StoredCredential, KeyStoreError> {
        let config = self
            .credentials
            .get(id)
            .ok_or_else(|| KeyStoreError::CredentialNotFound {
                credential_id: id.to_string(),
            })?;

        Ok(StoredCredential {
            id: id.to_string(),
            keystore: self.base_dir.join(&config.keystore),
            format: config.format,
            password: self.password_for(config),
        })
    }
}
