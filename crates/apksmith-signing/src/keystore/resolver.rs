//! Resolution of a credential and alias into signing material

use apksmith_core::KeyStoreError;
use tracing::{debug, info};

use crate::credentials::CredentialStore;
use crate::material::KeySigningMaterial;

/// Resolves key material through a credential store
pub struct KeyMaterialResolver<'a> {
    store: &'a dyn CredentialStore,
}

impl<'a> KeyMaterialResolver<'a> {
    pub fn new(store: &'a dyn CredentialStore) -> Self {
        Self { store }
    }

    /// Resolve the key under `alias` in the keystore of `credential_id`.
    ///
    /// Without an alias the keystore must hold exactly one private key entry;
    /// zero or several fail instead of guessing.
    pub fn resolve(
        &self,
        credential_id: &str,
        alias: Option<&str>,
    ) -> Result<KeySigningMaterial, KeyStoreError> {
        let credential = self.store.credential(credential_id)?;
        let keystore = credential.open()?;

        let alias = match alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => alias.to_string(),
            None => {
                let mut aliases = keystore.key_aliases();
                debug!(credential = %credential_id, keys = aliases.len(), "no alias given, scanning key entries");
                match aliases.len() {
                    0 => {
                        return Err(KeyStoreError::NoKeyEntries {
                            credential_id: credential_id.to_string(),
                        })
                    }
                    1 => aliases.remove(0),
                    _ => {
                        return Err(KeyStoreError::AmbiguousKey {
                            credential_id: credential_id.to_string(),
                            aliases,
                        })
                    }
                }
            }
        };

        let entry = keystore
            .private_key_entry(&alias)?
            .ok_or_else(|| KeyStoreError::AliasNotFound {
                credential_id: credential_id.to_string(),
                alias: alias.clone(),
            })?;

        let material = KeySigningMaterial::new(&entry.key, &entry.chain, &alias).map_err(|e| {
            KeyStoreError::Load {
                credential_id: credential_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        info!(credential = %credential_id, alias = %alias, "resolved signing key");
        Ok(material)
    }
}
