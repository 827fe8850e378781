//! PKCS#12 keystores
//!
//! The container's key bag is its single private key entry, aliased by the
//! bag's friendly name. Extra CA certificates are trusted certificate
//! entries.

use std::path::Path;

use apksmith_core::KeyStoreError;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::debug;

use super::{EntryKind, KeyStore, KeyStoreEntry, PrivateKeyEntry};

/// A parsed PKCS#12 keystore
pub struct Pkcs12KeyStore {
    key: Option<(String, PKey<Private>, Vec<X509>)>,
    trusted: Vec<String>,
}

impl Pkcs12KeyStore {
    /// Read and decrypt a PKCS#12 file.
    ///
    /// Without a password only an unprotected container can be opened; a
    /// protected one fails with [`KeyStoreError::NullPassword`].
    pub fn load(
        credential_id: &str,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Self, KeyStoreError> {
        let der = std::fs::read(path).map_err(|e| KeyStoreError::Load {
            credential_id: credential_id.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_der(credential_id, &der, password)
    }

    pub fn from_der(
        credential_id: &str,
        der: &[u8],
        password: Option<&str>,
    ) -> Result<Self, KeyStoreError> {
        let pkcs12 = Pkcs12::from_der(der).map_err(|e| KeyStoreError::Load {
            credential_id: credential_id.to_string(),
            reason: format!("not a PKCS#12 keystore: {e}"),
        })?;

        let parsed = pkcs12
            .parse2(password.unwrap_or_default())
            .map_err(|_| match password {
                None => KeyStoreError::NullPassword {
                    credential_id: credential_id.to_string(),
                },
                Some(_) => KeyStoreError::IncorrectPassword {
                    credential_id: credential_id.to_string(),
                },
            })?;

        let ca: Vec<X509> = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();

        let key = match (parsed.pkey, parsed.cert) {
            (Some(pkey), Some(cert)) => {
                let alias = friendly_name(&cert).unwrap_or_else(|| credential_id.to_string());
                let mut chain = vec![cert];
                chain.extend(ca.iter().cloned());
                Some((alias, pkey, chain))
            }
            _ => None,
        };

        let trusted = ca
            .iter()
            .enumerate()
            .map(|(i, cert)| friendly_name(cert).unwrap_or_else(|| format!("ca{}", i + 1)))
            .collect();

        debug!(credential = %credential_id, has_key = key.is_some(), "parsed PKCS#12 keystore");
        Ok(Self { key, trusted })
    }
}

fn friendly_name(cert: &X509) -> Option<String> {
    cert.alias()
        .map(|alias| String::from_utf8_lossy(alias).into_owned())
        .filter(|alias| !alias.is_empty())
}

impl KeyStore for Pkcs12KeyStore {
    fn entries(&self) -> Vec<KeyStoreEntry> {
        let key = self.key.iter().map(|(alias, _, _)| KeyStoreEntry {
            alias: alias.clone(),
            kind: EntryKind::PrivateKey,
        });
        let trusted = self.trusted.iter().map(|alias| KeyStoreEntry {
            alias: alias.clone(),
            kind: EntryKind::TrustedCertificate,
        });
        key.chain(trusted).collect()
    }

    fn private_key_entry(&self, alias: &str) -> Result<Option<PrivateKeyEntry>, KeyStoreError> {
        Ok(self
            .key
            .as_ref()
            .filter(|(name, _, _)| name.eq_ignore_ascii_case(alias))
            .map(|(_, key, chain)| PrivateKeyEntry {
                key: key.clone(),
                chain: chain.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pkcs12_der, TestKey};

    #[test]
    fn test_key_entry_uses_friendly_name() {
        let key = TestKey::rsa("Upload Key");
        let der = pkcs12_der(&key, "upload", "secret", &[]);

        let store = Pkcs12KeyStore::from_der("release", &der, Some("secret")).unwrap();
        assert_eq!(store.key_aliases(), vec!["upload"]);
        let entry = store.private_key_entry("UPLOAD").unwrap().unwrap();
        assert_eq!(entry.chain.len(), 1);
        assert!(store.private_key_entry("other").unwrap().is_none());
    }

    #[test]
    fn test_ca_certificates_are_trusted_entries() {
        let key = TestKey::rsa("Leaf");
        let ca = TestKey::rsa("Root CA");
        let der = pkcs12_der(&key, "upload", "secret", &[ca.cert.clone()]);

        let store = Pkcs12KeyStore::from_der("release", &der, Some("secret")).unwrap();
        let kinds: Vec<_> = store.entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::PrivateKey, EntryKind::TrustedCertificate]);
        let entry = store.private_key_entry("upload").unwrap().unwrap();
        assert_eq!(entry.chain.len(), 2);
    }

    #[test]
    fn test_missing_password_is_null_password() {
        let key = TestKey::rsa("Upload");
        let der = pkcs12_der(&key, "upload", "secret", &[]);

        let err = Pkcs12KeyStore::from_der("release", &der, None).err().unwrap();
        assert!(matches!(err, KeyStoreError::NullPassword { .. }));
    }

    #[test]
    fn test_wrong_password_is_incorrect_password() {
        let key = TestKey::rsa("Upload");
        let der = pkcs12_der(&key, "upload", "secret", &[]);

        let err = Pkcs12KeyStore::from_der("release", &der, Some("nope")).err().unwrap();
        assert!(matches!(err, KeyStoreError::IncorrectPassword { .. }));
    }

    #[test]
    fn test_garbage_is_load_error() {
        let err = Pkcs12KeyStore::from_der("release", b"not der", Some("x")).err().unwrap();
        assert!(matches!(err, KeyStoreError::Load { .. }));
    }
}
