//! Directory-of-PEM keystores
//!
//! Each `<alias>.pem` file in the directory is one entry. A file holding a
//! private key and certificates is a private key entry, certificates alone
//! make a trusted certificate entry. Encrypted PKCS#8 keys are decrypted with
//! the keystore password.

use std::collections::BTreeMap;
use std::path::Path;

use apksmith_core::KeyStoreError;
use openssl::ec::EcKey;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use tracing::{debug, warn};

use super::{EntryKind, KeyStore, KeyStoreEntry, PrivateKeyEntry};

const PEM_EXTENSION: &str = "pem";

/// Raw PEM blocks of one file, decoded on use
struct PemFile {
    key: Option<pem::Pem>,
    certificates: Vec<Vec<u8>>,
}

/// A keystore read from a directory of PEM files
pub struct PemDirKeyStore {
    credential_id: String,
    password: Option<String>,
    files: BTreeMap<String, PemFile>,
}

impl PemDirKeyStore {
    /// Read every `.pem` file of `dir`
    pub fn load(
        credential_id: &str,
        dir: &Path,
        password: Option<&str>,
    ) -> Result<Self, KeyStoreError> {
        let load_error = |reason: String| KeyStoreError::Load {
            credential_id: credential_id.to_string(),
            reason,
        };

        let entries = std::fs::read_dir(dir)
            .map_err(|e| load_error(format!("{}: {e}", dir.display())))?;

        let mut files = BTreeMap::new();
        for entry in entries {
            let path = entry
                .map_err(|e| load_error(format!("{}: {e}", dir.display())))?
                .path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != PEM_EXTENSION) {
                continue;
            }
            let Some(alias) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let content = std::fs::read(&path)
                .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
            let blocks = pem::parse_many(&content)
                .map_err(|e| load_error(format!("{}: {e}", path.display())))?;

            let mut file = PemFile {
                key: None,
                certificates: Vec::new(),
            };
            for block in blocks {
                match block.tag() {
                    "CERTIFICATE" => file.certificates.push(block.into_contents()),
                    "PRIVATE KEY" | "ENCRYPTED PRIVATE KEY" | "RSA PRIVATE KEY"
                    | "EC PRIVATE KEY" => {
                        if file.key.is_some() {
                            return Err(load_error(format!(
                                "{} holds more than one private key",
                                path.display()
                            )));
                        }
                        file.key = Some(block);
                    }
                    other => {
                        warn!(path = %path.display(), tag = other, "ignoring PEM block");
                    }
                }
            }

            if file.key.is_none() && file.certificates.is_empty() {
                warn!(path = %path.display(), "PEM file holds no key or certificate");
                continue;
            }
            files.insert(alias, file);
        }

        debug!(credential = %credential_id, entries = files.len(), "read PEM keystore");
        Ok(Self {
            credential_id: credential_id.to_string(),
            password: password.map(str::to_string),
            files,
        })
    }

    fn decode_key(&self, block: &pem::Pem) -> Result<PKey<Private>, KeyStoreError> {
        let der = block.contents();
        let decoded = match block.tag() {
            "ENCRYPTED PRIVATE KEY" => {
                let Some(password) = self.password.as_deref() else {
                    return Err(KeyStoreError::NullPassword {
                        credential_id: self.credential_id.clone(),
                    });
                };
                return PKey::private_key_from_pkcs8_passphrase(der, password.as_bytes())
                    .map_err(|_| KeyStoreError::IncorrectPassword {
                        credential_id: self.credential_id.clone(),
                    });
            }
            "RSA PRIVATE KEY" => Rsa::private_key_from_der(der).and_then(PKey::from_rsa),
            "EC PRIVATE KEY" => EcKey::private_key_from_der(der).and_then(PKey::from_ec_key),
            _ => PKey::private_key_from_der(der),
        };
        decoded.map_err(|e| KeyStoreError::Load {
            credential_id: self.credential_id.clone(),
            reason: format!("invalid private key: {e}"),
        })
    }
}

impl KeyStore for PemDirKeyStore {
    fn entries(&self) -> Vec<KeyStoreEntry> {
        self.files
            .iter()
            .map(|(alias, file)| KeyStoreEntry {
                alias: alias.clone(),
                kind: if file.key.is_some() && !file.certificates.is_empty() {
                    EntryKind::PrivateKey
                } else {
                    EntryKind::TrustedCertificate
                },
            })
            .collect()
    }

    fn private_key_entry(&self, alias: &str) -> Result<Option<PrivateKeyEntry>, KeyStoreError> {
        let Some(file) = self.files.get(alias) else {
            return Ok(None);
        };
        let Some(block) = &file.key else {
            return Ok(None);
        };
        if file.certificates.is_empty() {
            return Ok(None);
        }

        let key = self.decode_key(block)?;
        let chain = file
            .certificates
            .iter()
            .map(|der| X509::from_der(der))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| KeyStoreError::Load {
                credential_id: self.credential_id.clone(),
                reason: format!("invalid certificate in {alias}.pem: {e}"),
            })?;

        Ok(Some(PrivateKeyEntry { key, chain }))
    }
}
