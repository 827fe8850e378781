//! Keystores holding signing keys

pub mod pem_dir;
pub mod pkcs12;
mod resolver;

use apksmith_core::KeyStoreError;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

pub use resolver::KeyMaterialResolver;

/// What a keystore entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A private key with its certificate chain
    PrivateKey,
    /// A certificate without a key
    TrustedCertificate,
}

/// One aliased entry of a keystore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreEntry {
    pub alias: String,
    pub kind: EntryKind,
}

/// A private key and its certificate chain, leaf first
pub struct PrivateKeyEntry {
    pub key: PKey<Private>,
    pub chain: Vec<X509>,
}

/// An opened keystore
pub trait KeyStore: Send {
    /// Every entry, in a stable order
    fn entries(&self) -> Vec<KeyStoreEntry>;

    /// The private key entry under `alias`, or `None` if there is no such
    /// key entry
    fn private_key_entry(&self, alias: &str) -> Result<Option<PrivateKeyEntry>, KeyStoreError>;

    /// Aliases of the private key entries
    fn key_aliases(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == EntryKind::PrivateKey)
            .map(|e| e.alias)
            .collect()
    }
}
