//! apksmith signing - key material and the APK signing engine
//!
//! Keystore credentials are resolved into [`KeySigningMaterial`] once per
//! signing request. The engine in [`apk`] re-signs an APK exclusively with
//! that key, producing both the JAR (v1) and APK Signature Scheme v2
//! signatures.

pub mod apk;
pub mod credentials;
pub mod error;
pub mod keystore;
pub mod material;

#[cfg(test)]
pub(crate) mod test_support;

pub use apk::{sign_apk, verify_apk, ApkSigner, SchemeReport, VerifyReport};
pub use credentials::{CredentialStore, FileCredentialStore, StoredCredential};
pub use error::{Result, SigningError};
pub use keystore::{EntryKind, KeyMaterialResolver, KeyStore, KeyStoreEntry, PrivateKeyEntry};
pub use material::KeySigningMaterial;
