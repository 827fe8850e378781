//! Key material resolved for one signing request

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SigningError};

/// A private key, its certificate chain (leaf first) and the name used for
/// the v1 signature files.
///
/// Held as DER so it can be shipped to a remote workspace host; keys and
/// certificates are decoded again where signing happens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySigningMaterial {
    #[serde(with = "base64_bytes")]
    private_key: Vec<u8>,
    #[serde(with = "base64_list")]
    certificate_chain: Vec<Vec<u8>>,
    v1_signer_name: String,
}

impl KeySigningMaterial {
    /// Build from a decoded key and a non-empty chain
    pub fn new(key: &PKey<Private>, chain: &[X509], v1_signer_name: &str) -> Result<Self> {
        if chain.is_empty() {
            return Err(SigningError::InvalidKey(
                "certificate chain is empty".to_string(),
            ));
        }
        let certificate_chain = chain
            .iter()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            private_key: key.private_key_to_pkcs8()?,
            certificate_chain,
            v1_signer_name: v1_signer_name.to_string(),
        })
    }

    /// Decode the private key
    pub fn private_key(&self) -> Result<PKey<Private>> {
        PKey::private_key_from_pkcs8(&self.private_key)
            .map_err(|e| SigningError::InvalidKey(format!("private key: {e}")))
    }

    /// Decode the certificate chain, leaf first
    pub fn certificates(&self) -> Result<Vec<X509>> {
        self.certificate_chain
            .iter()
            .map(|der| {
                X509::from_der(der).map_err(|e| SigningError::InvalidKey(format!("certificate: {e}")))
            })
            .collect()
    }

    /// DER of every certificate, leaf first
    pub fn certificate_chain_der(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    /// Name of the v1 signature, e.g. the key alias
    pub fn v1_signer_name(&self) -> &str {
        &self.v1_signer_name
    }
}

impl fmt::Debug for KeySigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySigningMaterial")
            .field("private_key", &"<redacted>")
            .field("certificates", &self.certificate_chain.len())
            .field("v1_signer_name", &self.v1_signer_name)
            .finish()
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_list {
    use super::*;

    pub fn serialize<S: Serializer>(
        items: &[Vec<u8>],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let encoded: Vec<String> = items.iter().map(|item| STANDARD.encode(item)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        let decoded = encoded
            .iter()
            .map(|item| STANDARD.decode(item))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(serde::de::Error::custom)?;
        if decoded.is_empty() {
            return Err(serde::de::Error::custom("certificate chain is empty"));
        }
        Ok(decoded)
    }
}
