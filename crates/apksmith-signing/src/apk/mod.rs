//! APK signing engine
//!
//! Re-signs an APK exclusively with one key: existing v1 signature files and
//! any APK Signing Block are dropped, the entries are copied with stored
//! data re-aligned, then the JAR (v1) signature is added and the v2
//! signing block is inserted in front of the central directory.

mod archive;
mod v1;
mod v2;
mod verify;

use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, SigningError};
use crate::material::KeySigningMaterial;

pub use verify::{verify_apk, verify_bytes, SchemeReport, VerifyReport};

use self::archive::{ZipBuilder, ZipLayout};

/// Signer configuration built from one request's key material
pub struct ApkSigner<'a> {
    material: &'a KeySigningMaterial,
    v1_enabled: bool,
    v2_enabled: bool,
}

impl<'a> ApkSigner<'a> {
    /// Both schemes enabled
    pub fn new(material: &'a KeySigningMaterial) -> Self {
        Self {
            material,
            v1_enabled: true,
            v2_enabled: true,
        }
    }

    pub fn with_v1(mut self, enabled: bool) -> Self {
        self.v1_enabled = enabled;
        self
    }

    pub fn with_v2(mut self, enabled: bool) -> Self {
        self.v2_enabled = enabled;
        self
    }

    /// Sign an APK held in memory
    pub fn sign_bytes(&self, apk: &[u8]) -> Result<Vec<u8>> {
        if !self.v1_enabled && !self.v2_enabled {
            return Err(SigningError::InvalidKey(
                "no signature scheme enabled".to_string(),
            ));
        }

        let key = self.material.private_key()?;
        let chain = self.material.certificates()?;
        let layout = ZipLayout::parse(apk)?;
        if layout.signing_block.is_some() {
            debug!("dropping existing APK Signing Block");
        }

        let mut builder = ZipBuilder::default();
        let mut v1_entries = Vec::new();
        for entry in &layout.entries {
            let name = entry.name_lossy();
            if v1::is_signature_file(&name) {
                debug!(entry = %name, "dropping existing v1 signature file");
                continue;
            }
            builder.copy_entry(apk, entry)?;
            if self.v1_enabled && !entry.is_directory() {
                v1_entries.push((name, entry.content(apk)?));
            }
        }

        if self.v1_enabled {
            let stem = v1::signer_file_stem(self.material.v1_signer_name());
            let extension = v1::block_extension(&key)?;
            let signature = v1::V1Signature::sign(&v1_entries, &key, &chain)?;
            builder.add_deflated(v1::MANIFEST_NAME, &signature.manifest)?;
            builder.add_deflated(&format!("META-INF/{stem}.SF"), &signature.signature_file)?;
            builder.add_deflated(
                &format!("META-INF/{stem}.{extension}"),
                &signature.signature_block,
            )?;
        }

        let sections = builder.finish(&layout.comment)?;
        if self.v2_enabled {
            let public_key = chain[0].public_key()?.public_key_to_der()?;
            let block = v2::signing_block(
                &sections,
                &key,
                self.material.certificate_chain_der(),
                &public_key,
            )?;
            sections.assemble(Some(&block))
        } else {
            sections.assemble(None)
        }
    }

    /// Sign `input` and write the result to `output`
    pub fn sign(&self, input: &Path, output: &Path) -> Result<()> {
        let apk = std::fs::read(input)?;
        let signed = self.sign_bytes(&apk)?;
        std::fs::write(output, &signed)?;
        info!(
            input = %input.display(),
            output = %output.display(),
            signer = %self.material.v1_signer_name(),
            "signed APK"
        );
        Ok(())
    }
}

/// Sign `input` into `output` with v1 and v2 enabled
pub fn sign_apk(input: &Path, output: &Path, material: &KeySigningMaterial) -> Result<()> {
    ApkSigner::new(material).sign(input, output)
}
