//! Signature verification

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::archive::ZipLayout;
use super::v1::{self, Section};
use super::v2;
use crate::error::{Result, SigningError};

/// Signer of one signature scheme
#[derive(Debug, Clone, Serialize)]
pub struct SchemeReport {
    /// Subject of the signing certificate, e.g. `CN=Upload, O=Example`
    pub subject: String,

    /// SHA-256 fingerprint of the certificate, colon separated
    pub fingerprint: String,

    /// Certificate serial number in hex
    pub serial_number: String,

    /// DER of the signing certificate
    #[serde(skip)]
    pub certificate_der: Vec<u8>,
}

impl SchemeReport {
    fn from_der(der: &[u8]) -> Result<Self> {
        let cert = X509::from_der(der)?;
        let subject = cert
            .subject_name()
            .entries()
            .map(|entry| {
                let key = entry.object().nid().short_name().unwrap_or("?");
                let value = entry
                    .data()
                    .as_utf8()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                format!("{key}={value}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let fingerprint = Sha256::digest(der)
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        let serial_number = cert.serial_number().to_bn()?.to_hex_str()?.to_string();

        Ok(Self {
            subject,
            fingerprint,
            serial_number,
            certificate_der: der.to_vec(),
        })
    }
}

/// Which schemes an APK is signed with, and by whom
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub v1: Option<SchemeReport>,
    pub v2: Option<SchemeReport>,
}

/// Verify the APK at `path`
pub fn verify_apk(path: &Path) -> Result<VerifyReport> {
    let apk = std::fs::read(path)?;
    verify_bytes(&apk).map_err(|e| match e {
        SigningError::InvalidApk(reason) => SigningError::VerificationFailed {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })
}

/// Verify an APK held in memory.
///
/// Fails if no signature is present, or if any present signature does not
/// match the content.
pub fn verify_bytes(apk: &[u8]) -> Result<VerifyReport> {
    let layout = ZipLayout::parse(apk)?;
    let v2 = verify_v2(apk, &layout)?;
    let v1 = verify_v1(apk, v2.is_some())?;
    if v1.is_none() && v2.is_none() {
        return Err(SigningError::InvalidApk("APK is not signed".to_string()));
    }
    Ok(VerifyReport { v1, v2 })
}

fn verify_v2(apk: &[u8], layout: &ZipLayout) -> Result<Option<SchemeReport>> {
    let Some(block) = layout.signing_block.clone() else {
        return Ok(None);
    };
    let Some(value) = v2::find_pair(&apk[block], v2::V2_BLOCK_ID)? else {
        return Ok(None);
    };

    let mut eocd = apk[layout.eocd_offset..].to_vec();
    let entries_end = u32::try_from(layout.entries_end)
        .map_err(|_| SigningError::InvalidApk("archive too large".to_string()))?;
    eocd[16..20].copy_from_slice(&entries_end.to_le_bytes());

    let signers = v2::verify(
        value,
        &[
            &apk[..layout.entries_end],
            &apk[layout.central_directory.clone()],
            &eocd[..],
        ],
    )?;
    debug!(signers = signers.len(), "v2 signature verified");
    let leaf = signers
        .first()
        .and_then(|signer| signer.certificates.first())
        .ok_or_else(|| SigningError::InvalidApk("v2 signer has no certificate".to_string()))?;
    SchemeReport::from_der(leaf).map(Some)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut file = archive.by_name(name)?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(content)
}

fn invalid(message: impl Into<String>) -> SigningError {
    SigningError::InvalidApk(message.into())
}

fn verify_v1(apk: &[u8], has_v2: bool) -> Result<Option<SchemeReport>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(apk))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let signature_files: Vec<&String> = names
        .iter()
        .filter(|name| {
            name.strip_prefix("META-INF/")
                .is_some_and(|file| !file.contains('/') && file.to_ascii_uppercase().ends_with(".SF"))
        })
        .collect();
    if signature_files.is_empty() {
        return Ok(None);
    }

    let manifest = read_entry(&mut archive, v1::MANIFEST_NAME)
        .map_err(|_| invalid("v1 signature without META-INF/MANIFEST.MF"))?;
    let sections = v1::parse_sections(&manifest)?;
    let by_name: BTreeMap<&str, &Section> = sections
        .iter()
        .skip(1)
        .filter_map(|section| section.get("Name").map(|name| (name, section)))
        .collect();

    let mut report = None;
    for sf_name in signature_files {
        let stem = &sf_name[..sf_name.len() - 3];
        let block_name = ["RSA", "EC", "DSA"]
            .iter()
            .map(|ext| format!("{stem}.{ext}"))
            .find(|candidate| names.contains(candidate))
            .ok_or_else(|| invalid(format!("{sf_name} has no signature block")))?;

        let signature_file = read_entry(&mut archive, sf_name)?;
        let block = read_entry(&mut archive, &block_name)?;
        let certificate = verify_signature_block(&signature_file, &block)
            .map_err(|e| invalid(format!("{block_name}: {e}")))?;

        let sf_sections = v1::parse_sections(&signature_file)?;
        let main = sf_sections
            .first()
            .ok_or_else(|| invalid(format!("{sf_name} is empty")))?;
        let manifest_digest = main
            .get("SHA-256-Digest-Manifest")
            .ok_or_else(|| invalid(format!("{sf_name} has no SHA-256 manifest digest")))?;
        if !v1::digest_matches(manifest_digest, &manifest) {
            return Err(invalid(format!("{sf_name} does not match the manifest")));
        }
        let stripping_protected = main
            .get("X-Android-APK-Signed")
            .is_some_and(|value| value.split(',').any(|id| id.trim() == v1::ANDROID_APK_SIGNED));
        if stripping_protected && !has_v2 {
            return Err(invalid(format!(
                "{sf_name} requires a v2 signature but none is present"
            )));
        }

        if report.is_none() {
            report = Some(SchemeReport::from_der(&certificate)?);
        }
    }

    for name in &names {
        if name.ends_with('/') || v1::is_signature_file(name) {
            continue;
        }
        let section = by_name
            .get(name.as_str())
            .ok_or_else(|| invalid(format!("{name} is not covered by the manifest")))?;
        let digest = section
            .get("SHA-256-Digest")
            .ok_or_else(|| invalid(format!("{name} has no SHA-256 digest")))?;
        let content = read_entry(&mut archive, name)?;
        if !v1::digest_matches(digest, &content) {
            return Err(invalid(format!("{name} does not match its manifest digest")));
        }
    }
    debug!(entries = by_name.len(), "v1 signature verified");
    Ok(report)
}

/// Check the detached PKCS#7 signature and return the signer certificate
fn verify_signature_block(signature_file: &[u8], block: &[u8]) -> Result<Vec<u8>> {
    let pkcs7 = Pkcs7::from_der(block)?;
    let certs: Stack<X509> = Stack::new()?;
    let store = X509StoreBuilder::new()?.build();
    pkcs7.verify(
        &certs,
        &store,
        Some(signature_file),
        None,
        Pkcs7Flags::NOVERIFY | Pkcs7Flags::BINARY,
    )?;
    let signers = pkcs7.signers(&certs, Pkcs7Flags::empty())?;
    let signer = signers
        .iter()
        .next()
        .ok_or_else(|| invalid("signature block has no signer"))?;
    Ok(signer.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::ApkSigner;
    use crate::test_support::{unsigned_apk, TestKey};
    use std::io::Write;

    #[test]
    fn test_unsigned_apk_is_rejected() {
        let err = verify_bytes(&unsigned_apk()).unwrap_err();
        assert!(err.to_string().contains("not signed"));
    }

    #[test]
    fn test_report_describes_certificate() {
        let key = TestKey::rsa("Upload");
        let signed = ApkSigner::new(&key.material("upload"))
            .sign_bytes(&unsigned_apk())
            .unwrap();
        let report = verify_bytes(&signed).unwrap();
        let v2 = report.v2.unwrap();
        assert_eq!(v2.subject, "CN=Upload");
        assert_eq!(v2.fingerprint.split(':').count(), 32);
        assert_eq!(v2.serial_number, "01");

        let json = serde_json::to_value(report.v1.as_ref().unwrap()).unwrap();
        assert!(json.get("certificate_der").is_none());
        assert_eq!(json["subject"], "CN=Upload");
    }

    #[test]
    fn test_tampered_entry_fails_v2() {
        let signed = ApkSigner::new(&TestKey::ec("Upload").material("upload"))
            .sign_bytes(&unsigned_apk())
            .unwrap();
        let mut tampered = signed.clone();
        let needle = b"resource table";
        let pos = tampered
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        tampered[pos] = b'R';

        let err = verify_bytes(&tampered).unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn test_stripped_v2_is_detected() {
        let signed = ApkSigner::new(&TestKey::rsa("Upload").material("upload"))
            .sign_bytes(&unsigned_apk())
            .unwrap();

        // Rebuild the archive through the zip crate, which drops the signing block
        let mut source = zip::ZipArchive::new(Cursor::new(&signed)).unwrap();
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut out);
            for i in 0..source.len() {
                let mut file = source.by_index(i).unwrap();
                let name = file.name().to_string();
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                writer
                    .start_file(name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(&content).unwrap();
            }
            writer.finish().unwrap();
        }

        let err = verify_bytes(&out.into_inner()).unwrap_err();
        assert!(err.to_string().contains("requires a v2 signature"));
    }

    #[test]
    fn test_verify_apk_names_the_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("app.apk");
        std::fs::write(&path, unsigned_apk()).unwrap();
        let err = verify_apk(&path).unwrap_err();
        assert!(matches!(err, SigningError::VerificationFailed { .. }));
        assert!(err.to_string().contains("app.apk"));
    }
}
