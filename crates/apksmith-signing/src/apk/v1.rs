//! JAR signing (APK signature scheme v1)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{Id, PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use sha2::{Digest, Sha256};

use crate::error::{Result, SigningError};

pub(crate) const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
const CREATED_BY: &str = "apksmith";
const MAX_LINE: usize = 72;
/// Value of `X-Android-APK-Signed` telling verifiers a v2 signature must be present
pub(crate) const ANDROID_APK_SIGNED: &str = "2";

/// Whether `name` is part of a v1 signature and must be dropped on re-signing
pub(crate) fn is_signature_file(name: &str) -> bool {
    if name.eq_ignore_ascii_case(MANIFEST_NAME) {
        return true;
    }
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    upper.starts_with("SIG-")
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

/// File name stem for the `.SF` and signature block files
pub(crate) fn signer_file_stem(v1_signer_name: &str) -> String {
    let stem: String = v1_signer_name
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(8)
        .collect();
    if stem.is_empty() {
        "CERT".to_string()
    } else {
        stem
    }
}

/// Extension of the signature block file for a key type
pub(crate) fn block_extension(key: &PKeyRef<Private>) -> Result<&'static str> {
    match key.id() {
        Id::RSA => Ok("RSA"),
        Id::EC => Ok("EC"),
        Id::DSA => Ok("DSA"),
        other => Err(SigningError::UnsupportedKey(format!("{other:?}"))),
    }
}

fn sha256_b64(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Append `name: value`, wrapped at 72 bytes per line
fn write_attribute(out: &mut Vec<u8>, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    let bytes = line.as_bytes();
    let mut pos = 0;
    let mut first = true;
    while pos < bytes.len() {
        let room = if first { MAX_LINE } else { MAX_LINE - 1 };
        let end = (pos + room).min(bytes.len());
        if !first {
            out.push(b' ');
        }
        out.extend_from_slice(&bytes[pos..end]);
        out.extend_from_slice(b"\r\n");
        pos = end;
        first = false;
    }
}

/// The v1 signature files for a set of entries
pub(crate) struct V1Signature {
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>,
    pub signature_block: Vec<u8>,
}

impl V1Signature {
    /// Sign `(name, content)` pairs, which must exclude directories and
    /// existing signature files
    pub fn sign(
        entries: &[(String, Vec<u8>)],
        key: &PKeyRef<Private>,
        chain: &[X509],
    ) -> Result<Self> {
        let (signer, extra) = chain
            .split_first()
            .ok_or_else(|| SigningError::InvalidKey("certificate chain is empty".to_string()))?;

        let mut sorted: Vec<&(String, Vec<u8>)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut main = Vec::new();
        write_attribute(&mut main, "Manifest-Version", "1.0");
        write_attribute(&mut main, "Created-By", CREATED_BY);
        main.extend_from_slice(b"\r\n");

        let mut manifest = main.clone();
        let mut sections = Vec::with_capacity(sorted.len());
        for (name, content) in sorted {
            let mut section = Vec::new();
            write_attribute(&mut section, "Name", name);
            write_attribute(&mut section, "SHA-256-Digest", &sha256_b64(content));
            section.extend_from_slice(b"\r\n");
            manifest.extend_from_slice(&section);
            sections.push((name, section));
        }

        let mut signature_file = Vec::new();
        write_attribute(&mut signature_file, "Signature-Version", "1.0");
        write_attribute(&mut signature_file, "Created-By", CREATED_BY);
        write_attribute(&mut signature_file, "SHA-256-Digest-Manifest", &sha256_b64(&manifest));
        write_attribute(
            &mut signature_file,
            "SHA-256-Digest-Manifest-Main-Attributes",
            &sha256_b64(&main),
        );
        write_attribute(&mut signature_file, "X-Android-APK-Signed", ANDROID_APK_SIGNED);
        signature_file.extend_from_slice(b"\r\n");
        for (name, section) in &sections {
            write_attribute(&mut signature_file, "Name", name);
            write_attribute(&mut signature_file, "SHA-256-Digest", &sha256_b64(section));
            signature_file.extend_from_slice(b"\r\n");
        }

        let mut certs = Stack::new()?;
        for cert in extra {
            certs.push(cert.clone())?;
        }
        let flags = Pkcs7Flags::DETACHED
            | Pkcs7Flags::BINARY
            | Pkcs7Flags::NOATTR
            | Pkcs7Flags::NOSMIMECAP;
        let signature_block = Pkcs7::sign(signer, key, &certs, &signature_file, flags)?.to_der()?;

        Ok(Self {
            manifest,
            signature_file,
            signature_block,
        })
    }
}

/// One section of a manifest or signature file
#[derive(Debug)]
pub(crate) struct Section {
    /// Raw bytes including the terminating blank line
    pub raw: Vec<u8>,
    pub attributes: Vec<(String, String)>,
}

impl Section {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Split a manifest into its sections, main section first
pub(crate) fn parse_sections(data: &[u8]) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    let mut raw = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        raw.extend_from_slice(&rest[..consumed]);
        rest = &rest[consumed..];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = String::from_utf8_lossy(line);

        if line.is_empty() {
            if lines.is_empty() {
                raw.clear();
                continue;
            }
            sections.push(finish_section(std::mem::take(&mut raw), &lines)?);
            lines.clear();
        } else if let Some(continuation) = line.strip_prefix(' ') {
            let last = lines.last_mut().ok_or_else(|| {
                SigningError::InvalidApk("manifest starts with a continuation line".to_string())
            })?;
            last.push_str(continuation);
        } else {
            lines.push(line.into_owned());
        }
    }
    if !lines.is_empty() {
        sections.push(finish_section(raw, &lines)?);
    }
    Ok(sections)
}

fn finish_section(raw: Vec<u8>, lines: &[String]) -> Result<Section> {
    let attributes = lines
        .iter()
        .map(|line| {
            line.split_once(": ")
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| SigningError::InvalidApk(format!("malformed manifest line: {line}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Section { raw, attributes })
}

pub(crate) fn digest_matches(expected_b64: &str, data: &[u8]) -> bool {
    expected_b64 == sha256_b64(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestKey;

    #[test]
    fn test_signature_files() {
        assert!(is_signature_file("META-INF/MANIFEST.MF"));
        assert!(is_signature_file("META-INF/CERT.SF"));
        assert!(is_signature_file("META-INF/CERT.RSA"));
        assert!(is_signature_file("META-INF/upload.ec"));
        assert!(is_signature_file("META-INF/SIG-OTHER"));
        assert!(!is_signature_file("META-INF/services/com.example.Plugin"));
        assert!(!is_signature_file("META-INF/sub/CERT.SF"));
        assert!(!is_signature_file("assets/CERT.RSA"));
    }

    #[test]
    fn test_signer_file_stem() {
        assert_eq!(signer_file_stem("upload"), "UPLOAD");
        assert_eq!(signer_file_stem("my release.key"), "MY_RELEA");
        assert_eq!(signer_file_stem("a-b_c"), "A-B_C");
        assert_eq!(signer_file_stem(""), "CERT");
    }

    #[test]
    fn test_long_attributes_are_wrapped() {
        let mut out = Vec::new();
        let name = format!("assets/{}", "x".repeat(120));
        write_attribute(&mut out, "Name", &name);
        let text = String::from_utf8(out.clone()).unwrap();
        for line in text.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= MAX_LINE);
        }
        out.extend_from_slice(b"\r\n");
        let sections = parse_sections(&out).unwrap();
        assert_eq!(sections[0].get("Name"), Some(name.as_str()));
    }

    #[test]
    fn test_manifest_and_signature_file() {
        let key = TestKey::rsa("Upload");
        let entries = vec![
            ("classes.dex".to_string(), b"dex".to_vec()),
            ("AndroidManifest.xml".to_string(), b"xml".to_vec()),
        ];
        let v1 = V1Signature::sign(&entries, &key.key, &[key.cert.clone()]).unwrap();

        let manifest = parse_sections(&v1.manifest).unwrap();
        assert_eq!(manifest[0].get("Manifest-Version"), Some("1.0"));
        assert_eq!(manifest[1].get("Name"), Some("AndroidManifest.xml"));
        assert!(digest_matches(manifest[2].get("SHA-256-Digest").unwrap(), b"dex"));

        let sf = parse_sections(&v1.signature_file).unwrap();
        assert_eq!(sf[0].get("X-Android-APK-Signed"), Some("2"));
        assert!(digest_matches(sf[0].get("SHA-256-Digest-Manifest").unwrap(), &v1.manifest));
        assert!(digest_matches(sf[2].get("SHA-256-Digest").unwrap(), &manifest[2].raw));

        let pkcs7 = Pkcs7::from_der(&v1.signature_block).unwrap();
        let empty: Stack<X509> = Stack::new().unwrap();
        let signers = pkcs7.signers(&empty, Pkcs7Flags::empty()).unwrap();
        assert_eq!(signers[0].to_der().unwrap(), key.cert.to_der().unwrap());
    }
}
