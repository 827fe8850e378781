//! Key and APK fixtures shared by the unit tests

use std::io::Write;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use crate::material::KeySigningMaterial;

pub(crate) struct TestKey {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl TestKey {
    pub fn rsa(common_name: &str) -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        Self::self_signed(key, common_name)
    }

    pub fn ec(common_name: &str) -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        Self::self_signed(key, common_name)
    }

    fn self_signed(key: PKey<Private>, common_name: &str) -> Self {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            cert: builder.build(),
        }
    }

    pub fn material(&self, name: &str) -> KeySigningMaterial {
        KeySigningMaterial::new(&self.key, &[self.cert.clone()], name).unwrap()
    }

    /// Key and certificate as one PEM file
    pub fn pem(&self) -> Vec<u8> {
        let mut out = self.key.private_key_to_pem_pkcs8().unwrap();
        out.extend(self.cert.to_pem().unwrap());
        out
    }
}

pub(crate) fn pkcs12_der(key: &TestKey, name: &str, password: &str, ca: &[X509]) -> Vec<u8> {
    let mut builder = Pkcs12::builder();
    builder.name(name).pkey(&key.key).cert(&key.cert);
    if !ca.is_empty() {
        let mut stack = Stack::new().unwrap();
        for cert in ca {
            stack.push(cert.clone()).unwrap();
        }
        builder.ca(stack);
    }
    builder.build2(password).unwrap().to_der().unwrap()
}

/// A small unsigned APK with stored and deflated entries
pub(crate) fn unsigned_apk() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let deflated = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        zip.start_file("AndroidManifest.xml", deflated).unwrap();
        zip.write_all(&[0x03, 0x00, 0x08, 0x00, 0x10, 0x20]).unwrap();
        zip.start_file("classes.dex", deflated).unwrap();
        zip.write_all(&vec![0x64; 5000]).unwrap();
        zip.start_file("resources.arsc", stored).unwrap();
        zip.write_all(b"resource table").unwrap();
        zip.add_directory("lib/", stored).unwrap();
        zip.start_file("lib/arm64-v8a/libnative.so", stored).unwrap();
        zip.write_all(&[0x7f, b'E', b'L', b'F', 2, 1, 1]).unwrap();
        zip.start_file("META-INF/services/com.example.Plugin", deflated)
            .unwrap();
        zip.write_all(b"com.example.Impl\n").unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}
