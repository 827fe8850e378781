//! APK Signature Scheme v2
//!
//! The signature covers the whole archive except the signing block itself:
//! the entries section, the central directory and the end of central
//! directory record, digested in 1 MiB chunks. All integers are little
//! endian and nested values carry a `u32` length prefix.

use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private, Public};
use openssl::sign::{Signer, Verifier};
use sha2::{Digest, Sha256};

use super::archive::{ZipSections, SIGNING_BLOCK_MAGIC};
use crate::error::{Result, SigningError};

/// ID of the v2 signature in the APK Signing Block
pub(crate) const V2_BLOCK_ID: u32 = 0x7109871a;
const CHUNK_SIZE: usize = 1024 * 1024;

pub(crate) const RSA_PKCS1_V1_5_SHA256: u32 = 0x0103;
pub(crate) const ECDSA_SHA256: u32 = 0x0201;
pub(crate) const DSA_SHA256: u32 = 0x0301;

/// Signature algorithm ID for a key type
pub(crate) fn algorithm_for<T: HasPublic>(key: &PKeyRef<T>) -> Result<u32> {
    match key.id() {
        Id::RSA => Ok(RSA_PKCS1_V1_5_SHA256),
        Id::EC => Ok(ECDSA_SHA256),
        Id::DSA => Ok(DSA_SHA256),
        other => Err(SigningError::UnsupportedKey(format!("{other:?}"))),
    }
}

/// Chunked SHA-256 over the signed sections
pub(crate) fn content_digest(sections: &[&[u8]]) -> Result<Vec<u8>> {
    let mut chunk_digests = Vec::new();
    let mut count: u32 = 0;
    for section in sections {
        for chunk in section.chunks(CHUNK_SIZE) {
            let mut hasher = Sha256::new();
            hasher.update([0xa5]);
            hasher.update((chunk.len() as u32).to_le_bytes());
            hasher.update(chunk);
            chunk_digests.extend_from_slice(&hasher.finalize());
            count = count
                .checked_add(1)
                .ok_or_else(|| SigningError::InvalidApk("too many chunks".to_string()))?;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update([0x5a]);
    hasher.update(count.to_le_bytes());
    hasher.update(&chunk_digests);
    Ok(hasher.finalize().to_vec())
}

/// Digest of a written archive, with the EOCD pointing at the entries end
/// the way it does once the signing block is stripped
fn digest_of(sections: &ZipSections) -> Result<Vec<u8>> {
    let mut eocd = sections.eocd.clone();
    let offset = u32::try_from(sections.entries.len())
        .map_err(|_| SigningError::InvalidApk("archive too large".to_string()))?;
    eocd[16..20].copy_from_slice(&offset.to_le_bytes());
    content_digest(&[&sections.entries[..], &sections.central_directory[..], &eocd[..]])
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_prefixed(out: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| SigningError::InvalidApk("signature value too large".to_string()))?;
    put_u32(out, len);
    out.extend_from_slice(value);
    Ok(())
}

/// Build the APK Signing Block holding one v2 signer
pub(crate) fn signing_block(
    sections: &ZipSections,
    key: &PKeyRef<Private>,
    chain_der: &[Vec<u8>],
    public_key_der: &[u8],
) -> Result<Vec<u8>> {
    let algorithm = algorithm_for(key)?;
    let digest = digest_of(sections)?;

    let mut digest_record = Vec::new();
    put_u32(&mut digest_record, algorithm);
    put_prefixed(&mut digest_record, &digest)?;
    let mut digests = Vec::new();
    put_prefixed(&mut digests, &digest_record)?;

    let mut certificates = Vec::new();
    for der in chain_der {
        put_prefixed(&mut certificates, der)?;
    }

    let mut signed_data = Vec::new();
    put_prefixed(&mut signed_data, &digests)?;
    put_prefixed(&mut signed_data, &certificates)?;
    put_prefixed(&mut signed_data, &[])?;

    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(&signed_data)?;
    let signature = signer.sign_to_vec()?;

    let mut signature_record = Vec::new();
    put_u32(&mut signature_record, algorithm);
    put_prefixed(&mut signature_record, &signature)?;
    let mut signatures = Vec::new();
    put_prefixed(&mut signatures, &signature_record)?;

    let mut signer_block = Vec::new();
    put_prefixed(&mut signer_block, &signed_data)?;
    put_prefixed(&mut signer_block, &signatures)?;
    put_prefixed(&mut signer_block, public_key_der)?;

    let mut signers = Vec::new();
    put_prefixed(&mut signers, &signer_block)?;
    let mut value = Vec::new();
    put_prefixed(&mut value, &signers)?;

    let pair_len = (4 + value.len()) as u64;
    let mut pairs = Vec::new();
    pairs.extend_from_slice(&pair_len.to_le_bytes());
    put_u32(&mut pairs, V2_BLOCK_ID);
    pairs.extend_from_slice(&value);

    let block_size = (pairs.len() + 24) as u64;
    let mut block = Vec::with_capacity(pairs.len() + 32);
    block.extend_from_slice(&block_size.to_le_bytes());
    block.extend_from_slice(&pairs);
    block.extend_from_slice(&block_size.to_le_bytes());
    block.extend_from_slice(SIGNING_BLOCK_MAGIC);
    Ok(block)
}

/// Cursor over length-prefixed values
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| SigningError::InvalidApk("truncated v2 signature".to_string()))?;
        let value = &self.data[self.offset..end];
        self.offset = end;
        Ok(value)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn prefixed(&mut self) -> Result<Reader<'a>> {
        let len = self.u32()? as usize;
        self.take(len).map(Reader::new)
    }

    fn prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

/// Value of the pair with `id` in an APK Signing Block
pub(crate) fn find_pair(block: &[u8], id: u32) -> Result<Option<&[u8]>> {
    if block.len() < 32 {
        return Err(SigningError::InvalidApk("APK Signing Block too short".to_string()));
    }
    let mut pairs = Reader::new(&block[8..block.len() - 24]);
    while !pairs.is_empty() {
        let len = usize::try_from(pairs.u64()?)
            .map_err(|_| SigningError::InvalidApk("pair length out of range".to_string()))?;
        if len < 4 {
            return Err(SigningError::InvalidApk("pair length out of range".to_string()));
        }
        let mut pair = Reader::new(pairs.take(len)?);
        if pair.u32()? == id {
            return pair.take(len - 4).map(Some);
        }
    }
    Ok(None)
}

/// A verified v2 signer
#[derive(Debug)]
pub(crate) struct V2Signer {
    pub certificates: Vec<Vec<u8>>,
    pub public_key: Vec<u8>,
}

/// Verify every signer of a v2 signature value against the archive sections
pub(crate) fn verify(value: &[u8], sections: &[&[u8]]) -> Result<Vec<V2Signer>> {
    let mut verified = Vec::new();
    let mut signers = Reader::new(value).prefixed()?;
    if signers.is_empty() {
        return Err(SigningError::InvalidApk("no v2 signers".to_string()));
    }
    let actual = content_digest(sections)?;

    while !signers.is_empty() {
        let mut signer = signers.prefixed()?;
        let signed_data = signer.prefixed_bytes()?;
        let mut signatures = signer.prefixed()?;
        let public_key_der = signer.prefixed_bytes()?;
        let public_key: PKey<Public> = PKey::public_key_from_der(public_key_der)?;
        let algorithm = algorithm_for(&public_key)?;

        let mut matched = false;
        while !signatures.is_empty() {
            let mut record = signatures.prefixed()?;
            if record.u32()? != algorithm {
                continue;
            }
            let signature = record.prefixed_bytes()?;
            let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key)?;
            verifier.update(signed_data)?;
            if !verifier.verify(signature)? {
                return Err(SigningError::InvalidApk("v2 signature does not verify".to_string()));
            }
            matched = true;
        }
        if !matched {
            return Err(SigningError::InvalidApk("no v2 signature for the signer key".to_string()));
        }

        let mut data = Reader::new(signed_data);
        let mut digests = data.prefixed()?;
        let mut certificates_reader = data.prefixed()?;

        let mut recorded = None;
        while !digests.is_empty() {
            let mut record = digests.prefixed()?;
            if record.u32()? == algorithm {
                recorded = Some(record.prefixed_bytes()?);
            }
        }
        let recorded = recorded
            .ok_or_else(|| SigningError::InvalidApk("no v2 content digest".to_string()))?;
        if recorded != actual.as_slice() {
            return Err(SigningError::InvalidApk("v2 content digest mismatch".to_string()));
        }

        let mut certificates = Vec::new();
        while !certificates_reader.is_empty() {
            certificates.push(certificates_reader.prefixed_bytes()?.to_vec());
        }
        let leaf = certificates
            .first()
            .ok_or_else(|| SigningError::InvalidApk("v2 signer has no certificate".to_string()))?;
        let leaf_key = openssl::x509::X509::from_der(leaf)?.public_key()?;
        if leaf_key.public_key_to_der()? != public_key_der {
            return Err(SigningError::InvalidApk(
                "v2 signer key does not match its certificate".to_string(),
            ));
        }

        verified.push(V2Signer {
            certificates,
            public_key: public_key_der.to_vec(),
        });
    }
    Ok(verified)
}
