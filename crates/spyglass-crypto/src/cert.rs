//! Server certificate parsing, as embedded in the SC_SECURITY settings
//! block. Both the proprietary RSA blob and an X.509 chain are understood;
//! either way the result is the little-endian public key the client-random
//! exchange needs.

use pkcs1::der::Decode as _;
use x509_cert::der::Decode as _;

use crate::{CryptoError, RsaPublicKey};

const CERT_CHAIN_VERSION_1: u32 = 1; // proprietary
const CERT_CHAIN_VERSION_2: u32 = 2; // X.509
const CERT_CHAIN_VERSION_MASK: u32 = 0x7FFF_FFFF;

const SIGNATURE_ALG_RSA: u32 = 1;
const KEY_ALG_RSA: u32 = 1;
const KEY_BLOB_RSA: u16 = 6;

const RSA_MAGIC: u32 = 0x3141_5352; // "RSA1"

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CryptoError> {
        if self.bytes.len() - self.pos < n {
            return Err(CryptoError::MalformedCertificate("truncated certificate blob"));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, CryptoError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, CryptoError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Extracts the RSA public key out of a SERVER_CERTIFICATE blob.
pub fn public_key_from_certificate(blob: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let mut reader = Reader::new(blob);

    match reader.u32()? & CERT_CHAIN_VERSION_MASK {
        CERT_CHAIN_VERSION_1 => proprietary_public_key(&mut reader),
        CERT_CHAIN_VERSION_2 => x509_public_key(&mut reader),
        _ => Err(CryptoError::MalformedCertificate("unknown certificate chain version")),
    }
}

/// PROPRIETARYSERVERCERTIFICATE with its RSA_PUBLIC_KEY blob.
fn proprietary_public_key(reader: &mut Reader<'_>) -> Result<RsaPublicKey, CryptoError> {
    if reader.u32()? != SIGNATURE_ALG_RSA {
        return Err(CryptoError::MalformedCertificate("unexpected signature algorithm"));
    }
    if reader.u32()? != KEY_ALG_RSA {
        return Err(CryptoError::MalformedCertificate("unexpected key algorithm"));
    }
    if reader.u16()? != KEY_BLOB_RSA {
        return Err(CryptoError::MalformedCertificate("unexpected public key blob type"));
    }

    let key_blob_len = usize::from(reader.u16()?);
    let key_blob = Reader::new(reader.take(key_blob_len)?);
    let key = rsa_public_key_blob(key_blob)?;

    // The trailing signature blob is not verified: the proxy does not act on
    // certificate authenticity, it only needs the key.

    Ok(key)
}

fn rsa_public_key_blob(mut reader: Reader<'_>) -> Result<RsaPublicKey, CryptoError> {
    if reader.u32()? != RSA_MAGIC {
        return Err(CryptoError::MalformedCertificate("bad RSA_PUBLIC_KEY magic"));
    }

    let key_len = reader.u32()? as usize;
    let bit_len = reader.u32()? as usize;
    let _data_len = reader.u32()?;
    let exponent = reader.take(4)?.to_vec();

    // keylen counts the modulus plus eight bytes of zero padding
    let modulus_len = bit_len / 8;
    if key_len < modulus_len {
        return Err(CryptoError::MalformedCertificate("inconsistent RSA key lengths"));
    }

    let modulus = reader.take(key_len)?[..modulus_len].to_vec();

    Ok(RsaPublicKey { modulus, exponent })
}

/// X509CertificateChain: take the leaf (last) certificate and pull the RSA
/// key out of its SubjectPublicKeyInfo. The certificate fields are big
/// endian, so both numbers get reversed on the way out.
fn x509_public_key(reader: &mut Reader<'_>) -> Result<RsaPublicKey, CryptoError> {
    let count = reader.u32()? as usize;
    if count == 0 {
        return Err(CryptoError::MalformedCertificate("empty X.509 certificate chain"));
    }

    let mut leaf = None;
    for _ in 0..count {
        let cert_len = reader.u32()? as usize;
        leaf = Some(reader.take(cert_len)?);
    }

    let cert_der = leaf.expect("count is non-zero");

    let certificate = x509_cert::Certificate::from_der(cert_der)
        .map_err(|_| CryptoError::MalformedCertificate("invalid X.509 certificate"))?;

    let spki = certificate.tbs_certificate.subject_public_key_info;
    let key_der = spki
        .subject_public_key
        .as_bytes()
        .ok_or(CryptoError::MalformedCertificate("unaligned subjectPublicKey"))?;

    let rsa = pkcs1::RsaPublicKey::from_der(key_der)
        .map_err(|_| CryptoError::MalformedCertificate("subjectPublicKey is not an RSA key"))?;

    let mut modulus = rsa.modulus.as_bytes().to_vec();
    modulus.reverse();
    let mut exponent = rsa.public_exponent.as_bytes().to_vec();
    exponent.reverse();

    Ok(RsaPublicKey { modulus, exponent })
}

/// Builds a version-1 proprietary certificate blob around a public key, the
/// shape the proxy advertises to its victim.
pub fn proprietary_certificate(key: &RsaPublicKey) -> Vec<u8> {
    let modulus_len = key.modulus.len();
    let key_len = modulus_len + 8;

    let mut exponent = [0u8; 4];
    let exponent_len = key.exponent.len().min(4);
    exponent[..exponent_len].copy_from_slice(&key.exponent[..exponent_len]);

    let mut blob = Vec::with_capacity(64 + key_len);
    blob.extend_from_slice(&CERT_CHAIN_VERSION_1.to_le_bytes());
    blob.extend_from_slice(&SIGNATURE_ALG_RSA.to_le_bytes());
    blob.extend_from_slice(&KEY_ALG_RSA.to_le_bytes());
    blob.extend_from_slice(&KEY_BLOB_RSA.to_le_bytes());
    blob.extend_from_slice(&((20 + key_len) as u16).to_le_bytes()); // wPublicKeyBlobLen

    // RSA_PUBLIC_KEY
    blob.extend_from_slice(&RSA_MAGIC.to_le_bytes());
    blob.extend_from_slice(&(key_len as u32).to_le_bytes());
    blob.extend_from_slice(&((modulus_len * 8) as u32).to_le_bytes());
    blob.extend_from_slice(&((modulus_len - 1) as u32).to_le_bytes());
    blob.extend_from_slice(&exponent);
    blob.extend_from_slice(&key.modulus);
    blob.extend_from_slice(&[0u8; 8]); // modulus zero padding

    // Unsigned signature blob: the victim trusts the proxy, not the chain.
    blob.extend_from_slice(&8u16.to_le_bytes()); // wSignatureBlobType
    blob.extend_from_slice(&0u16.to_le_bytes()); // wSignatureBlobLen

    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proprietary_round_trip() {
        let key = RsaPublicKey {
            modulus: vec![0xAB; 64],
            exponent: vec![0x01, 0x00, 0x01, 0x00],
        };

        let blob = proprietary_certificate(&key);
        let parsed = public_key_from_certificate(&blob).unwrap();

        assert_eq!(parsed.modulus, key.modulus);
        assert_eq!(parsed.exponent, key.exponent);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let key = RsaPublicKey {
            modulus: vec![0xAB; 64],
            exponent: vec![0x01, 0x00, 0x01, 0x00],
        };

        let blob = proprietary_certificate(&key);
        assert!(public_key_from_certificate(&blob[..blob.len() / 2]).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let blob = 7u32.to_le_bytes();
        assert!(public_key_from_certificate(&blob).is_err());
    }
}
