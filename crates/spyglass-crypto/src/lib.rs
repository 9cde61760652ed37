#![cfg_attr(doc, doc = include_str!("../README.md"))]

mod cert;
mod kdf;
mod mac;
mod rc4;
mod rsa;
mod session;

pub use self::cert::{proprietary_certificate, public_key_from_certificate};
pub use self::kdf::{KeyPerspective, SessionKeys, RANDOM_SIZE};
pub use self::mac::{mac_data, mac_signature, MAC_SIGNATURE_SIZE};
pub use self::rc4::Rc4;
pub use self::rsa::{RsaPrivateKey, RsaPublicKey};
pub use self::session::RdpEncryption;

use thiserror::Error;

/// Negotiated strength of the standard RDP encryption keys.
///
/// FIPS is not part of this dialect; sessions negotiating it must fall back
/// to TLS.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyStrength {
    Bits40,
    Bits56,
    Bits128,
}

impl KeyStrength {
    pub fn key_len(self) -> usize {
        match self {
            Self::Bits40 | Self::Bits56 => 8,
            Self::Bits128 => 16,
        }
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("recomputed MAC does not match the packet signature")]
    BadSignature,
    #[error("RSA input is not smaller than the modulus")]
    RsaInputTooLarge,
    #[error("malformed server certificate: {0}")]
    MalformedCertificate(&'static str),
    #[error("unsupported encryption method")]
    UnsupportedEncryptionMethod,
}
