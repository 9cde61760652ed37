//! Raw RSA for the client-random exchange.
//!
//! The server certificate stores the modulus and exponent little-endian and
//! the wire carries the ciphertext little-endian as well, so everything here
//! stays in little-endian and big-number conversion happens at the edges.

use num_bigint::BigUint;

use crate::CryptoError;

/// RSA public key with little-endian fields, as found in the server
/// certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

impl RsaPublicKey {
    /// Length in bytes of a ciphertext produced with this key.
    pub fn ciphertext_len(&self) -> usize {
        let mut len = self.modulus.len();
        while len > 0 && self.modulus[len - 1] == 0 {
            len -= 1;
        }
        len
    }

    /// Encrypts `plaintext` (little-endian) and returns a little-endian
    /// ciphertext of [`Self::ciphertext_len`] bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let n = BigUint::from_bytes_le(&self.modulus);
        let e = BigUint::from_bytes_le(&self.exponent);
        let m = BigUint::from_bytes_le(plaintext);

        if m >= n {
            return Err(CryptoError::RsaInputTooLarge);
        }

        let c = m.modpow(&e, &n);

        let mut out = c.to_bytes_le();
        out.resize(self.ciphertext_len(), 0);
        Ok(out)
    }
}

/// RSA private key used by the proxy to decrypt the victim client random.
#[derive(Clone)]
pub struct RsaPrivateKey {
    pub modulus: Vec<u8>,
    pub public_exponent: Vec<u8>,
    pub private_exponent: Vec<u8>,
}

impl RsaPrivateKey {
    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey {
            modulus: self.modulus.clone(),
            exponent: self.public_exponent.clone(),
        }
    }

    /// Decrypts a little-endian ciphertext; the result is truncated or
    /// padded to `plaintext_len` bytes.
    pub fn decrypt(&self, ciphertext: &[u8], plaintext_len: usize) -> Result<Vec<u8>, CryptoError> {
        let n = BigUint::from_bytes_le(&self.modulus);
        let d = BigUint::from_bytes_le(&self.private_exponent);
        let c = BigUint::from_bytes_le(ciphertext);

        if c >= n {
            return Err(CryptoError::RsaInputTooLarge);
        }

        let m = c.modpow(&d, &n);

        let mut out = m.to_bytes_le();
        out.resize(plaintext_len, 0);
        Ok(out)
    }
}

impl core::fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RsaPrivateKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Toy key, little-endian: n = 3233 (61 * 53), e = 17, d = 413
    fn toy_private_key() -> RsaPrivateKey {
        RsaPrivateKey {
            modulus: vec![0xA1, 0x0C],
            public_exponent: vec![0x11],
            private_exponent: vec![0x9D, 0x01],
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let private = toy_private_key();
        let public = private.public_key();

        let plaintext = vec![0x41];
        let ciphertext = public.encrypt(&plaintext).unwrap();
        let decrypted = private.decrypt(&ciphertext, 1).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn textbook_value() {
        // 65^17 mod 3233 = 2790
        let public = toy_private_key().public_key();
        let ciphertext = public.encrypt(&[65]).unwrap();
        assert_eq!(ciphertext, vec![0xE6, 0x0A]); // 2790 little-endian
    }

    #[test]
    fn oversized_input_is_rejected() {
        let public = toy_private_key().public_key();
        assert!(public.encrypt(&[0xFF, 0xFF]).is_err());
    }
}
