//! Per-session packet encryption: one RC4 stream per direction, MAC
//! signing on the way out and verification on the way in, and the periodic
//! session key update.

use crate::kdf::{self, SessionKeys};
use crate::mac::{mac_signature, MAC_SIGNATURE_SIZE};
use crate::{CryptoError, KeyStrength, Rc4};

/// Packets encrypted under one key before it is updated.
const REKEY_PACKET_COUNT: u32 = 4096;

struct DirectionState {
    initial_key: Vec<u8>,
    current_key: Vec<u8>,
    rc4: Rc4,
    packet_count: u32,
}

impl DirectionState {
    fn new(key: Vec<u8>) -> Self {
        Self {
            rc4: Rc4::new(&key),
            initial_key: key.clone(),
            current_key: key,
            packet_count: 0,
        }
    }

    /// Updates the key and re-seeds the stream every `REKEY_PACKET_COUNT`
    /// packets, then accounts for one more packet.
    fn advance(&mut self, strength: KeyStrength) {
        if self.packet_count == REKEY_PACKET_COUNT {
            self.current_key = kdf::update_key(&self.initial_key, &self.current_key, strength);
            self.rc4 = Rc4::new(&self.current_key);
            self.packet_count = 0;
        }

        self.packet_count += 1;
    }
}

/// Both directions of a session's standard RDP encryption.
///
/// Owned by the security layer of one side; the encrypt direction is what
/// this side sends, the decrypt direction is what it receives.
pub struct RdpEncryption {
    strength: KeyStrength,
    mac_key: [u8; 16],
    encrypt: DirectionState,
    decrypt: DirectionState,
}

impl RdpEncryption {
    pub fn new(keys: SessionKeys, strength: KeyStrength) -> Self {
        Self {
            strength,
            mac_key: keys.mac_key,
            encrypt: DirectionState::new(keys.encrypt_key),
            decrypt: DirectionState::new(keys.decrypt_key),
        }
    }

    /// Signs the plaintext and encrypts it, returning the 8-byte signature
    /// and the ciphertext.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> ([u8; MAC_SIGNATURE_SIZE], Vec<u8>) {
        self.encrypt.advance(self.strength);

        let signature = mac_signature(&self.mac_key, plaintext);
        let ciphertext = self.encrypt.rc4.process(plaintext);

        (signature, ciphertext)
    }

    /// Decrypts the ciphertext and verifies its signature.
    pub fn decrypt_verify(
        &mut self,
        signature: &[u8; MAC_SIGNATURE_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.decrypt.advance(self.strength);

        let plaintext = self.decrypt.rc4.process(ciphertext);

        if mac_signature(&self.mac_key, &plaintext) != *signature {
            return Err(CryptoError::BadSignature);
        }

        Ok(plaintext)
    }
}

impl core::fmt::Debug for RdpEncryption {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RdpEncryption")
            .field("strength", &self.strength)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::KeyPerspective;

    const CLIENT_RANDOM: [u8; 32] = [0x01; 32];
    const SERVER_RANDOM: [u8; 32] = [0x02; 32];

    fn pair(strength: KeyStrength) -> (RdpEncryption, RdpEncryption) {
        let client = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, strength, KeyPerspective::Client);
        let server = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, strength, KeyPerspective::Server);
        (
            RdpEncryption::new(client, strength),
            RdpEncryption::new(server, strength),
        )
    }

    #[test]
    fn encrypt_then_decrypt_verifies() {
        for strength in [KeyStrength::Bits40, KeyStrength::Bits56, KeyStrength::Bits128] {
            let (mut client, mut server) = pair(strength);

            let (signature, ciphertext) = client.encrypt(b"hello");
            assert_ne!(ciphertext, b"hello");

            let plaintext = server.decrypt_verify(&signature, &ciphertext).unwrap();
            assert_eq!(plaintext, b"hello");
        }
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (mut client, mut server) = pair(KeyStrength::Bits128);

        let (signature, mut ciphertext) = client.encrypt(b"sensitive");
        ciphertext[3] ^= 0x01;

        assert!(matches!(
            server.decrypt_verify(&signature, &ciphertext),
            Err(CryptoError::BadSignature)
        ));
    }

    #[test]
    fn directions_are_independent_streams() {
        let (mut client, mut server) = pair(KeyStrength::Bits128);

        let (_, client_ct) = client.encrypt(b"same bytes");
        let (_, server_ct) = server.encrypt(b"same bytes");

        assert_ne!(client_ct, server_ct);
    }

    #[test]
    fn long_exchange_survives_rekeying() {
        let (mut client, mut server) = pair(KeyStrength::Bits40);

        for i in 0..(REKEY_PACKET_COUNT + 10) {
            let payload = i.to_le_bytes();
            let (signature, ciphertext) = client.encrypt(&payload);
            let plaintext = server.decrypt_verify(&signature, &ciphertext).unwrap();
            assert_eq!(plaintext, payload);
        }
    }
}
