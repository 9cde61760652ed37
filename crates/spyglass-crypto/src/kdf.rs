//! MS-RDPBCGR 5.3.5 key schedule for standard RDP security.

use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::KeyStrength;

pub const RANDOM_SIZE: usize = 32;
const PREMASTER_SECRET_SIZE: usize = 48;
const SESSION_KEY_BLOB_SIZE: usize = 48;

/// `MD5(secret[..48] || SHA1(tag || secret[..48] || salt1 || salt2))`
fn salted_hash(tag: &[u8], secret: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; 16] {
    let secret = &secret[..secret.len().min(PREMASTER_SECRET_SIZE)];

    let mut sha1 = Sha1::new();
    sha1.update(tag);
    sha1.update(secret);
    sha1.update(salt1);
    sha1.update(salt2);
    let sha_result = sha1.finalize();

    let mut md5 = Md5::new();
    md5.update(secret);
    md5.update(sha_result);
    md5.finalize().into()
}

/// `MD5(key || random1 || random2)`
fn final_hash(key: &[u8], random1: &[u8], random2: &[u8]) -> [u8; 16] {
    let mut md5 = Md5::new();
    md5.update(key);
    md5.update(random1);
    md5.update(random2);
    md5.finalize().into()
}

fn key_blob(tags: [&[u8]; 3], secret: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; SESSION_KEY_BLOB_SIZE] {
    let mut blob = [0u8; SESSION_KEY_BLOB_SIZE];
    for (i, tag) in tags.into_iter().enumerate() {
        blob[i * 16..(i + 1) * 16].copy_from_slice(&salted_hash(tag, secret, salt1, salt2));
    }
    blob
}

/// Reduces a 128-bit key to the negotiated strength, salting the leading
/// bytes as mandated for 40- and 56-bit keys.
pub(crate) fn reduce_key(key128: &[u8; 16], strength: KeyStrength) -> Vec<u8> {
    match strength {
        KeyStrength::Bits128 => key128.to_vec(),
        KeyStrength::Bits56 => {
            let mut key = key128[..8].to_vec();
            key[0] = 0xD1;
            key
        }
        KeyStrength::Bits40 => {
            let mut key = key128[..8].to_vec();
            key[0] = 0xD1;
            key[1] = 0x26;
            key[2] = 0x9E;
            key
        }
    }
}

/// Which end of the connection these keys belong to. The client encrypts
/// with the key the server decrypts with and vice versa.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyPerspective {
    Client,
    Server,
}

/// The derived key material of one side of a session.
#[derive(Clone)]
pub struct SessionKeys {
    pub mac_key: [u8; 16],
    pub encrypt_key: Vec<u8>,
    pub decrypt_key: Vec<u8>,
}

impl SessionKeys {
    /// Runs the whole schedule from the two randoms:
    /// premaster from the random halves, master secret (A/BB/CCC), session
    /// key blob (X/YY/ZZZ), MAC key from the first 16 bytes, and the two
    /// directional initial keys from the remaining blob halves.
    pub fn derive(
        client_random: &[u8; RANDOM_SIZE],
        server_random: &[u8; RANDOM_SIZE],
        strength: KeyStrength,
        perspective: KeyPerspective,
    ) -> Self {
        let mut premaster_secret = [0u8; PREMASTER_SECRET_SIZE];
        premaster_secret[..24].copy_from_slice(&client_random[..24]);
        premaster_secret[24..].copy_from_slice(&server_random[..24]);

        let master_secret = key_blob(
            [b"A", b"BB", b"CCC"],
            &premaster_secret,
            client_random,
            server_random,
        );

        let session_key_blob = key_blob([b"X", b"YY", b"ZZZ"], &master_secret, client_random, server_random);

        let mut mac_key = [0u8; 16];
        mac_key.copy_from_slice(&session_key_blob[..16]);

        let from_server = final_hash(&session_key_blob[16..32], client_random, server_random);
        let from_client = final_hash(&session_key_blob[32..48], client_random, server_random);

        let (decrypt128, encrypt128) = match perspective {
            KeyPerspective::Client => (from_server, from_client),
            KeyPerspective::Server => (from_client, from_server),
        };

        Self {
            mac_key,
            encrypt_key: reduce_key(&encrypt128, strength),
            decrypt_key: reduce_key(&decrypt128, strength),
        }
    }
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// MS-RDPBCGR 5.3.7 session key update, run after every 4096 packets.
pub(crate) fn update_key(initial_key: &[u8], current_key: &[u8], strength: KeyStrength) -> Vec<u8> {
    const PAD_ONE: [u8; 40] = [0x36; 40];
    const PAD_TWO: [u8; 48] = [0x5C; 48];

    let mut sha1 = Sha1::new();
    sha1.update(initial_key);
    sha1.update(PAD_ONE);
    sha1.update(current_key);
    let sha_result = sha1.finalize();

    let mut md5 = Md5::new();
    md5.update(initial_key);
    md5.update(PAD_TWO);
    md5.update(sha_result);
    let temp_key128: [u8; 16] = md5.finalize().into();

    let temp_key = reduce_key(&temp_key128, strength);

    // The new key is the temporary key encrypted with itself.
    let mut rc4 = crate::Rc4::new(&temp_key);
    let mut new_key = rc4.process(&temp_key);

    if strength != KeyStrength::Bits128 {
        new_key = {
            let mut reduced = [0u8; 16];
            reduced[..8].copy_from_slice(&new_key[..8]);
            reduce_key(&reduced, strength)
        };
    }

    new_key
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_RANDOM: [u8; RANDOM_SIZE] = [0x01; RANDOM_SIZE];
    const SERVER_RANDOM: [u8; RANDOM_SIZE] = [0x02; RANDOM_SIZE];

    #[test]
    fn derivation_is_deterministic() {
        let a = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Client);
        let b = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Client);

        assert_eq!(a.mac_key, b.mac_key);
        assert_eq!(a.encrypt_key, b.encrypt_key);
        assert_eq!(a.decrypt_key, b.decrypt_key);
    }

    #[test]
    fn perspectives_are_mirrored() {
        let client = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Client);
        let server = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Server);

        assert_eq!(client.mac_key, server.mac_key);
        assert_eq!(client.encrypt_key, server.decrypt_key);
        assert_eq!(client.decrypt_key, server.encrypt_key);
        assert_ne!(client.encrypt_key, client.decrypt_key);
    }

    #[test]
    fn key_sizes_follow_strength() {
        for (strength, expected_len) in [
            (KeyStrength::Bits40, 8),
            (KeyStrength::Bits56, 8),
            (KeyStrength::Bits128, 16),
        ] {
            let keys = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, strength, KeyPerspective::Client);
            assert_eq!(keys.encrypt_key.len(), expected_len);
            assert_eq!(keys.decrypt_key.len(), expected_len);
            assert_eq!(keys.mac_key.len(), 16);
        }
    }

    #[test]
    fn forty_bit_keys_carry_the_fixed_salt() {
        let keys = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits40, KeyPerspective::Client);
        assert_eq!(&keys.encrypt_key[..3], &[0xD1, 0x26, 0x9E]);
        assert_eq!(&keys.decrypt_key[..3], &[0xD1, 0x26, 0x9E]);

        let keys56 = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits56, KeyPerspective::Client);
        assert_eq!(keys56.encrypt_key[0], 0xD1);
    }

    #[test]
    fn update_produces_a_fresh_key_of_same_length() {
        let keys = SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Client);

        let updated = update_key(&keys.encrypt_key, &keys.encrypt_key, KeyStrength::Bits128);
        assert_eq!(updated.len(), keys.encrypt_key.len());
        assert_ne!(updated, keys.encrypt_key);
    }
}
