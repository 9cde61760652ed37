//! MS-RDPBCGR 5.3.6 MAC generation.

use md5::{Digest as _, Md5};
use sha1::Sha1;

pub const MAC_SIGNATURE_SIZE: usize = 8;

const PAD_ONE: [u8; 40] = [0x36; 40];
const PAD_TWO: [u8; 48] = [0x5C; 48];

/// `MD5(key || pad2 || SHA1(key || pad1 || len32(data) || data))`
pub fn mac_data(mac_key: &[u8], data: &[u8]) -> [u8; 16] {
    let data_len = (data.len() as u32).to_le_bytes();

    let mut sha1 = Sha1::new();
    sha1.update(mac_key);
    sha1.update(PAD_ONE);
    sha1.update(data_len);
    sha1.update(data);
    let sha_result = sha1.finalize();

    let mut md5 = Md5::new();
    md5.update(mac_key);
    md5.update(PAD_TWO);
    md5.update(sha_result);
    md5.finalize().into()
}

/// First eight bytes of [`mac_data`], as placed in the security header.
pub fn mac_signature(mac_key: &[u8], data: &[u8]) -> [u8; MAC_SIGNATURE_SIZE] {
    let full = mac_data(mac_key, data);
    let mut signature = [0u8; MAC_SIGNATURE_SIZE];
    signature.copy_from_slice(&full[..MAC_SIGNATURE_SIZE]);
    signature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_a_prefix_of_the_digest() {
        let key = [0x42u8; 16];
        let digest = mac_data(&key, b"hello");
        let signature = mac_signature(&key, b"hello");
        assert_eq!(signature, digest[..8]);
    }

    #[test]
    fn signature_depends_on_key_and_data() {
        let key_a = [0x01u8; 16];
        let key_b = [0x02u8; 16];

        assert_ne!(mac_signature(&key_a, b"hello"), mac_signature(&key_b, b"hello"));
        assert_ne!(mac_signature(&key_a, b"hello"), mac_signature(&key_a, b"hell0"));
    }

    #[test]
    fn length_is_part_of_the_digest() {
        let key = [0x01u8; 16];
        // same bytes, split differently, must not collide through the
        // length prefix
        assert_ne!(mac_signature(&key, b"ab"), mac_signature(&key, b"abab"));
    }
}
