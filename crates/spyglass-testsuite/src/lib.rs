//! Shared fixtures for the Spyglass integration tests.

use num_bigint::BigInt;
use num_integer::Integer as _;

use spyglass_crypto::RsaPrivateKey;
use spyglass_pdu::gcc::{
    ChannelDef, ChannelName, ChannelOptions, ClientBlocks, ClientCoreData, ClientNetworkData, ClientSecurityData,
    EncryptionLevel, EncryptionMethod, ServerBlocks, ServerCoreData, ServerNetworkData, ServerSecurityData,
    RDP_VERSION_5_PLUS,
};

/// Client settings blocks declaring the given static channels.
pub fn client_blocks(channel_names: &[&str]) -> ClientBlocks {
    let channels = channel_names
        .iter()
        .map(|name| ChannelDef {
            name: ChannelName::from_utf8(name).expect("ASCII channel name"),
            options: ChannelOptions::INITIALIZED | ChannelOptions::COMPRESS_RDP,
        })
        .collect();

    ClientBlocks {
        core: ClientCoreData::new(1024, 768, "TESTBOX"),
        security: ClientSecurityData {
            encryption_methods: EncryptionMethod::BIT_128 | EncryptionMethod::BIT_40,
            ext_encryption_methods: 0,
        },
        network: Some(ClientNetworkData { channels }),
        other: Vec::new(),
    }
}

/// Server settings blocks advertising standard RDP security.
pub fn server_blocks_legacy(
    io_channel: u16,
    channel_ids: &[u16],
    server_random: [u8; 32],
    server_cert: Vec<u8>,
) -> ServerBlocks {
    ServerBlocks {
        core: ServerCoreData {
            version: RDP_VERSION_5_PLUS,
            optional_tail: Vec::new(),
        },
        security: ServerSecurityData {
            encryption_method: EncryptionMethod::BIT_128,
            encryption_level: EncryptionLevel::ClientCompatible,
            server_random: Some(server_random),
            server_cert,
        },
        network: ServerNetworkData {
            io_channel,
            channel_ids: channel_ids.to_vec(),
        },
        other: Vec::new(),
    }
}

/// Server settings blocks with encryption turned off (TLS or plain).
pub fn server_blocks_plain(io_channel: u16, channel_ids: &[u16]) -> ServerBlocks {
    ServerBlocks {
        core: ServerCoreData {
            version: RDP_VERSION_5_PLUS,
            optional_tail: Vec::new(),
        },
        security: ServerSecurityData::no_security(),
        network: ServerNetworkData {
            io_channel,
            channel_ids: channel_ids.to_vec(),
        },
        other: Vec::new(),
    }
}

/// A fixed RSA key for tests, built from four Mersenne primes
/// (2^61-1, 2^89-1, 2^107-1, 2^127-1; 384-bit modulus).
///
/// Multi-prime RSA keeps the fixture honest without embedding an opaque key
/// blob: the private exponent is derived from the known factorization.
pub fn test_rsa_key() -> RsaPrivateKey {
    let primes = [
        (BigInt::from(1u8) << 61usize) - 1,
        (BigInt::from(1u8) << 89usize) - 1,
        (BigInt::from(1u8) << 107usize) - 1,
        (BigInt::from(1u8) << 127usize) - 1,
    ];

    let modulus: BigInt = primes.iter().product();

    let lambda = primes
        .iter()
        .map(|p| p - 1)
        .fold(BigInt::from(1u8), |acc, x| acc.lcm(&x));

    let e = BigInt::from(65537u32);
    let egcd = e.extended_gcd(&lambda);
    assert_eq!(egcd.gcd, BigInt::from(1u8), "e must be invertible modulo lambda");

    let d = ((egcd.x % &lambda) + &lambda) % &lambda;

    RsaPrivateKey {
        modulus: modulus.to_biguint().expect("positive").to_bytes_le(),
        public_exponent: vec![0x01, 0x00, 0x01],
        private_exponent: d.to_biguint().expect("positive").to_bytes_le(),
    }
}
