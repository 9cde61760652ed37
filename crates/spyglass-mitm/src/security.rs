//! Per-side payload protection for the relay: strips the inbound side's
//! security layer and reapplies the outbound side's.

use spyglass_connector::SecuritySession;
use spyglass_core::{encode_vec, ReadCursor};
use spyglass_crypto::MAC_SIGNATURE_SIZE;
use spyglass_pdu::fast_path::EncryptionFlags;
use spyglass_pdu::rdp::{SecurityHeader, SecurityHeaderFlags};

use crate::{session_general_err, SessionError, SessionErrorKind, SessionResult};

/// Removes the security envelope of a slow-path payload.
///
/// Returns the plaintext and the security flags that were present (empty
/// when the mode has no header on the wire).
pub(crate) fn unprotect_slow_path(
    security: &mut SecuritySession,
    payload: &[u8],
) -> SessionResult<(SecurityHeaderFlags, Vec<u8>)> {
    match security {
        SecuritySession::None => Ok((SecurityHeaderFlags::empty(), payload.to_vec())),

        SecuritySession::Tls {
            security_header_expected,
        } => {
            if *security_header_expected {
                let mut cursor = ReadCursor::new(payload);
                let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut cursor)
                    .map_err(|e| SessionError::new("securityHeader", SessionErrorKind::MalformedPdu).with_source(e))?;
                Ok((header.flags, cursor.read_remaining().to_vec()))
            } else {
                Ok((SecurityHeaderFlags::empty(), payload.to_vec()))
            }
        }

        SecuritySession::Legacy { encryption } => {
            let mut cursor = ReadCursor::new(payload);
            let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut cursor)
                .map_err(|e| SessionError::new("securityHeader", SessionErrorKind::MalformedPdu).with_source(e))?;

            if header.flags.contains(SecurityHeaderFlags::ENCRYPT) {
                if cursor.len() < MAC_SIGNATURE_SIZE {
                    return Err(SessionError::new("securityHeader", SessionErrorKind::MalformedPdu));
                }

                let mut signature = [0u8; MAC_SIGNATURE_SIZE];
                signature.copy_from_slice(cursor.read_slice(MAC_SIGNATURE_SIZE));

                let plaintext = encryption
                    .decrypt_verify(&signature, cursor.read_remaining())
                    .map_err(|e| SessionError::new("decrypt", SessionErrorKind::BadSignature).with_source(e))?;

                Ok((header.flags, plaintext))
            } else {
                Ok((header.flags, cursor.read_remaining().to_vec()))
            }
        }
    }
}

/// Applies the outbound side's security envelope to a slow-path plaintext.
pub(crate) fn protect_slow_path(security: &mut SecuritySession, plaintext: &[u8]) -> SessionResult<Vec<u8>> {
    match security {
        SecuritySession::None => Ok(plaintext.to_vec()),

        SecuritySession::Tls {
            security_header_expected,
        } => {
            if *security_header_expected {
                let mut data = encode_vec(&SecurityHeader {
                    flags: SecurityHeaderFlags::empty(),
                })
                .map_err(|_| session_general_err("encode security header"))?;
                data.extend_from_slice(plaintext);
                Ok(data)
            } else {
                Ok(plaintext.to_vec())
            }
        }

        SecuritySession::Legacy { encryption } => {
            let mut data = encode_vec(&SecurityHeader {
                flags: SecurityHeaderFlags::ENCRYPT,
            })
            .map_err(|_| session_general_err("encode security header"))?;

            let (signature, ciphertext) = encryption.encrypt(plaintext);
            data.extend_from_slice(&signature);
            data.extend_from_slice(&ciphertext);
            Ok(data)
        }
    }
}

/// Removes the security envelope of a fast-path body.
pub(crate) fn unprotect_fast_path(
    security: &mut SecuritySession,
    flags: EncryptionFlags,
    body: &[u8],
) -> SessionResult<Vec<u8>> {
    match security {
        SecuritySession::Legacy { encryption } if flags.contains(EncryptionFlags::ENCRYPTED) => {
            if body.len() < MAC_SIGNATURE_SIZE {
                return Err(SessionError::new("fastPath", SessionErrorKind::MalformedPdu));
            }

            let mut signature = [0u8; MAC_SIGNATURE_SIZE];
            signature.copy_from_slice(&body[..MAC_SIGNATURE_SIZE]);

            encryption
                .decrypt_verify(&signature, &body[MAC_SIGNATURE_SIZE..])
                .map_err(|e| SessionError::new("fastPath", SessionErrorKind::BadSignature).with_source(e))
        }
        // TLS and plain modes carry the body as-is; no MAC, no header.
        _ => Ok(body.to_vec()),
    }
}

/// Applies the outbound side's security envelope to a fast-path plaintext.
pub(crate) fn protect_fast_path(
    security: &mut SecuritySession,
    plaintext: &[u8],
) -> (EncryptionFlags, Vec<u8>) {
    match security {
        SecuritySession::Legacy { encryption } => {
            let (signature, ciphertext) = encryption.encrypt(plaintext);
            let mut body = Vec::with_capacity(MAC_SIGNATURE_SIZE + ciphertext.len());
            body.extend_from_slice(&signature);
            body.extend_from_slice(&ciphertext);
            (EncryptionFlags::ENCRYPTED, body)
        }
        _ => (EncryptionFlags::empty(), plaintext.to_vec()),
    }
}
