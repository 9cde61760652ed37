#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod fast_path;
pub mod gcc;
pub mod mcs;
pub mod nego;
pub mod rdp;
pub mod tpdu;
pub mod tpkt;
pub mod x224;

pub(crate) mod ber;
pub(crate) mod per;

use spyglass_core::{unexpected_message_type_err, DecodeResult, EncodeResult, ReadCursor};

/// What the first byte of a frame says it is: a TPKT-framed X.224 packet or
/// a fast-path packet. Anything else is an unknown header and kills the
/// session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    FastPath = 0x00,
    X224 = 0x03,
}

impl Action {
    pub fn from_fp_header_byte(fp_header_byte: u8) -> Result<Self, u8> {
        match fp_header_byte & 0b11 {
            0x00 => Ok(Self::FastPath),
            0x03 => Ok(Self::X224),
            _ => Err(fp_header_byte),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduInfo {
    pub action: Action,
    pub length: usize,
}

/// Finds the next frame size by inspecting the first few bytes.
///
/// Returns `Ok(None)` when more bytes are needed, and an error when the
/// first byte is neither a TPKT version byte nor a fast-path header.
pub fn find_size(bytes: &[u8]) -> DecodeResult<Option<PduInfo>> {
    macro_rules! ensure_enough {
        ($bytes:expr, $len:expr) => {
            if $bytes.len() < $len {
                return Ok(None);
            }
        };
    }

    ensure_enough!(bytes, 1);
    let fp_header_byte = bytes[0];

    let action = Action::from_fp_header_byte(fp_header_byte)
        .map_err(|unknown| unexpected_message_type_err!("fpHeaderByte", unknown))?;

    match action {
        Action::X224 => {
            ensure_enough!(bytes, tpkt::TpktHeader::SIZE);
            let tpkt = tpkt::TpktHeader::read(&mut ReadCursor::new(bytes))?;

            Ok(Some(PduInfo {
                action,
                length: tpkt.packet_length(),
            }))
        }
        Action::FastPath => {
            ensure_enough!(bytes, 2);
            let a = bytes[1];

            let fast_path_length = if a & 0x80 != 0 {
                ensure_enough!(bytes, 3);
                let b = bytes[2];

                ((u16::from(a) & !0x80) << 8) + u16::from(b)
            } else {
                u16::from(a)
            };

            Ok(Some(PduInfo {
                action,
                length: usize::from(fast_path_length),
            }))
        }
    }
}

/// A hint the transport uses to frame the next expected PDU.
pub trait PduHint: Send + Sync + core::fmt::Debug + 'static {
    /// Finds the next PDU size by reading the next few bytes.
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>>;
}

/// Matches both X.224 and fast-path frames.
#[derive(Clone, Copy, Debug)]
pub struct RdpHint;

pub const RDP_HINT: RdpHint = RdpHint;

impl PduHint for RdpHint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        find_size(bytes).map(|opt| opt.map(|info| info.length))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct X224Hint;

pub const X224_HINT: X224Hint = X224Hint;

impl PduHint for X224Hint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        match find_size(bytes)? {
            Some(pdu_info) => {
                debug_assert_eq!(pdu_info.action, Action::X224);
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FastPathHint;

pub const FAST_PATH_HINT: FastPathHint = FastPathHint;

impl PduHint for FastPathHint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        match find_size(bytes)? {
            Some(pdu_info) => {
                debug_assert_eq!(pdu_info.action, Action::FastPath);
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

/// Encodes `pdu` and wraps it into an X.224 Data TPDU.
pub fn encode_x224_packet<T>(pdu: &T, buf: &mut spyglass_core::WriteBuf) -> EncodeResult<usize>
where
    T: spyglass_core::Encode,
{
    let payload = spyglass_core::encode_vec(pdu)?;

    let x224_pdu = x224::X224Data {
        data: std::borrow::Cow::Owned(payload),
    };

    spyglass_core::encode_buf(&x224::X224(x224_pdu), buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_size_tpkt() {
        let info = find_size(&[0x03, 0x00, 0x00, 0x13]).unwrap().unwrap();
        assert_eq!(info.action, Action::X224);
        assert_eq!(info.length, 0x13);
    }

    #[test]
    fn find_size_fast_path_short() {
        let info = find_size(&[0x00, 0x08]).unwrap().unwrap();
        assert_eq!(info.action, Action::FastPath);
        assert_eq!(info.length, 8);
    }

    #[test]
    fn find_size_fast_path_long() {
        let info = find_size(&[0x00, 0x81, 0x23]).unwrap().unwrap();
        assert_eq!(info.action, Action::FastPath);
        assert_eq!(info.length, 0x123);
    }

    #[test]
    fn find_size_needs_more_bytes() {
        assert!(find_size(&[0x03, 0x00]).unwrap().is_none());
    }

    #[test]
    fn find_size_rejects_unknown_header() {
        // 0x55 is neither a TPKT version byte nor a fast-path action
        assert!(find_size(&[0x55, 0x00, 0x00, 0x08]).is_err());
    }
}
