//! Licensing preamble and the error-alert message used to short-circuit the
//! license exchange with `STATUS_VALID_CLIENT`.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};
use spyglass_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

pub const PREAMBLE_SIZE: usize = 4;

const PROTOCOL_VERSION_MASK: u8 = 0x0F;
const PREAMBLE_VERSION_3: u8 = 3; // RDP 5.0+

const BLOB_TYPE_ERROR: u16 = 0x04;

/// Licensing preamble (LICENSE_PREAMBLE).
///
/// Comes right after the security header on every licensing PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseHeader {
    pub message_type: PreambleType,
    pub flags: u8,
    pub version: u8,
    pub message_size: u16,
}

impl LicenseHeader {
    const NAME: &'static str = "LicenseHeader";

    const FIXED_PART_SIZE: usize = PREAMBLE_SIZE;

    pub fn new(message_type: PreambleType, message_size: u16) -> Self {
        Self {
            message_type,
            flags: 0,
            version: PREAMBLE_VERSION_3,
            message_size,
        }
    }
}

impl Encode for LicenseHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.message_type.to_u8().unwrap_or(0));
        dst.write_u8(self.flags | (self.version & PROTOCOL_VERSION_MASK));
        dst.write_u16(self.message_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for LicenseHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let message_type = PreambleType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("preambleType", "invalid license preamble type"))?;
        let flags_with_version = src.read_u8();
        let message_size = src.read_u16();

        Ok(Self {
            message_type,
            flags: flags_with_version & !PROTOCOL_VERSION_MASK,
            version: flags_with_version & PROTOCOL_VERSION_MASK,
            message_size,
        })
    }
}

/// LICENSE_PREAMBLE message types.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PreambleType {
    LicenseRequest = 0x01,
    PlatformChallenge = 0x02,
    NewLicense = 0x03,
    UpgradeLicense = 0x04,
    LicenseInfo = 0x12,
    NewLicenseRequest = 0x13,
    PlatformChallengeResponse = 0x15,
    ErrorAlert = 0xFF,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LicenseErrorCode {
    InvalidServerCertificate = 0x01,
    NoLicense = 0x02,
    InvalidMac = 0x03,
    InvalidScope = 0x04,
    NoLicenseServer = 0x06,
    StatusValidClient = 0x07,
    InvalidClient = 0x08,
    InvalidProductId = 0x0B,
    InvalidMessageLen = 0x0C,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum LicensingStateTransition {
    TotalAbort = 1,
    NoTransition = 2,
    ResetPhaseToStart = 3,
    ResendLastMessage = 4,
}

/// Licensing Error Message (LICENSE_ERROR_MESSAGE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensingErrorMessage {
    pub error_code: LicenseErrorCode,
    pub state_transition: LicensingStateTransition,
    pub error_info: Vec<u8>,
}

impl LicensingErrorMessage {
    const NAME: &'static str = "LicensingErrorMessage";

    const FIXED_PART_SIZE: usize = 4 /* errorCode */ + 4 /* stateTransition */;
    const BLOB_HEADER_SIZE: usize = 2 /* blobType */ + 2 /* blobLen */;

    /// The message a server sends to tell the client no license exchange is
    /// needed. Real RDP clients continue past licensing on this answer.
    pub fn valid_client() -> Self {
        Self {
            error_code: LicenseErrorCode::StatusValidClient,
            state_transition: LicensingStateTransition::NoTransition,
            error_info: Vec::new(),
        }
    }

    pub fn is_valid_client(&self) -> bool {
        self.error_code == LicenseErrorCode::StatusValidClient
            && self.state_transition == LicensingStateTransition::NoTransition
    }
}

impl Encode for LicensingErrorMessage {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.error_code.to_u32().unwrap_or(0));
        dst.write_u32(self.state_transition.to_u32().unwrap_or(0));

        dst.write_u16(BLOB_TYPE_ERROR);
        dst.write_u16(cast_length!("blobLen", self.error_info.len())?);
        dst.write_slice(&self.error_info);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + Self::BLOB_HEADER_SIZE + self.error_info.len()
    }
}

impl<'de> Decode<'de> for LicensingErrorMessage {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let error_code = LicenseErrorCode::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err!("errorCode", "invalid error code"))?;
        let state_transition = LicensingStateTransition::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err!("stateTransition", "invalid state transition"))?;

        ensure_size!(in: src, size: Self::BLOB_HEADER_SIZE);
        let _blob_type = src.read_u16();
        let blob_len: usize = cast_length!("blobLen", src.read_u16())?;

        ensure_size!(in: src, size: blob_len);
        let error_info = src.read_slice(blob_len).into();

        Ok(Self {
            error_code,
            state_transition,
            error_info,
        })
    }
}

/// A licensing PDU as exchanged on the wire: preamble plus raw body.
///
/// Only the error-alert body is interpreted; anything else stays opaque
/// because the proxy runs its own synthetic exchange on each side and never
/// forwards licensing traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePdu {
    pub header: LicenseHeader,
    pub body: Vec<u8>,
}

impl LicensePdu {
    const NAME: &'static str = "LicensePdu";

    pub fn error_alert(message: &LicensingErrorMessage) -> EncodeResult<Self> {
        let body = spyglass_core::encode_vec(message)?;
        let message_size = cast_length!(Self::NAME, "messageSize", PREAMBLE_SIZE + body.len())?;

        Ok(Self {
            header: LicenseHeader::new(PreambleType::ErrorAlert, message_size),
            body,
        })
    }

    /// Decodes the body as a licensing error message, when it is one.
    pub fn as_error_alert(&self) -> Option<LicensingErrorMessage> {
        if self.header.message_type != PreambleType::ErrorAlert {
            return None;
        }

        spyglass_core::decode(&self.body).ok()
    }
}

impl Encode for LicensePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.header.encode(dst)?;
        dst.write_slice(&self.body);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.header.size() + self.body.len()
    }
}

impl<'de> Decode<'de> for LicensePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let header = LicenseHeader::decode(src)?;
        let body = src.read_remaining().into();

        Ok(Self { header, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_core::{decode, encode_vec};

    #[test]
    fn valid_client_error_round_trip() {
        let pdu = LicensePdu::error_alert(&LicensingErrorMessage::valid_client()).unwrap();

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());
        // preamble + errorCode + stateTransition + empty error blob
        assert_eq!(encoded.len(), 16);

        let decoded: LicensePdu = decode(&encoded).unwrap();
        let message = decoded.as_error_alert().unwrap();
        assert!(message.is_valid_client());
    }
}
