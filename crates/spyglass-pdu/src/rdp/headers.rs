use bitflags::bitflags;
use spyglass_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

pub const BASIC_SECURITY_HEADER_SIZE: usize = 4;

bitflags! {
    /// Security header flags (TS_SECURITY_HEADER::flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SecurityHeaderFlags: u16 {
        const EXCHANGE_PKT = 0x0001;
        const TRANSPORT_REQ = 0x0002;
        const TRANSPORT_RSP = 0x0004;
        const ENCRYPT = 0x0008;
        const RESET_SEQNO = 0x0010;
        const IGNORE_SEQNO = 0x0020;
        const INFO_PKT = 0x0040;
        const LICENSE_PKT = 0x0080;
        const LICENSE_ENCRYPT_CS = 0x0200;
        const REDIRECTION_PKT = 0x0400;
        const SECURE_CHECKSUM = 0x0800;
        const AUTODETECT_REQ = 0x1000;
        const AUTODETECT_RSP = 0x2000;
        const HEARTBEAT = 0x4000;
        const FLAGSHI_VALID = 0x8000;
    }
}

impl SecurityHeaderFlags {
    /// MS-RDPBCGR names both `SEC_LICENSE_ENCRYPT_CS` and
    /// `SEC_LICENSE_ENCRYPT_SC` for the 0x0200 bit. The second name is kept
    /// as an alias of the same value.
    pub const LICENSE_ENCRYPT_SC: Self = Self::LICENSE_ENCRYPT_CS;
}

/// Basic security header: `flags` and the unused `flagsHi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeader {
    pub flags: SecurityHeaderFlags,
}

impl SecurityHeader {
    const NAME: &'static str = "SecurityHeader";

    pub const FIXED_PART_SIZE: usize = BASIC_SECURITY_HEADER_SIZE;
}

impl Encode for SecurityHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.flags.bits());
        dst.write_u16(0); // flagsHi
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for SecurityHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = SecurityHeaderFlags::from_bits(src.read_u16())
            .ok_or_else(|| invalid_field_err!("flags", "invalid security header flags"))?;
        let _flags_hi = src.read_u16(); // unused

        Ok(Self { flags })
    }
}

/// Client Security Exchange PDU (TS_SECURITY_PACKET): the client random
/// encrypted with the server public key, padded with 8 zero bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityExchangePdu {
    pub encrypted_client_random: Vec<u8>,
}

impl SecurityExchangePdu {
    const NAME: &'static str = "SecurityExchangePdu";

    const FIXED_PART_SIZE: usize = 4 /* length */;
    const PADDING_SIZE: usize = 8;
}

impl Encode for SecurityExchangePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(cast_length!(
            "length",
            self.encrypted_client_random.len() + Self::PADDING_SIZE
        )?);
        dst.write_slice(&self.encrypted_client_random);
        write_padding!(dst, Self::PADDING_SIZE);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.encrypted_client_random.len() + Self::PADDING_SIZE
    }
}

impl<'de> Decode<'de> for SecurityExchangePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let length: usize = cast_length!("length", src.read_u32())?;

        if length < Self::PADDING_SIZE {
            return Err(invalid_field_err!("length", "shorter than its padding"));
        }

        ensure_size!(in: src, size: length);
        let encrypted_client_random = src.read_slice(length - Self::PADDING_SIZE).into();
        read_padding!(src, Self::PADDING_SIZE);

        Ok(Self {
            encrypted_client_random,
        })
    }
}

const SHARE_CONTROL_HEADER_MASK: u16 = 0xF;
const PROTOCOL_VERSION: u16 = 0x10;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShareControlPduType(u8);

impl ShareControlPduType {
    pub const DEMAND_ACTIVE: Self = Self(0x1);
    pub const CONFIRM_ACTIVE: Self = Self(0x3);
    pub const DEACTIVATE_ALL: Self = Self(0x6);
    pub const DATA: Self = Self(0x7);
    pub const SERVER_REDIRECT: Self = Self(0xA);

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for ShareControlPduType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Share Control Header (TS_SHARECONTROLHEADER) with the payload left opaque.
///
/// The relay only needs the PDU type for classification; capability sets and
/// the rest of the activation payloads cross the proxy untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareControlHeader {
    pub pdu_type: ShareControlPduType,
    pub pdu_source: u16,
    pub share_id: u32,
    pub payload: Vec<u8>,
}

impl ShareControlHeader {
    const NAME: &'static str = "ShareControlHeader";

    const FIXED_PART_SIZE: usize = 2 /* totalLength */ + 2 /* pduType */ + 2 /* pduSource */ + 4 /* shareId */;
}

impl Encode for ShareControlHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(cast_length!("totalLength", self.size())?);
        dst.write_u16(PROTOCOL_VERSION | u16::from(self.pdu_type.as_u8()));
        dst.write_u16(self.pdu_source);
        dst.write_u32(self.share_id);
        dst.write_slice(&self.payload);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.payload.len()
    }
}

impl<'de> Decode<'de> for ShareControlHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let total_length: usize = cast_length!("totalLength", src.read_u16())?;
        let pdu_type_with_version = src.read_u16();
        let pdu_source = src.read_u16();
        let share_id = src.read_u32();

        let pdu_type = ShareControlPduType::from((pdu_type_with_version & SHARE_CONTROL_HEADER_MASK) as u8);

        if total_length < Self::FIXED_PART_SIZE {
            return Err(invalid_field_err!("totalLength", "shorter than the header"));
        }

        let payload_length = total_length - Self::FIXED_PART_SIZE;
        ensure_size!(in: src, size: payload_length);
        let payload = src.read_slice(payload_length).into();

        Ok(Self {
            pdu_type,
            pdu_source,
            share_id,
            payload,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShareDataPduType(u8);

impl ShareDataPduType {
    pub const UPDATE: Self = Self(0x02);
    pub const CONTROL: Self = Self(0x14);
    pub const POINTER: Self = Self(0x1B);
    pub const INPUT: Self = Self(0x1C);
    pub const SYNCHRONIZE: Self = Self(0x1F);
    pub const SUPPRESS_OUTPUT: Self = Self(0x23);
    pub const SHUTDOWN_REQUEST: Self = Self(0x24);
    pub const SHUTDOWN_DENIED: Self = Self(0x25);
    pub const SAVE_SESSION_INFO: Self = Self(0x26);
    pub const FONT_LIST: Self = Self(0x27);
    pub const FONT_MAP: Self = Self(0x28);
    pub const SET_ERROR_INFO: Self = Self(0x2F);

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for ShareDataPduType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Share Data Header (TS_SHAREDATAHEADER), payload opaque past the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDataHeader {
    pub stream_id: u8,
    pub pdu_type: ShareDataPduType,
    pub compression_flags: u8,
    pub payload: Vec<u8>,
}

impl ShareDataHeader {
    const NAME: &'static str = "ShareDataHeader";

    const FIXED_PART_SIZE: usize = 1 /* pad */ + 1 /* streamId */ + 2 /* uncompressedLength */
        + 1 /* pduType2 */ + 1 /* compressedType */ + 2 /* compressedLength */;
}

impl Encode for ShareDataHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_padding!(dst, 1);
        dst.write_u8(self.stream_id);
        dst.write_u16(cast_length!("uncompressedLength", self.payload.len() + 4)?);
        dst.write_u8(self.pdu_type.as_u8());
        dst.write_u8(self.compression_flags);
        dst.write_u16(0); // compressedLength
        dst.write_slice(&self.payload);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.payload.len()
    }
}

impl<'de> Decode<'de> for ShareDataHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        read_padding!(src, 1);
        let stream_id = src.read_u8();
        let _uncompressed_length = src.read_u16();
        let pdu_type = ShareDataPduType::from(src.read_u8());
        let compression_flags = src.read_u8();
        let _compressed_length = src.read_u16();
        let payload = src.read_remaining().into();

        Ok(Self {
            stream_id,
            pdu_type,
            compression_flags,
            payload,
        })
    }
}
