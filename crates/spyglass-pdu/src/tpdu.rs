use spyglass_core::{
    ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, unexpected_message_type_err, ReadCursor,
    WriteCursor,
};

use crate::tpkt::TpktHeader;
use crate::{DecodeResult, EncodeResult};

/// TPDU type exchanged during X.224 messages (class 0 only).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TpduCode(u8);

impl TpduCode {
    pub const CONNECTION_REQUEST: Self = Self(0xE0);
    pub const CONNECTION_CONFIRM: Self = Self(0xD0);
    pub const DISCONNECT_REQUEST: Self = Self(0x80);
    pub const DATA: Self = Self(0xF0);
    pub const ERROR: Self = Self(0x70);

    pub fn header_fixed_part_size(self) -> usize {
        if self == TpduCode::DATA {
            TpduHeader::DATA_FIXED_PART_SIZE
        } else {
            TpduHeader::NOT_DATA_FIXED_PART_SIZE
        }
    }

    pub fn check_expected(self, expected: TpduCode) -> DecodeResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(unexpected_message_type_err!(TpduHeader::NAME, self.0))
        }
    }
}

impl From<u8> for TpduCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<TpduCode> for u8 {
    fn from(value: TpduCode) -> Self {
        value.0
    }
}

/// X.224 TPDU header following a TPKT header.
///
/// The length indicator (LI) covers the header including parameters but
/// excluding the LI field itself and the user data. Data TPDUs have a 3-byte
/// fixed part (LI, code, EOT); the connection management TPDUs carry
/// DST-REF, SRC-REF and the class octet for 7 bytes total.
#[derive(Debug, PartialEq, Eq)]
pub struct TpduHeader {
    pub li: u8,
    pub code: TpduCode,
}

impl TpduHeader {
    pub const DATA_FIXED_PART_SIZE: usize = 3;
    pub const NOT_DATA_FIXED_PART_SIZE: usize = 7;

    pub const NAME: &'static str = "TpduHeader";

    const FIXED_PART_SIZE: usize = Self::DATA_FIXED_PART_SIZE;

    pub fn read(src: &mut ReadCursor<'_>, tpkt: &TpktHeader) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let li = src.read_u8();
        let code = TpduCode::from(src.read_u8());

        if usize::from(li) + 1 + TpktHeader::SIZE > tpkt.packet_length() {
            return Err(invalid_field_err!("li", "TPDU length greater than TPKT length"));
        }

        // 255 is reserved for possible extensions
        if li == 0b1111_1111 {
            return Err(invalid_field_err!("li", "unsupported X.224 extension"));
        }

        if code == TpduCode::DATA {
            read_padding!(src, 1); // EOT
        } else {
            ensure_size!(in: src, size: 5);
            read_padding!(src, 5); // DST-REF, SRC-REF, class 0
        }

        Ok(Self { li, code })
    }

    pub fn write(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        const EOT_BYTE: u8 = 0x80;

        ensure_fixed_part_size!(in: dst);

        dst.write_u8(self.li);
        dst.write_u8(u8::from(self.code));

        if self.code == TpduCode::DATA {
            dst.write_u8(EOT_BYTE);
        } else {
            ensure_size!(in: dst, size: 5);
            dst.write_u16(0); // DST-REF
            dst.write_u16(0); // SRC-REF
            dst.write_u8(0); // class 0
        }

        Ok(())
    }

    /// Fixed part of the TPDU header.
    pub fn fixed_part_size(&self) -> usize {
        self.code.header_fixed_part_size()
    }

    /// Variable part of the TPDU header.
    pub fn variable_part_size(&self) -> usize {
        self.size() - self.fixed_part_size()
    }

    /// Size of the whole TPDU header, including the LI field and variable part.
    pub fn size(&self) -> usize {
        usize::from(self.li) + 1
    }
}
