//! Fast-path framing (TS_FP_INPUT_PDU / TS_FP_UPDATE_PDU headers).
//!
//! The first byte packs the action (bits 0..2), a PDU-specific middle field
//! (number of input events or reserved bits, 2..6) and the encryption flags
//! (6..8); the overall length follows in one or two bytes. The middle bits
//! are carried verbatim so a relayed frame keeps its meaning.

use bitflags::bitflags;
use spyglass_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

use crate::per;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EncryptionFlags: u8 {
        const SECURE_CHECKSUM = 0x01;
        const ENCRYPTED = 0x02;
    }
}

/// Fast-path frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathHeader {
    pub flags: EncryptionFlags,
    /// Bits 2..6 of the first byte: `numEvents` on the input path, reserved
    /// on the output path.
    pub middle_bits: u8,
    pub data_length: usize,
    forced_long_length: bool,
}

impl FastPathHeader {
    const NAME: &'static str = "FastPathHeader";

    const FIXED_PART_SIZE: usize = 1;

    pub fn new(flags: EncryptionFlags, middle_bits: u8, data_length: usize) -> Self {
        Self {
            flags,
            middle_bits,
            data_length,
            forced_long_length: false,
        }
    }

    fn minimal_size(&self) -> usize {
        let total = self.data_length + Self::FIXED_PART_SIZE + 1;
        Self::FIXED_PART_SIZE + per::sizeof_length(total as u16)
    }
}

impl Encode for FastPathHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let mut header = 0u8;
        header |= (self.middle_bits & 0x0F) << 2;
        header |= self.flags.bits() << 6;
        dst.write_u8(header);

        let length = cast_length!("length", self.data_length + self.size())?;

        if self.forced_long_length {
            // Keep the same layout for the header as received.
            per::write_long_length(dst, length);
        } else {
            per::write_length(dst, length);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        if self.forced_long_length {
            Self::FIXED_PART_SIZE + per::U16_SIZE
        } else {
            self.minimal_size()
        }
    }
}

impl<'de> Decode<'de> for FastPathHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let header = src.read_u8();
        let flags = EncryptionFlags::from_bits_truncate(header >> 6);
        let middle_bits = (header >> 2) & 0x0F;

        let (length, sizeof_length) = per::read_length(src)
            .map_err(|e| spyglass_core::invalid_field_err_with_source(Self::NAME, "length", "PER", e))?;
        let length = usize::from(length);

        if length < sizeof_length + Self::FIXED_PART_SIZE {
            return Err(invalid_field_err!("length", "fast-path frame length smaller than header"));
        }

        let data_length = length - sizeof_length - Self::FIXED_PART_SIZE;
        // Keep track of non-minimal length packing so the frame re-encodes
        // byte-identical.
        let forced_long_length = per::sizeof_length(length as u16) != sizeof_length;

        Ok(FastPathHeader {
            flags,
            middle_bits,
            data_length,
            forced_long_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_core::{decode, encode_vec};

    #[test]
    fn plain_frame_round_trip() {
        let header = FastPathHeader::new(EncryptionFlags::empty(), 2, 10);

        let encoded = encode_vec(&header).unwrap();
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[0], 0b0000_1000); // two events, no flags

        let decoded: FastPathHeader = decode(&encoded).unwrap();
        assert_eq!(decoded.flags, header.flags);
        assert_eq!(decoded.middle_bits, 2);
        assert_eq!(decoded.data_length, 10);
    }

    #[test]
    fn encrypted_frame_keeps_flags() {
        let header = FastPathHeader::new(EncryptionFlags::ENCRYPTED, 0, 200);

        let encoded = encode_vec(&header).unwrap();
        assert_eq!(encoded[0] >> 6, EncryptionFlags::ENCRYPTED.bits());
        // 200 bytes of payload force the two-byte length form
        assert_eq!(encoded.len(), 3);

        let decoded: FastPathHeader = decode(&encoded).unwrap();
        assert!(decoded.flags.contains(EncryptionFlags::ENCRYPTED));
        assert_eq!(decoded.data_length, 200);
    }

    #[test]
    fn long_length_form_is_preserved() {
        // A 5-byte frame encoded with the non-minimal two-byte length.
        let bytes = [0x00, 0x80, 0x05, 0xAA, 0xBB];
        let decoded: FastPathHeader = decode(&bytes).unwrap();
        assert_eq!(decoded.data_length, 2);

        let encoded = encode_vec(&decoded).unwrap();
        assert_eq!(encoded, [0x00, 0x80, 0x05]);
    }
}
