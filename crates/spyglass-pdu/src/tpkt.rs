use spyglass_core::{ensure_fixed_part_size, read_padding, unsupported_version_err, ReadCursor, WriteCursor};

use crate::{DecodeResult, EncodeResult};

/// TPKT header (RFC 1006), the length-framed envelope in front of every
/// X.224 TPDU.
///
/// A TPKT header is of fixed length 4 and carries the length of the entire
/// packet, header included, as a big-endian 16-bit integer. The first byte is
/// the protocol version and is always 3, which is also how the segmentation
/// layer tells TPKT frames apart from fast-path ones.
#[derive(PartialEq, Eq, Debug)]
pub struct TpktHeader {
    /// Length of the entire packet in octets, including the header.
    pub packet_length: u16,
}

impl TpktHeader {
    pub const VERSION: u8 = 3;

    pub const SIZE: usize = 4;

    pub const NAME: &'static str = "TpktHeader";

    const FIXED_PART_SIZE: usize = Self::SIZE;

    pub fn read(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u8();

        if version != Self::VERSION {
            return Err(unsupported_version_err!("TPKT version", version));
        }

        read_padding!(src, 1);

        let packet_length = src.read_u16_be();

        Ok(Self { packet_length })
    }

    pub fn write(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(Self::VERSION);
        dst.write_u8(0); // reserved
        dst.write_u16_be(self.packet_length);

        Ok(())
    }

    pub fn packet_length(&self) -> usize {
        usize::from(self.packet_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = TpktHeader { packet_length: 19 };

        let mut buf = [0u8; TpktHeader::SIZE];
        header.write(&mut WriteCursor::new(&mut buf)).unwrap();
        assert_eq!(buf, [0x03, 0x00, 0x00, 0x13]);

        let decoded = TpktHeader::read(&mut ReadCursor::new(&buf)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_wrong_version() {
        let buf = [0x55, 0x00, 0x00, 0x08];
        assert!(TpktHeader::read(&mut ReadCursor::new(&buf)).is_err());
    }
}
