use std::borrow::Cow;

use spyglass_core::{
    cast_length, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::tpdu::{TpduCode, TpduHeader};
use crate::tpkt::TpktHeader;

/// A PDU carried inside a TPKT + X.224 envelope.
pub trait X224Pdu<'de>: Sized {
    const X224_NAME: &'static str;

    const TPDU_CODE: TpduCode;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self>;

    fn tpdu_header_variable_part_size(&self) -> usize;

    fn tpdu_user_data_size(&self) -> usize;
}

/// Wrapper adding the TPKT + TPDU headers around an [`X224Pdu`].
pub struct X224<T>(pub T);

impl<'de, T> Encode for X224<T>
where
    T: X224Pdu<'de>,
{
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        let packet_length = self.size();

        ensure_size!(ctx: T::X224_NAME, in: dst, size: packet_length);

        TpktHeader {
            packet_length: cast_length!(T::X224_NAME, "packetLength", packet_length)?,
        }
        .write(dst)?;

        TpduHeader {
            li: cast_length!(
                T::X224_NAME,
                "li",
                T::TPDU_CODE.header_fixed_part_size() + self.0.tpdu_header_variable_part_size() - 1
            )?,
            code: T::TPDU_CODE,
        }
        .write(dst)?;

        self.0.x224_body_encode(dst)
    }

    fn name(&self) -> &'static str {
        T::X224_NAME
    }

    fn size(&self) -> usize {
        TpktHeader::SIZE
            + T::TPDU_CODE.header_fixed_part_size()
            + self.0.tpdu_header_variable_part_size()
            + self.0.tpdu_user_data_size()
    }
}

impl<'de, T> Decode<'de> for X224<T>
where
    T: X224Pdu<'de>,
{
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let tpkt = TpktHeader::read(src)?;

        ensure_size!(ctx: T::X224_NAME, in: src, size: tpkt.packet_length().saturating_sub(TpktHeader::SIZE));

        let tpdu = TpduHeader::read(src, &tpkt)?;
        tpdu.code.check_expected(T::TPDU_CODE)?;

        if tpdu.size() < tpdu.fixed_part_size() {
            return Err(invalid_field_err!(
                TpduHeader::NAME,
                "li",
                "fixed part bigger than total header size"
            ));
        }

        T::x224_body_decode(src, &tpkt, &tpdu).map(X224)
    }
}

/// Transparent X.224 Data TPDU.
pub struct X224Data<'a> {
    pub data: Cow<'a, [u8]>,
}

impl X224Data<'_> {
    pub fn into_owned(self) -> X224Data<'static> {
        X224Data {
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

impl<'de> X224Pdu<'de> for X224Data<'de> {
    const X224_NAME: &'static str = "X.224 Data";

    const TPDU_CODE: TpduCode = TpduCode::DATA;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::X224_NAME, in: dst, size: self.data.len());
        dst.write_slice(&self.data);

        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let user_data_size = user_data_size(tpkt, tpdu);

        ensure_size!(ctx: Self::X224_NAME, in: src, size: user_data_size);
        let data = src.read_slice(user_data_size);

        Ok(Self {
            data: Cow::Borrowed(data),
        })
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        self.data.len()
    }
}

/// X.224 Disconnect Request TPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRequest {
    /// Reason code as defined in section 13.4.3 of X.224. Class 0 only
    /// allows "not specified" (0) and "congestion" (4).
    pub reason: u8,
}

impl<'de> X224Pdu<'de> for DisconnectRequest {
    const X224_NAME: &'static str = "X.224 Disconnect Request";

    const TPDU_CODE: TpduCode = TpduCode::DISCONNECT_REQUEST;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::X224_NAME, in: dst, size: 1);
        dst.write_u8(self.reason);
        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, _: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        // The reason octet is part of the header variable part.
        let reason = if tpdu.variable_part_size() >= 1 {
            ensure_size!(ctx: Self::X224_NAME, in: src, size: 1);
            src.read_u8()
        } else {
            0
        };

        Ok(Self { reason })
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        1
    }

    fn tpdu_user_data_size(&self) -> usize {
        0
    }
}

pub fn user_data_size(tpkt: &TpktHeader, tpdu: &TpduHeader) -> usize {
    tpkt.packet_length() - TpktHeader::SIZE - tpdu.size()
}
