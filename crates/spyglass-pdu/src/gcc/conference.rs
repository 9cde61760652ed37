//! PER-encoded T.124 ConferenceCreate wrappers around the settings blocks.

use spyglass_core::{
    cast_length, ensure_size, invalid_field_err, other_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor,
    WriteCursor,
};

use super::{ClientBlocks, ServerBlocks};
use crate::{mcs, per};

const CONFERENCE_REQUEST_OBJECT_ID: [u8; 6] = [0, 0, 20, 124, 0, 1];
const H221_CS_KEY: &[u8; 4] = b"Duca";
const H221_SC_KEY: &[u8; 4] = b"McDn";
const CONFERENCE_REQUEST_U16_MIN: u16 = 1001;

const CONFERENCE_REQUEST_CONNECT_PDU_SIZE: usize = 12;
const CONFERENCE_RESPONSE_CONNECT_PDU_SIZE: usize = 13;
const OBJECT_IDENTIFIER_KEY: u8 = 0;
const CONFERENCE_REQUEST_CHOICE: u8 = 0;
const CONFERENCE_RESPONSE_CHOICE: u8 = 0x14;
const CONFERENCE_REQUEST_USER_DATA_SELECTION: u8 = 8;
const USER_DATA_NUMBER_OF_SETS: u8 = 1;
const USER_DATA_H221_NON_STANDARD_CHOICE: u8 = 0xC0;
const CONFERENCE_RESPONSE_TAG: u32 = 1;
const CONFERENCE_RESPONSE_RESULT: u8 = 0;
const H221_NON_STANDARD_MIN_LENGTH: usize = 4;
const CONFERENCE_NAME: &[u8] = b"1";

/// GCC Conference Create Request holding the client settings blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateRequest {
    pub gcc_blocks: ClientBlocks,
}

impl ConferenceCreateRequest {
    const NAME: &'static str = "ConferenceCreateRequest";
}

impl Encode for ConferenceCreateRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let gcc_blocks_buffer_length = self.gcc_blocks.size();

        // ConnectData::Key: select type OBJECT_IDENTIFIER
        per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
        per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

        // ConnectData::connectPDU: length
        per::write_length(
            dst,
            cast_length!(
                "gccBlocksLen",
                gcc_blocks_buffer_length + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
            )?,
        );
        // ConnectGCCPDU (CHOICE): select conferenceCreateRequest
        per::write_choice(dst, CONFERENCE_REQUEST_CHOICE);
        // ConferenceCreateRequest::Selection: select optional userData
        per::write_selection(dst, CONFERENCE_REQUEST_USER_DATA_SELECTION);
        per::write_numeric_string(dst, CONFERENCE_NAME, 1).map_err(|e| other_err!("confName", source: e))?;
        per::write_padding(dst, 1);
        // UserData (SET OF SEQUENCE), one set
        per::write_number_of_sets(dst, USER_DATA_NUMBER_OF_SETS);
        // select h221NonStandard
        per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
        // client-to-server H.221 key
        per::write_octet_string(dst, H221_CS_KEY, H221_NON_STANDARD_MIN_LENGTH)
            .map_err(|e| other_err!("h221Key", source: e))?;
        per::write_length(dst, cast_length!("gccBlocksLen", gcc_blocks_buffer_length)?);
        self.gcc_blocks.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let gcc_blocks_buffer_length = self.gcc_blocks.size();
        let connect_pdu_length = CONFERENCE_REQUEST_CONNECT_PDU_SIZE + gcc_blocks_buffer_length;

        per::CHOICE_SIZE
            + CONFERENCE_REQUEST_OBJECT_ID.len()
            + per::sizeof_length(connect_pdu_length as u16)
            + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
            + per::sizeof_length(gcc_blocks_buffer_length as u16)
            + gcc_blocks_buffer_length
    }
}

impl<'de> Decode<'de> for ConferenceCreateRequest {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        // ConnectData::Key: select object (0) of type OBJECT_IDENTIFIER
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != OBJECT_IDENTIFIER_KEY {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected key"));
        }
        if per::read_object_id(src).map_err(|e| other_err!("objectId", source: e))? != CONFERENCE_REQUEST_OBJECT_ID {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected key value"));
        }

        let _length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != CONFERENCE_REQUEST_CHOICE {
            return Err(invalid_field_err!(
                "ConnectData::connectPdu",
                "expected ConferenceCreateRequest choice"
            ));
        }

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_selection(src) != CONFERENCE_REQUEST_USER_DATA_SELECTION {
            return Err(invalid_field_err!("Selection", "expected userData selection"));
        }

        per::read_numeric_string(src, 1).map_err(|e| other_err!("confName", source: e))?;
        per::read_padding(src, 1);

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_number_of_sets(src) != USER_DATA_NUMBER_OF_SETS {
            return Err(invalid_field_err!("numberOfSets", "expected exactly one set"));
        }

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != USER_DATA_H221_NON_STANDARD_CHOICE {
            return Err(invalid_field_err!("userData", "expected h221NonStandard choice"));
        }

        if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(|e| other_err!("h221Key", source: e))?
            != H221_CS_KEY
        {
            return Err(invalid_field_err!("h221Key", "invalid client-to-server key"));
        }

        let _gcc_blocks_buffer_length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        let gcc_blocks = ClientBlocks::decode(src)?;

        Ok(Self { gcc_blocks })
    }
}

/// GCC Conference Create Response holding the server settings blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConferenceCreateResponse {
    pub user_id: u16,
    pub gcc_blocks: ServerBlocks,
}

impl ConferenceCreateResponse {
    const NAME: &'static str = "ConferenceCreateResponse";
}

impl Encode for ConferenceCreateResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let gcc_blocks_buffer_length = self.gcc_blocks.size();

        per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
        per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

        // connectPDU length must be ignored by the client
        per::write_length(
            dst,
            cast_length!(
                "gccBlocksLen",
                gcc_blocks_buffer_length + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE + 1
            )?,
        );
        // ConnectGCCPDU (CHOICE): select conferenceCreateResponse
        per::write_choice(dst, CONFERENCE_RESPONSE_CHOICE);
        // ConferenceCreateResponse::nodeID (UserID)
        per::write_u16(dst, self.user_id, CONFERENCE_REQUEST_U16_MIN).map_err(|e| other_err!("userId", source: e))?;
        // ConferenceCreateResponse::tag (INTEGER)
        per::write_u32(dst, CONFERENCE_RESPONSE_TAG);
        // ConferenceCreateResponse::result (ENUMERATED)
        per::write_enum(dst, CONFERENCE_RESPONSE_RESULT);
        per::write_number_of_sets(dst, USER_DATA_NUMBER_OF_SETS);
        per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
        // server-to-client H.221 key
        per::write_octet_string(dst, H221_SC_KEY, H221_NON_STANDARD_MIN_LENGTH)
            .map_err(|e| other_err!("h221Key", source: e))?;
        per::write_length(dst, cast_length!("gccBlocksLen", gcc_blocks_buffer_length)?);
        self.gcc_blocks.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let gcc_blocks_buffer_length = self.gcc_blocks.size();
        let connect_pdu_length = CONFERENCE_RESPONSE_CONNECT_PDU_SIZE + gcc_blocks_buffer_length;

        per::CHOICE_SIZE
            + CONFERENCE_REQUEST_OBJECT_ID.len()
            + per::sizeof_length(connect_pdu_length as u16)
            + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE
            + per::sizeof_length(gcc_blocks_buffer_length as u16)
            + gcc_blocks_buffer_length
    }
}

impl<'de> Decode<'de> for ConferenceCreateResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != OBJECT_IDENTIFIER_KEY {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected key"));
        }
        if per::read_object_id(src).map_err(|e| other_err!("objectId", source: e))? != CONFERENCE_REQUEST_OBJECT_ID {
            return Err(invalid_field_err!("ConnectData::Key", "unexpected key value"));
        }

        let _length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != CONFERENCE_RESPONSE_CHOICE {
            return Err(invalid_field_err!(
                "ConnectData::connectPdu",
                "expected ConferenceCreateResponse choice"
            ));
        }

        let user_id =
            per::read_u16(src, CONFERENCE_REQUEST_U16_MIN).map_err(|e| other_err!("userId", source: e))?;

        if per::read_u32(src).map_err(|e| other_err!("tag", source: e))? != CONFERENCE_RESPONSE_TAG {
            return Err(invalid_field_err!("tag", "unexpected tag"));
        }

        if per::read_enum(src, mcs::RESULT_ENUM_LENGTH).map_err(|e| other_err!("result", source: e))?
            != CONFERENCE_RESPONSE_RESULT
        {
            return Err(invalid_field_err!("result", "conference create failed"));
        }

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_number_of_sets(src) != USER_DATA_NUMBER_OF_SETS {
            return Err(invalid_field_err!("numberOfSets", "expected exactly one set"));
        }

        ensure_size!(in: src, size: per::CHOICE_SIZE);
        if per::read_choice(src) != USER_DATA_H221_NON_STANDARD_CHOICE {
            return Err(invalid_field_err!("userData", "expected h221NonStandard choice"));
        }

        if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(|e| other_err!("h221Key", source: e))?
            != H221_SC_KEY
        {
            return Err(invalid_field_err!("h221Key", "invalid server-to-client key"));
        }

        let _gcc_blocks_buffer_length = per::read_length(src).map_err(|e| other_err!("len", source: e))?;
        let gcc_blocks = ServerBlocks::decode(src)?;

        Ok(Self { user_id, gcc_blocks })
    }
}
