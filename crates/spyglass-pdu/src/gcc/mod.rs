//! GCC (T.124) conference-create payloads and the user-data settings blocks
//! nested inside the MCS Connect PDUs.

use spyglass_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

pub mod conference;

mod core_data;
mod network_data;
mod security_data;

pub use self::conference::{ConferenceCreateRequest, ConferenceCreateResponse};
pub use self::core_data::{ClientCoreData, ServerCoreData, RDP_VERSION_5_PLUS};
pub use self::network_data::{ChannelDef, ChannelName, ChannelOptions, ClientNetworkData, ServerNetworkData};
pub use self::security_data::{ClientSecurityData, EncryptionLevel, EncryptionMethod, ServerSecurityData};

const USER_DATA_HEADER_SIZE: usize = 4;

const CS_CORE: u16 = 0xC001;
const CS_SECURITY: u16 = 0xC002;
const CS_NET: u16 = 0xC003;

const SC_CORE: u16 = 0x0C01;
const SC_SECURITY: u16 = 0x0C02;
const SC_NET: u16 = 0x0C03;

/// A settings block this implementation does not interpret.
///
/// Unknown blocks are preserved byte-for-byte so the relayed Connect PDUs
/// stay faithful to what the peer sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub block_type: u16,
    pub data: Vec<u8>,
}

impl RawBlock {
    fn size(&self) -> usize {
        USER_DATA_HEADER_SIZE + self.data.len()
    }
}

/// Client settings blocks of the Connect-Initial PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBlocks {
    pub core: ClientCoreData,
    pub security: ClientSecurityData,
    pub network: Option<ClientNetworkData>,
    pub other: Vec<RawBlock>,
}

impl ClientBlocks {
    const NAME: &'static str = "ClientGccBlocks";

    pub fn channel_names(&self) -> Vec<ChannelDef> {
        self.network.as_ref().map(|network| network.channels.clone()).unwrap_or_default()
    }
}

impl Encode for ClientBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        UserDataHeader::encode(dst, CS_CORE, &self.core)?;
        UserDataHeader::encode(dst, CS_SECURITY, &self.security)?;

        if let Some(ref network) = self.network {
            UserDataHeader::encode(dst, CS_NET, network)?;
        }

        for block in &self.other {
            UserDataHeader::encode_raw(dst, block)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = self.core.size() + self.security.size() + USER_DATA_HEADER_SIZE * 2;

        if let Some(ref network) = self.network {
            size += network.size() + USER_DATA_HEADER_SIZE;
        }

        size + self.other.iter().map(RawBlock::size).sum::<usize>()
    }
}

impl<'de> Decode<'de> for ClientBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;
        let mut other = Vec::new();

        while src.len() >= USER_DATA_HEADER_SIZE {
            let (block_type, data) = UserDataHeader::decode(src)?;

            match block_type {
                CS_CORE => core = Some(spyglass_core::decode(data)?),
                CS_SECURITY => security = Some(spyglass_core::decode(data)?),
                CS_NET => network = Some(spyglass_core::decode(data)?),
                _ => other.push(RawBlock {
                    block_type,
                    data: data.into(),
                }),
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "required CS_CORE block is absent"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "required CS_SECURITY block is absent"))?,
            network,
            other,
        })
    }
}

/// Server settings blocks of the Connect-Response PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBlocks {
    pub core: ServerCoreData,
    pub security: ServerSecurityData,
    pub network: ServerNetworkData,
    pub other: Vec<RawBlock>,
}

impl ServerBlocks {
    const NAME: &'static str = "ServerGccBlocks";

    pub fn channel_ids(&self) -> Vec<u16> {
        self.network.channel_ids.clone()
    }

    pub fn io_channel_id(&self) -> u16 {
        self.network.io_channel
    }
}

impl Encode for ServerBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        UserDataHeader::encode(dst, SC_CORE, &self.core)?;
        UserDataHeader::encode(dst, SC_NET, &self.network)?;
        UserDataHeader::encode(dst, SC_SECURITY, &self.security)?;

        for block in &self.other {
            UserDataHeader::encode_raw(dst, block)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.core.size()
            + self.network.size()
            + self.security.size()
            + USER_DATA_HEADER_SIZE * 3
            + self.other.iter().map(RawBlock::size).sum::<usize>()
    }
}

impl<'de> Decode<'de> for ServerBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;
        let mut other = Vec::new();

        while src.len() >= USER_DATA_HEADER_SIZE {
            let (block_type, data) = UserDataHeader::decode(src)?;

            match block_type {
                SC_CORE => core = Some(spyglass_core::decode(data)?),
                SC_SECURITY => security = Some(spyglass_core::decode(data)?),
                SC_NET => network = Some(spyglass_core::decode(data)?),
                _ => other.push(RawBlock {
                    block_type,
                    data: data.into(),
                }),
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "required SC_CORE block is absent"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "required SC_SECURITY block is absent"))?,
            network: network.ok_or_else(|| invalid_field_err!("network", "required SC_NET block is absent"))?,
            other,
        })
    }
}

/// The `blockType` + `blockLen` header in front of every settings block.
#[derive(Debug)]
pub struct UserDataHeader;

impl UserDataHeader {
    const NAME: &'static str = "UserDataHeader";

    const FIXED_PART_SIZE: usize = 2 /* blockType */ + 2 /* blockLen */;

    pub fn encode<B>(dst: &mut WriteCursor<'_>, block_type: u16, block: &B) -> EncodeResult<()>
    where
        B: Encode,
    {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(block_type);
        dst.write_u16(cast_length!("blockLen", block.size() + USER_DATA_HEADER_SIZE)?);
        block.encode(dst)?;

        Ok(())
    }

    fn encode_raw(dst: &mut WriteCursor<'_>, block: &RawBlock) -> EncodeResult<()> {
        ensure_size!(ctx: Self::NAME, in: dst, size: block.size());

        dst.write_u16(block.block_type);
        dst.write_u16(cast_length!("blockLen", block.size())?);
        dst.write_slice(&block.data);

        Ok(())
    }

    pub fn decode<'de>(src: &mut ReadCursor<'de>) -> DecodeResult<(u16, &'de [u8])> {
        ensure_fixed_part_size!(in: src);

        let block_type = src.read_u16();
        let block_length: usize = cast_length!("blockLen", src.read_u16())?;

        if block_length <= USER_DATA_HEADER_SIZE {
            return Err(invalid_field_err!("blockLen", "block length smaller than its header"));
        }

        let len = block_length - USER_DATA_HEADER_SIZE;
        ensure_size!(in: src, size: len);

        Ok((block_type, src.read_slice(len)))
    }
}
