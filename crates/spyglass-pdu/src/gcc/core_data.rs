use spyglass_core::{ensure_fixed_part_size, ensure_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// RDP 5.0 and later.
pub const RDP_VERSION_5_PLUS: u32 = 0x0008_0004;

const CLIENT_NAME_SIZE: usize = 32;
const IME_FILE_NAME_SIZE: usize = 64;

/// Client Core Data (TS_UD_CS_CORE).
///
/// Everything past the mandatory RDP 4.0 part plus the keyboard/IME fields is
/// kept as an opaque tail: the relay never interprets it and re-emits it
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCoreData {
    pub version: u32,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub color_depth: u16,
    pub sas_sequence: u16,
    pub keyboard_layout: u32,
    pub client_build: u32,
    pub client_name: [u8; CLIENT_NAME_SIZE],
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub ime_file_name: [u8; IME_FILE_NAME_SIZE],
    pub optional_tail: Vec<u8>,
}

impl ClientCoreData {
    const NAME: &'static str = "ClientCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */
        + 2 /* desktopWidth */
        + 2 /* desktopHeight */
        + 2 /* colorDepth */
        + 2 /* SASSequence */
        + 4 /* keyboardLayout */
        + 4 /* clientBuild */
        + CLIENT_NAME_SIZE
        + 4 /* keyboardType */
        + 4 /* keyboardSubType */
        + 4 /* keyboardFunctionKey */
        + IME_FILE_NAME_SIZE;

    pub fn new(desktop_width: u16, desktop_height: u16, client_name: &str) -> Self {
        let mut name_buffer = [0u8; CLIENT_NAME_SIZE];
        for (i, unit) in client_name.encode_utf16().take(CLIENT_NAME_SIZE / 2 - 1).enumerate() {
            name_buffer[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }

        Self {
            version: RDP_VERSION_5_PLUS,
            desktop_width,
            desktop_height,
            color_depth: 0xCA01, // RNS_UD_COLOR_8BPP
            sas_sequence: 0xAA03, // RNS_UD_SAS_DEL
            keyboard_layout: 0,
            client_build: 2600,
            client_name: name_buffer,
            keyboard_type: 4, // IBM enhanced
            keyboard_subtype: 0,
            keyboard_functional_keys_count: 12,
            ime_file_name: [0u8; IME_FILE_NAME_SIZE],
            optional_tail: Vec::new(),
        }
    }

    /// Client name decoded from its fixed UTF-16 field.
    pub fn client_name(&self) -> String {
        let units: Vec<u16> = self
            .client_name
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }
}

impl Encode for ClientCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version);
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        dst.write_u16(self.color_depth);
        dst.write_u16(self.sas_sequence);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.client_build);
        dst.write_slice(&self.client_name);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_functional_keys_count);
        dst.write_slice(&self.ime_file_name);
        dst.write_slice(&self.optional_tail);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.optional_tail.len()
    }
}

impl<'de> Decode<'de> for ClientCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u32();
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        let color_depth = src.read_u16();
        let sas_sequence = src.read_u16();
        let keyboard_layout = src.read_u32();
        let client_build = src.read_u32();
        let client_name = src.read_array();
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_functional_keys_count = src.read_u32();
        let ime_file_name = src.read_array();
        let optional_tail = src.read_remaining().into();

        Ok(Self {
            version,
            desktop_width,
            desktop_height,
            color_depth,
            sas_sequence,
            keyboard_layout,
            client_build,
            client_name,
            keyboard_type,
            keyboard_subtype,
            keyboard_functional_keys_count,
            ime_file_name,
            optional_tail,
        })
    }
}

/// Server Core Data (TS_UD_SC_CORE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCoreData {
    pub version: u32,
    /// Optional `clientRequestedProtocols` and `earlyCapabilityFlags`, kept raw.
    pub optional_tail: Vec<u8>,
}

impl ServerCoreData {
    const NAME: &'static str = "ServerCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */;
}

impl Encode for ServerCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version);
        dst.write_slice(&self.optional_tail);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.optional_tail.len()
    }
}

impl<'de> Decode<'de> for ServerCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = src.read_u32();
        let optional_tail = src.read_remaining().into();

        Ok(Self { version, optional_tail })
    }
}
