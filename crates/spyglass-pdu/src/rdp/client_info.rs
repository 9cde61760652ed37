use bitflags::bitflags;
use spyglass_core::{
    cast_length, ensure_fixed_part_size, ensure_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor,
    WriteCursor,
};

const TIMEZONE_SIZE: usize = 172;
const NULL_TERMINATOR_SIZE: usize = 2;

bitflags! {
    /// TS_INFO_PACKET::flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct InfoFlags: u32 {
        const MOUSE = 0x0000_0001;
        const DISABLE_CTRL_ALT_DEL = 0x0000_0002;
        const AUTOLOGON = 0x0000_0008;
        const UNICODE = 0x0000_0010;
        const MAXIMIZE_SHELL = 0x0000_0020;
        const LOGON_NOTIFY = 0x0000_0040;
        const COMPRESSION = 0x0000_0080;
        const ENABLE_WINDOWS_KEY = 0x0000_0100;
        const REMOTE_CONSOLE_AUDIO = 0x0000_2000;
        const FORCE_ENCRYPTED_CS_PDU = 0x0000_4000;
        const RAIL = 0x0000_8000;
        const LOGON_ERRORS = 0x0001_0000;
        const MOUSE_HAS_WHEEL = 0x0002_0000;
        const PASSWORD_IS_SC_PIN = 0x0004_0000;
        const NO_AUDIO_PLAYBACK = 0x0008_0000;
        const USING_SAVED_CREDS = 0x0010_0000;
        const AUDIO_CAPTURE = 0x0020_0000;
        const VIDEO_DISABLE = 0x0040_0000;
        const COMPRESSION_TYPE_MASK = 0x0000_1E00;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PerformanceFlags: u32 {
        const DISABLE_WALLPAPER = 0x0000_0001;
        const DISABLE_FULLWINDOWDRAG = 0x0000_0002;
        const DISABLE_MENUANIMATIONS = 0x0000_0004;
        const DISABLE_THEMING = 0x0000_0008;
        const DISABLE_CURSOR_SHADOW = 0x0000_0020;
        const DISABLE_CURSORSETTINGS = 0x0000_0040;
        const ENABLE_FONT_SMOOTHING = 0x0000_0080;
        const ENABLE_DESKTOP_COMPOSITION = 0x0000_0100;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressFamily(u16);

impl AddressFamily {
    pub const INET: Self = Self(0x0002);
    pub const INET6: Self = Self(0x0017);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for AddressFamily {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Extended client info (TS_EXTENDED_INFO_PACKET), present for RDP 5.0+.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedClientInfo {
    pub address_family: AddressFamily,
    pub address: String,
    pub dir: String,
    /// Opaque timezone block, zeroed when synthesized locally.
    pub timezone: [u8; TIMEZONE_SIZE],
    pub session_id: u32,
    pub performance_flags: PerformanceFlags,
}

impl Default for ExtendedClientInfo {
    fn default() -> Self {
        Self {
            address_family: AddressFamily::INET,
            address: String::new(),
            dir: String::new(),
            timezone: [0u8; TIMEZONE_SIZE],
            session_id: 0,
            performance_flags: PerformanceFlags::empty(),
        }
    }
}

impl ExtendedClientInfo {
    fn size(&self) -> usize {
        2 /* clientAddressFamily */
            + 2 /* cbClientAddress */ + utf16_len_nul(&self.address)
            + 2 /* cbClientDir */ + utf16_len_nul(&self.dir)
            + TIMEZONE_SIZE
            + 4 /* clientSessionId */
            + 4 /* performanceFlags */
    }
}

/// Client Info PDU payload (TS_INFO_PACKET): credentials, shell, working
/// directory and the extended info block.
///
/// The `cb*` length fields are recomputed from the strings on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub code_page: u32,
    pub flags: InfoFlags,
    pub domain: String,
    pub username: String,
    pub password: String,
    pub alternate_shell: String,
    pub working_dir: String,
    pub extended_info: Option<ExtendedClientInfo>,
}

impl ClientInfo {
    const NAME: &'static str = "ClientInfo";

    const FIXED_PART_SIZE: usize = 4 /* codePage */ + 4 /* flags */
        + 2 * 5 /* cbDomain..cbWorkingDir */;

    pub fn new(username: &str, password: &str, domain: &str) -> Self {
        Self {
            code_page: 0,
            flags: InfoFlags::MOUSE | InfoFlags::UNICODE | InfoFlags::LOGON_NOTIFY | InfoFlags::LOGON_ERRORS,
            domain: domain.to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
            alternate_shell: String::new(),
            working_dir: String::new(),
            extended_info: Some(ExtendedClientInfo::default()),
        }
    }
}

impl Encode for ClientInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.code_page);
        dst.write_u32(self.flags.bits());

        // cb* fields count the string bytes without the null terminator
        dst.write_u16(cast_length!("cbDomain", utf16_len(&self.domain))?);
        dst.write_u16(cast_length!("cbUserName", utf16_len(&self.username))?);
        dst.write_u16(cast_length!("cbPassword", utf16_len(&self.password))?);
        dst.write_u16(cast_length!("cbAlternateShell", utf16_len(&self.alternate_shell))?);
        dst.write_u16(cast_length!("cbWorkingDir", utf16_len(&self.working_dir))?);

        write_utf16_nul(dst, &self.domain);
        write_utf16_nul(dst, &self.username);
        write_utf16_nul(dst, &self.password);
        write_utf16_nul(dst, &self.alternate_shell);
        write_utf16_nul(dst, &self.working_dir);

        if let Some(ref extended) = self.extended_info {
            dst.write_u16(extended.address_family.as_u16());
            dst.write_u16(cast_length!("cbClientAddress", utf16_len_nul(&extended.address))?);
            write_utf16_nul(dst, &extended.address);
            dst.write_u16(cast_length!("cbClientDir", utf16_len_nul(&extended.dir))?);
            write_utf16_nul(dst, &extended.dir);
            dst.write_slice(&extended.timezone);
            dst.write_u32(extended.session_id);
            dst.write_u32(extended.performance_flags.bits());
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + utf16_len_nul(&self.domain)
            + utf16_len_nul(&self.username)
            + utf16_len_nul(&self.password)
            + utf16_len_nul(&self.alternate_shell)
            + utf16_len_nul(&self.working_dir)
            + self.extended_info.as_ref().map(ExtendedClientInfo::size).unwrap_or(0)
    }
}

impl<'de> Decode<'de> for ClientInfo {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let code_page = src.read_u32();
        let flags = InfoFlags::from_bits_truncate(src.read_u32());

        let cb_domain = usize::from(src.read_u16());
        let cb_username = usize::from(src.read_u16());
        let cb_password = usize::from(src.read_u16());
        let cb_alternate_shell = usize::from(src.read_u16());
        let cb_working_dir = usize::from(src.read_u16());

        let domain = read_utf16_nul(src, cb_domain)?;
        let username = read_utf16_nul(src, cb_username)?;
        let password = read_utf16_nul(src, cb_password)?;
        let alternate_shell = read_utf16_nul(src, cb_alternate_shell)?;
        let working_dir = read_utf16_nul(src, cb_working_dir)?;

        let extended_info = if src.len() >= 4 {
            ensure_size!(in: src, size: 4);
            let address_family = AddressFamily::from(src.read_u16());
            let cb_address = usize::from(src.read_u16());
            let address = read_utf16_sized(src, cb_address)?;

            ensure_size!(in: src, size: 2);
            let cb_dir = usize::from(src.read_u16());
            let dir = read_utf16_sized(src, cb_dir)?;

            ensure_size!(in: src, size: TIMEZONE_SIZE + 4 + 4);
            let timezone = src.read_array();
            let session_id = src.read_u32();
            let performance_flags = PerformanceFlags::from_bits_truncate(src.read_u32());

            Some(ExtendedClientInfo {
                address_family,
                address,
                dir,
                timezone,
                session_id,
                performance_flags,
            })
        } else {
            None
        };

        Ok(Self {
            code_page,
            flags,
            domain,
            username,
            password,
            alternate_shell,
            working_dir,
            extended_info,
        })
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

fn utf16_len_nul(s: &str) -> usize {
    utf16_len(s) + NULL_TERMINATOR_SIZE
}

fn write_utf16_nul(dst: &mut WriteCursor<'_>, s: &str) {
    for unit in s.encode_utf16() {
        dst.write_u16(unit);
    }
    dst.write_u16(0);
}

/// Reads `cb` string bytes followed by a null terminator.
fn read_utf16_nul(src: &mut ReadCursor<'_>, cb: usize) -> DecodeResult<String> {
    let total = cb + NULL_TERMINATOR_SIZE;
    ensure_size!(ctx: ClientInfo::NAME, in: src, size: total);

    let bytes = src.read_slice(cb);
    src.advance(NULL_TERMINATOR_SIZE);

    Ok(utf16_bytes_to_string(bytes))
}

/// Reads a `cb`-sized string field whose size already includes the terminator.
fn read_utf16_sized(src: &mut ReadCursor<'_>, cb: usize) -> DecodeResult<String> {
    ensure_size!(ctx: ClientInfo::NAME, in: src, size: cb);

    let bytes = src.read_slice(cb);

    Ok(utf16_bytes_to_string(bytes))
}

fn utf16_bytes_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_core::{decode, encode_vec};

    #[test]
    fn round_trip_with_extended_info() {
        let info = ClientInfo::new("victim", "hunter2", "CONTOSO");

        let encoded = encode_vec(&info).unwrap();
        assert_eq!(encoded.len(), info.size());

        let decoded: ClientInfo = decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn round_trip_without_extended_info() {
        let mut info = ClientInfo::new("user", "", "");
        info.extended_info = None;

        let encoded = encode_vec(&info).unwrap();
        let decoded: ClientInfo = decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }
}
