use std::collections::HashMap;

use spyglass_pdu::gcc::{ChannelDef, ChannelName};

pub const IO_CHANNEL_NAME: &str = "I/O";
pub const CLIPBOARD_CHANNEL_NAME: &str = "cliprdr";

/// Per-side channel routing: the MCS channel ids a server assigned, keyed
/// back to the channel names the client declared.
///
/// The ids are server-assigned, so the two sides of the proxy may disagree
/// on them; names are the stable key used to pair channels across sides.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    io_channel_id: u16,
    name_by_server_id: HashMap<u16, ChannelName>,
    server_id_by_name: HashMap<ChannelName, u16>,
}

impl ChannelMap {
    /// Pairs the client's channel definitions with the ids of the server
    /// NETWORK block, positionally, the way MS-RDPBCGR assigns them.
    pub fn new(io_channel_id: u16, definitions: &[ChannelDef], server_ids: &[u16]) -> Self {
        let mut name_by_server_id = HashMap::new();
        let mut server_id_by_name = HashMap::new();

        for (definition, id) in definitions.iter().zip(server_ids.iter().copied()) {
            name_by_server_id.insert(id, definition.name.clone());
            server_id_by_name.insert(definition.name.clone(), id);
        }

        Self {
            io_channel_id,
            name_by_server_id,
            server_id_by_name,
        }
    }

    pub fn io_channel_id(&self) -> u16 {
        self.io_channel_id
    }

    pub fn is_io_channel(&self, channel_id: u16) -> bool {
        channel_id == self.io_channel_id
    }

    pub fn name_of(&self, channel_id: u16) -> Option<&ChannelName> {
        self.name_by_server_id.get(&channel_id)
    }

    pub fn id_of(&self, name: &ChannelName) -> Option<u16> {
        self.server_id_by_name.get(name).copied()
    }

    pub fn is_clipboard(&self, channel_id: u16) -> bool {
        self.name_of(channel_id)
            .and_then(|name| name.as_str())
            .map(|name| name.eq_ignore_ascii_case(CLIPBOARD_CHANNEL_NAME))
            .unwrap_or(false)
    }

    /// Pretty name for logging: the channel name when known, the raw id
    /// otherwise.
    pub fn describe(&self, channel_id: u16) -> String {
        if self.is_io_channel(channel_id) {
            return format!("{IO_CHANNEL_NAME} ({channel_id})");
        }

        match self.name_of(channel_id).and_then(|name| name.as_str()) {
            Some(name) => format!("{name} ({channel_id})"),
            None => format!("({channel_id})"),
        }
    }

    /// Translates a channel id from this side to the paired side.
    pub fn translate_to(&self, other: &ChannelMap, channel_id: u16) -> Option<u16> {
        if self.is_io_channel(channel_id) {
            return Some(other.io_channel_id());
        }

        self.name_of(channel_id).and_then(|name| other.id_of(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_pdu::gcc::ChannelOptions;

    fn def(name: &str) -> ChannelDef {
        ChannelDef {
            name: ChannelName::from_utf8(name).unwrap(),
            options: ChannelOptions::INITIALIZED,
        }
    }

    #[test]
    fn maps_names_positionally() {
        let map = ChannelMap::new(1003, &[def("cliprdr"), def("rdpsnd")], &[1004, 1005]);

        assert!(map.is_io_channel(1003));
        assert!(map.is_clipboard(1004));
        assert!(!map.is_clipboard(1005));
        assert_eq!(map.name_of(1005).unwrap().as_str(), Some("rdpsnd"));
    }

    #[test]
    fn translates_between_sides_by_name() {
        let victim = ChannelMap::new(1003, &[def("cliprdr"), def("rdpsnd")], &[1004, 1005]);
        let target = ChannelMap::new(1010, &[def("cliprdr"), def("rdpsnd")], &[1012, 1011]);

        assert_eq!(victim.translate_to(&target, 1003), Some(1010));
        assert_eq!(victim.translate_to(&target, 1004), Some(1012));
        assert_eq!(victim.translate_to(&target, 1005), Some(1011));
        assert_eq!(victim.translate_to(&target, 1999), None);
    }
}
