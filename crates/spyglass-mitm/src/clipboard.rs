//! Just enough of the clipboard channel (CLIPRDR) to classify relayed
//! messages: every PDU starts with `msgType:u16 | msgFlags:u16 | dataLen:u32`.

/// Clipboard message classification for the event stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClipboardEvent {
    FormatList,
    FormatListResponse,
    FormatDataRequest,
    FormatDataResponse,
    Other(u16),
}

const CB_FORMAT_LIST: u16 = 0x0002;
const CB_FORMAT_LIST_RESPONSE: u16 = 0x0003;
const CB_FORMAT_DATA_REQUEST: u16 = 0x0004;
const CB_FORMAT_DATA_RESPONSE: u16 = 0x0005;

const CLIPBOARD_HEADER_SIZE: usize = 8;

impl ClipboardEvent {
    /// Classifies a clipboard PDU from its header.
    pub fn classify(payload: &[u8]) -> Option<Self> {
        if payload.len() < CLIPBOARD_HEADER_SIZE {
            return None;
        }

        let msg_type = u16::from_le_bytes([payload[0], payload[1]]);

        Some(match msg_type {
            CB_FORMAT_LIST => Self::FormatList,
            CB_FORMAT_LIST_RESPONSE => Self::FormatListResponse,
            CB_FORMAT_DATA_REQUEST => Self::FormatDataRequest,
            CB_FORMAT_DATA_RESPONSE => Self::FormatDataResponse,
            other => Self::Other(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clipboard_pdu(msg_type: u16, data: &[u8]) -> Vec<u8> {
        let mut pdu = Vec::new();
        pdu.extend_from_slice(&msg_type.to_le_bytes());
        pdu.extend_from_slice(&0u16.to_le_bytes());
        pdu.extend_from_slice(&(data.len() as u32).to_le_bytes());
        pdu.extend_from_slice(data);
        pdu
    }

    #[test]
    fn classifies_known_messages() {
        assert_eq!(
            ClipboardEvent::classify(&clipboard_pdu(0x0002, &[])),
            Some(ClipboardEvent::FormatList)
        );
        assert_eq!(
            ClipboardEvent::classify(&clipboard_pdu(0x0005, b"ABC\0")),
            Some(ClipboardEvent::FormatDataResponse)
        );
        assert_eq!(
            ClipboardEvent::classify(&clipboard_pdu(0x0001, &[])),
            Some(ClipboardEvent::Other(1))
        );
    }

    #[test]
    fn truncated_header_is_not_an_event() {
        assert_eq!(ClipboardEvent::classify(&[0x02, 0x00]), None);
    }
}
