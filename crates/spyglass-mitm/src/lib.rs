#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

mod channels;
mod clipboard;
mod recorder;
mod relay;
mod security;
mod session;

pub use self::channels::ChannelMap;
pub use self::clipboard::ClipboardEvent;
pub use self::recorder::{
    parse_record, CloseReason, FileSink, RecordKind, Recorder, RecorderSink, SocketSink,
};
pub use self::relay::{EstablishedSession, EventObserver, NoopObserver, SessionEvent};
pub use self::session::{handshake_begin, handshake_finish, Handshake, HandshakeResume, SessionConfig};

use core::fmt;

use spyglass_connector::{ConnectorError, ConnectorErrorKind};

pub type SessionResult<T> = Result<T, SessionError>;

pub type SessionError = spyglass_error::Error<SessionErrorKind>;

/// Session-fatal failures, per the propagation policy: parsing and crypto
/// errors close both sides; a channel-join refusal never reaches this type
/// because it is handled inside the join sequence.
#[non_exhaustive]
#[derive(Debug)]
pub enum SessionErrorKind {
    /// Length mismatch, unknown mandatory field, truncated buffer.
    MalformedPdu,
    /// First byte was neither TPKT nor fast path.
    UnknownHeader { header: u8 },
    /// The target refused the negotiation, or selected something this
    /// implementation does not speak.
    Negotiation { code: u32 },
    /// MAC mismatch: key desynchronization or tampering.
    BadSignature,
    /// A transport went down; the other side is shut down symmetrically.
    TransportClosed,
    General,
    Custom,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPdu => write!(f, "malformed PDU"),
            Self::UnknownHeader { header } => write!(f, "unknown frame header byte (0x{header:02X})"),
            Self::Negotiation { code } => write!(f, "negotiation failure (code {code})"),
            Self::BadSignature => write!(f, "bad packet signature"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::General => write!(f, "general error"),
            Self::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for SessionErrorKind {}

pub(crate) fn session_general_err(context: &'static str) -> SessionError {
    SessionError::new(context, SessionErrorKind::General)
}

/// Lifts a handshake error into the session error space, keeping the cause.
pub(crate) fn from_connector_error(error: ConnectorError) -> SessionError {
    let kind = match error.kind() {
        ConnectorErrorKind::Decode(_) | ConnectorErrorKind::Encode(_) => SessionErrorKind::MalformedPdu,
        ConnectorErrorKind::Negotiation(code) => SessionErrorKind::Negotiation {
            code: u32::from(*code),
        },
        ConnectorErrorKind::Crypto(spyglass_crypto::CryptoError::BadSignature) => SessionErrorKind::BadSignature,
        _ => SessionErrorKind::General,
    };

    SessionError::new(error.context, kind).with_source(error)
}

/// Classifies a transport read failure for the CLOSE record.
pub(crate) fn close_reason_from_io(error: &std::io::Error) -> CloseReason {
    if let Some(source) = error.get_ref() {
        if let Some(decode_error) = source.downcast_ref::<spyglass_core::DecodeError>() {
            return match decode_error.kind() {
                // Either the fast-path action bits or the TPKT version byte
                // did not match: the first byte is not a frame we know.
                spyglass_core::DecodeErrorKind::UnexpectedMessageType { got }
                | spyglass_core::DecodeErrorKind::UnsupportedVersion { got } => CloseReason::UnknownHeader(*got),
                _ => CloseReason::MalformedPdu,
            };
        }
    }

    CloseReason::TransportClosed
}

pub(crate) fn session_error_from_io(context: &'static str, error: std::io::Error) -> SessionError {
    let kind = match close_reason_from_io(&error) {
        CloseReason::UnknownHeader(header) => SessionErrorKind::UnknownHeader { header },
        CloseReason::MalformedPdu => SessionErrorKind::MalformedPdu,
        _ => SessionErrorKind::TransportClosed,
    };

    SessionError::new(context, kind).with_source(error)
}
