#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

mod channel_connection;
mod connection;

use core::any::Any;
use core::fmt;

use rand::RngCore as _;
use spyglass_crypto::RdpEncryption;
use spyglass_pdu::nego;
use spyglass_pdu::PduHint;

pub use self::channel_connection::{ChannelConnectionSequence, ChannelConnectionState, JoinedChannels};
pub use self::connection::{
    encode_send_data_indication, encode_send_data_request, ClientConfig, ClientConnector, ClientConnectorState,
    ConnectionResult,
};

/// A state of a connection sequence.
pub trait State: Send + fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn is_terminal(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

spyglass_core::assert_obj_safe!(State);

pub fn state_downcast<T: State>(state: &dyn State) -> Option<&T> {
    state.as_any().downcast_ref()
}

pub fn state_is<T: State>(state: &dyn State) -> bool {
    state.as_any().is::<T>()
}

impl State for () {
    fn name(&self) -> &'static str {
        "()"
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// How much a sequence step wrote into the output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Written {
    Nothing,
    Size(core::num::NonZeroUsize),
}

impl Written {
    #[inline]
    pub fn from_size(value: usize) -> ConnectorResult<Self> {
        core::num::NonZeroUsize::new(value)
            .map(Self::Size)
            .ok_or_else(|| ConnectorError::general("invalid written length (can't be zero)"))
    }

    #[inline]
    pub fn is_nothing(self) -> bool {
        matches!(self, Self::Nothing)
    }

    #[inline]
    pub fn size(self) -> Option<usize> {
        if let Self::Size(size) = self {
            Some(size.get())
        } else {
            None
        }
    }
}

/// A single-stepped handshake state machine driven by framed input.
pub trait Sequence: Send {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint>;

    fn state(&self) -> &dyn State;

    fn step(&mut self, input: &[u8], output: &mut spyglass_core::WriteBuf) -> ConnectorResult<Written>;

    fn step_no_input(&mut self, output: &mut spyglass_core::WriteBuf) -> ConnectorResult<Written> {
        self.step(&[], output)
    }
}

spyglass_core::assert_obj_safe!(Sequence);

/// Source of nonce bytes, injected so tests stay deterministic.
pub trait RandomSource: Send {
    fn fill(&mut self, dest: &mut [u8]);
}

/// Operating-system randomness, the default source.
#[derive(Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, dest: &mut [u8]) {
        rand::rng().fill_bytes(dest);
    }
}

/// The security state a finished handshake hands to the relay.
pub enum SecuritySession {
    /// `useTLS=false, encryptionMethod=0`: nothing on the wire.
    None,
    /// TLS passthrough; the 4-byte security header is only present during
    /// the client-info/licensing exchanges.
    Tls { security_header_expected: bool },
    /// Standard RDP security with live RC4 state.
    Legacy { encryption: RdpEncryption },
}

impl SecuritySession {
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }
}

impl fmt::Debug for SecuritySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "SecuritySession::None"),
            Self::Tls {
                security_header_expected,
            } => write!(f, "SecuritySession::Tls {{ security_header_expected: {security_header_expected} }}"),
            Self::Legacy { .. } => write!(f, "SecuritySession::Legacy"),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum ConnectorErrorKind {
    Encode(spyglass_core::EncodeError),
    Decode(spyglass_core::DecodeError),
    Negotiation(nego::FailureCode),
    Crypto(spyglass_crypto::CryptoError),
    Reason(String),
    General,
    Custom,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConnectorErrorKind::Encode(_) => write!(f, "encode error"),
            ConnectorErrorKind::Decode(_) => write!(f, "decode error"),
            ConnectorErrorKind::Negotiation(code) => write!(f, "negotiation failure (code {})", u32::from(*code)),
            ConnectorErrorKind::Crypto(_) => write!(f, "crypto error"),
            ConnectorErrorKind::Reason(description) => write!(f, "reason: {description}"),
            ConnectorErrorKind::General => write!(f, "general error"),
            ConnectorErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for ConnectorErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            ConnectorErrorKind::Encode(e) => Some(e),
            ConnectorErrorKind::Decode(e) => Some(e),
            ConnectorErrorKind::Crypto(e) => Some(e),
            _ => None,
        }
    }
}

pub type ConnectorError = spyglass_error::Error<ConnectorErrorKind>;

pub trait ConnectorErrorExt {
    fn encode(error: spyglass_core::EncodeError) -> Self;
    fn decode(error: spyglass_core::DecodeError) -> Self;
    fn crypto(error: spyglass_crypto::CryptoError) -> Self;
    fn negotiation(code: nego::FailureCode) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl ConnectorErrorExt for ConnectorError {
    fn encode(error: spyglass_core::EncodeError) -> Self {
        Self::new("encode error", ConnectorErrorKind::Encode(error))
    }

    fn decode(error: spyglass_core::DecodeError) -> Self {
        Self::new("decode error", ConnectorErrorKind::Decode(error))
    }

    fn crypto(error: spyglass_crypto::CryptoError) -> Self {
        Self::new("crypto error", ConnectorErrorKind::Crypto(error))
    }

    fn negotiation(code: nego::FailureCode) -> Self {
        Self::new("negotiation failure", ConnectorErrorKind::Negotiation(code))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, ConnectorErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ConnectorErrorKind::Custom).with_source(e)
    }
}

pub trait ConnectorResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
}

impl<T> ConnectorResultExt for ConnectorResult<T> {
    fn with_context(self, context: &'static str) -> Self {
        self.map_err(|mut e| {
            e.context = context;
            e
        })
    }
}
