use std::collections::VecDeque;
use std::mem;

use spyglass_core::{decode, WriteBuf};
use spyglass_pdu::x224::X224;
use spyglass_pdu::{mcs, PduHint};

use crate::{ConnectorError, ConnectorErrorExt as _, ConnectorResult, Sequence, State, Written};

/// Outcome of the channel connection phase.
///
/// A refused channel is remembered and skipped; the session carries on with
/// the channels that did join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedChannels {
    pub user_channel_id: u16,
    pub joined: Vec<u16>,
    pub refused: Vec<u16>,
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ChannelConnectionState {
    #[default]
    Consumed,

    SendErectDomainRequest,
    SendAttachUserRequest,
    WaitAttachUserConfirm,
    SendChannelJoinRequest {
        user_channel_id: u16,
        remaining: VecDeque<u16>,
        joined: Vec<u16>,
        refused: Vec<u16>,
    },
    WaitChannelJoinConfirm {
        user_channel_id: u16,
        requested: u16,
        remaining: VecDeque<u16>,
        joined: Vec<u16>,
        refused: Vec<u16>,
    },
    AllJoined {
        channels: JoinedChannels,
    },
}

impl State for ChannelConnectionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::SendErectDomainRequest => "SendErectDomainRequest",
            Self::SendAttachUserRequest => "SendAttachUserRequest",
            Self::WaitAttachUserConfirm => "WaitAttachUserConfirm",
            Self::SendChannelJoinRequest { .. } => "SendChannelJoinRequest",
            Self::WaitChannelJoinConfirm { .. } => "WaitChannelJoinConfirm",
            Self::AllJoined { .. } => "AllJoined",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::AllJoined { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

/// Drives the MCS domain setup: erect domain, attach user, then one channel
/// join at a time.
///
/// Joins are strictly serialized: the next request goes out only once the
/// confirm for the previous one came back. The I/O channel is always joined
/// first.
#[derive(Debug)]
pub struct ChannelConnectionSequence {
    pub state: ChannelConnectionState,
    join_order: VecDeque<u16>,
}

impl ChannelConnectionSequence {
    pub fn new(io_channel_id: u16, channel_ids: Vec<u16>) -> Self {
        let mut join_order = VecDeque::with_capacity(channel_ids.len() + 1);
        join_order.push_back(io_channel_id);
        join_order.extend(channel_ids.into_iter().filter(|id| *id != io_channel_id));

        Self {
            state: ChannelConnectionState::SendErectDomainRequest,
            join_order,
        }
    }

    pub fn channels(&self) -> Option<&JoinedChannels> {
        match &self.state {
            ChannelConnectionState::AllJoined { channels } => Some(channels),
            _ => None,
        }
    }
}

impl Sequence for ChannelConnectionSequence {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match self.state {
            ChannelConnectionState::Consumed => None,
            ChannelConnectionState::SendErectDomainRequest => None,
            ChannelConnectionState::SendAttachUserRequest => None,
            ChannelConnectionState::WaitAttachUserConfirm => Some(&spyglass_pdu::X224_HINT),
            ChannelConnectionState::SendChannelJoinRequest { .. } => None,
            ChannelConnectionState::WaitChannelJoinConfirm { .. } => Some(&spyglass_pdu::X224_HINT),
            ChannelConnectionState::AllJoined { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ChannelConnectionState::Consumed => {
                return Err(general_err!("channel connection sequence state is consumed"))
            }

            ChannelConnectionState::SendErectDomainRequest => {
                let erect_domain_request = mcs::ErectDomainPdu {
                    sub_height: 0,
                    sub_interval: 0,
                };

                debug!(message = ?erect_domain_request, "Send");

                let written =
                    spyglass_core::encode_buf(&X224(erect_domain_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::SendAttachUserRequest,
                )
            }

            ChannelConnectionState::SendAttachUserRequest => {
                let attach_user_request = mcs::AttachUserRequest;

                debug!(message = ?attach_user_request, "Send");

                let written =
                    spyglass_core::encode_buf(&X224(attach_user_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ChannelConnectionState::WaitAttachUserConfirm,
                )
            }

            ChannelConnectionState::WaitAttachUserConfirm => {
                let attach_user_confirm = decode::<X224<mcs::AttachUserConfirm>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                let user_channel_id = attach_user_confirm.initiator_id;

                debug!(message = ?attach_user_confirm, user_channel_id, "Received");

                if attach_user_confirm.result != 0 {
                    return Err(reason_err!(
                        "AttachUserConfirm",
                        "server refused the user attachment (result {})",
                        attach_user_confirm.result,
                    ));
                }

                (
                    Written::Nothing,
                    ChannelConnectionState::SendChannelJoinRequest {
                        user_channel_id,
                        remaining: mem::take(&mut self.join_order),
                        joined: Vec::new(),
                        refused: Vec::new(),
                    },
                )
            }

            ChannelConnectionState::SendChannelJoinRequest {
                user_channel_id,
                mut remaining,
                joined,
                refused,
            } => match remaining.pop_front() {
                Some(channel_id) => {
                    let channel_join_request = mcs::ChannelJoinRequest {
                        initiator_id: user_channel_id,
                        channel_id,
                    };

                    debug!(message = ?channel_join_request, "Send");

                    let written = spyglass_core::encode_buf(&X224(channel_join_request), output)
                        .map_err(ConnectorError::encode)?;

                    (
                        Written::from_size(written)?,
                        ChannelConnectionState::WaitChannelJoinConfirm {
                            user_channel_id,
                            requested: channel_id,
                            remaining,
                            joined,
                            refused,
                        },
                    )
                }
                None => (
                    Written::Nothing,
                    ChannelConnectionState::AllJoined {
                        channels: JoinedChannels {
                            user_channel_id,
                            joined,
                            refused,
                        },
                    },
                ),
            },

            ChannelConnectionState::WaitChannelJoinConfirm {
                user_channel_id,
                requested,
                remaining,
                mut joined,
                mut refused,
            } => {
                let channel_join_confirm = decode::<X224<mcs::ChannelJoinConfirm>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                debug!(message = ?channel_join_confirm, "Received");

                if channel_join_confirm.requested_channel_id != requested {
                    return Err(reason_err!(
                        "ChannelJoinConfirm",
                        "unexpected requested channel id: got {}, expected {}",
                        channel_join_confirm.requested_channel_id,
                        requested,
                    ));
                }

                if channel_join_confirm.is_refused() {
                    // Not fatal: drop the channel and move on.
                    warn!(
                        channel_id = requested,
                        result = channel_join_confirm.result,
                        "Channel join refused, continuing without it"
                    );
                    refused.push(requested);
                } else {
                    joined.push(channel_join_confirm.channel_id);
                }

                let next_state = if remaining.is_empty() {
                    ChannelConnectionState::AllJoined {
                        channels: JoinedChannels {
                            user_channel_id,
                            joined,
                            refused,
                        },
                    }
                } else {
                    ChannelConnectionState::SendChannelJoinRequest {
                        user_channel_id,
                        remaining,
                        joined,
                        refused,
                    }
                };

                (Written::Nothing, next_state)
            }

            ChannelConnectionState::AllJoined { .. } => return Err(general_err!("all channels are already joined")),
        };

        self.state = next_state;

        Ok(written)
    }
}
