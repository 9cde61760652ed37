use core::mem;
use std::borrow::Cow;

use spyglass_core::{decode, encode_vec, WriteBuf};
use spyglass_crypto::{
    public_key_from_certificate, KeyPerspective, KeyStrength, RdpEncryption, SessionKeys, RANDOM_SIZE,
};
use spyglass_pdu::gcc::{ClientBlocks, EncryptionMethod, ServerBlocks};
use spyglass_pdu::rdp::{ClientInfo, PreambleType, SecurityExchangePdu, SecurityHeader, SecurityHeaderFlags};
use spyglass_pdu::x224::X224;
use spyglass_pdu::{encode_x224_packet, mcs, nego, rdp, PduHint};

use crate::channel_connection::{ChannelConnectionSequence, ChannelConnectionState, JoinedChannels};
use crate::{
    ConnectorError, ConnectorErrorExt as _, ConnectorResult, RandomSource, SecuritySession, Sequence, State, Written,
};

/// What the connector forwards from the intercepted client.
///
/// The victim's settings blocks arrive later in its own handshake and are
/// injected through [`ClientConnector::provide_client_blocks`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Negotiation request as received from the victim.
    pub nego_data: Option<nego::NegoRequestData>,
    pub request_flags: nego::RequestFlags,
    pub requested_protocol: nego::SecurityProtocol,
}

/// Everything the relay needs once the outbound handshake finished.
#[derive(Debug)]
pub struct ConnectionResult {
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    pub channels: JoinedChannels,
    pub server_blocks: ServerBlocks,
    pub selected_protocol: nego::SecurityProtocol,
    pub security: SecuritySession,
    pub client_random: Option<[u8; RANDOM_SIZE]>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SecurityMode {
    None,
    Tls,
    Legacy(KeyStrength),
}

#[derive(Default, Debug)]
#[non_exhaustive]
pub enum ClientConnectorState {
    #[default]
    Consumed,

    ConnectionInitiationSendRequest,
    ConnectionInitiationWaitConfirm {
        requested_protocol: nego::SecurityProtocol,
    },
    EnhancedSecurityUpgrade {
        selected_protocol: nego::SecurityProtocol,
    },
    AwaitClientBlocks {
        selected_protocol: nego::SecurityProtocol,
    },
    BasicSettingsExchangeSendInitial {
        selected_protocol: nego::SecurityProtocol,
        client_blocks: Box<ClientBlocks>,
    },
    BasicSettingsExchangeWaitResponse {
        selected_protocol: nego::SecurityProtocol,
    },
    ChannelConnection {
        selected_protocol: nego::SecurityProtocol,
        server_blocks: Box<ServerBlocks>,
        io_channel_id: u16,
        channel_connection: ChannelConnectionSequence,
    },
    AwaitClientInfo {
        selected_protocol: nego::SecurityProtocol,
        server_blocks: Box<ServerBlocks>,
        io_channel_id: u16,
        channels: JoinedChannels,
        mode: SecurityMode,
    },
    SendClientInfo {
        selected_protocol: nego::SecurityProtocol,
        server_blocks: Box<ServerBlocks>,
        io_channel_id: u16,
        channels: JoinedChannels,
        mode: SecurityMode,
        client_info: Box<ClientInfo>,
    },
    LicenseExchange {
        selected_protocol: nego::SecurityProtocol,
        server_blocks: Box<ServerBlocks>,
        io_channel_id: u16,
        channels: JoinedChannels,
        mode: SecurityMode,
    },
    Connected {
        result: ConnectionResult,
    },
}

impl State for ClientConnectorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::ConnectionInitiationSendRequest => "ConnectionInitiationSendRequest",
            Self::ConnectionInitiationWaitConfirm { .. } => "ConnectionInitiationWaitConfirm",
            Self::EnhancedSecurityUpgrade { .. } => "EnhancedSecurityUpgrade",
            Self::AwaitClientBlocks { .. } => "AwaitClientBlocks",
            Self::BasicSettingsExchangeSendInitial { .. } => "BasicSettingsExchangeSendInitial",
            Self::BasicSettingsExchangeWaitResponse { .. } => "BasicSettingsExchangeWaitResponse",
            Self::ChannelConnection { .. } => "ChannelConnection",
            Self::AwaitClientInfo { .. } => "AwaitClientInfo",
            Self::SendClientInfo { .. } => "SendClientInfo",
            Self::LicenseExchange { .. } => "LicenseExchange",
            Self::Connected { .. } => "Connected",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

/// Client-side connection sequence toward the target server.
pub struct ClientConnector {
    pub config: ClientConfig,
    pub state: ClientConnectorState,
    random: Box<dyn RandomSource>,
    /// Live once the security exchange ran; moved into the result.
    encryption: Option<RdpEncryption>,
    client_random: Option<[u8; RANDOM_SIZE]>,
}

impl ClientConnector {
    pub fn new(config: ClientConfig, random: Box<dyn RandomSource>) -> Self {
        Self {
            config,
            state: ClientConnectorState::ConnectionInitiationSendRequest,
            random,
            encryption: None,
            client_random: None,
        }
    }

    /// True while the sequence is paused for the TLS upgrade.
    pub fn should_perform_security_upgrade(&self) -> bool {
        matches!(self.state, ClientConnectorState::EnhancedSecurityUpgrade { .. })
    }

    pub fn mark_security_upgrade_as_done(&mut self) -> ConnectorResult<()> {
        debug_assert!(self.should_perform_security_upgrade());
        let written = self.step(&[], &mut WriteBuf::new())?;
        debug_assert!(written.is_nothing());
        Ok(())
    }

    /// Security protocol the target selected, once known.
    pub fn selected_protocol(&self) -> Option<nego::SecurityProtocol> {
        match &self.state {
            ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol }
            | ClientConnectorState::AwaitClientBlocks { selected_protocol }
            | ClientConnectorState::BasicSettingsExchangeSendInitial { selected_protocol, .. }
            | ClientConnectorState::BasicSettingsExchangeWaitResponse { selected_protocol }
            | ClientConnectorState::ChannelConnection { selected_protocol, .. }
            | ClientConnectorState::AwaitClientInfo { selected_protocol, .. }
            | ClientConnectorState::SendClientInfo { selected_protocol, .. }
            | ClientConnectorState::LicenseExchange { selected_protocol, .. } => Some(*selected_protocol),
            ClientConnectorState::Connected { result } => Some(result.selected_protocol),
            _ => None,
        }
    }

    /// The target's settings blocks, once the basic settings exchange ran.
    pub fn server_blocks(&self) -> Option<&ServerBlocks> {
        match &self.state {
            ClientConnectorState::ChannelConnection { server_blocks, .. }
            | ClientConnectorState::AwaitClientInfo { server_blocks, .. }
            | ClientConnectorState::SendClientInfo { server_blocks, .. }
            | ClientConnectorState::LicenseExchange { server_blocks, .. } => Some(server_blocks),
            ClientConnectorState::Connected { result } => Some(&result.server_blocks),
            _ => None,
        }
    }

    /// True while the sequence is paused waiting for the victim's settings
    /// blocks.
    pub fn should_provide_client_blocks(&self) -> bool {
        matches!(self.state, ClientConnectorState::AwaitClientBlocks { .. })
    }

    pub fn provide_client_blocks(&mut self, client_blocks: ClientBlocks) -> ConnectorResult<()> {
        match mem::take(&mut self.state) {
            ClientConnectorState::AwaitClientBlocks { selected_protocol } => {
                self.state = ClientConnectorState::BasicSettingsExchangeSendInitial {
                    selected_protocol,
                    client_blocks: Box::new(client_blocks),
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(general_err!("client blocks provided in an unexpected state"))
            }
        }
    }

    /// True while the sequence is paused waiting for the victim's client
    /// info PDU.
    pub fn should_provide_client_info(&self) -> bool {
        matches!(self.state, ClientConnectorState::AwaitClientInfo { .. })
    }

    pub fn provide_client_info(&mut self, client_info: ClientInfo) -> ConnectorResult<()> {
        match mem::take(&mut self.state) {
            ClientConnectorState::AwaitClientInfo {
                selected_protocol,
                server_blocks,
                io_channel_id,
                channels,
                mode,
            } => {
                self.state = ClientConnectorState::SendClientInfo {
                    selected_protocol,
                    server_blocks,
                    io_channel_id,
                    channels,
                    mode,
                    client_info: Box::new(client_info),
                };
                Ok(())
            }
            other => {
                self.state = other;
                Err(general_err!("client info provided in an unexpected state"))
            }
        }
    }

    /// Takes the finished connection out of a terminal connector.
    pub fn take_result(&mut self) -> Option<ConnectionResult> {
        match mem::take(&mut self.state) {
            ClientConnectorState::Connected { result } => Some(result),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn security_mode(
        selected_protocol: nego::SecurityProtocol,
        server_blocks: &ServerBlocks,
    ) -> ConnectorResult<SecurityMode> {
        if selected_protocol.intersects(nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID) {
            return Ok(SecurityMode::Tls);
        }

        let method = server_blocks.security.encryption_method;

        if method.is_empty() {
            Ok(SecurityMode::None)
        } else if method.contains(EncryptionMethod::FIPS) {
            Err(ConnectorError::crypto(spyglass_crypto::CryptoError::UnsupportedEncryptionMethod))
        } else if method.contains(EncryptionMethod::BIT_128) {
            Ok(SecurityMode::Legacy(KeyStrength::Bits128))
        } else if method.contains(EncryptionMethod::BIT_56) {
            Ok(SecurityMode::Legacy(KeyStrength::Bits56))
        } else {
            Ok(SecurityMode::Legacy(KeyStrength::Bits40))
        }
    }

    /// Runs the client random exchange: derive the keys, seed the RC4
    /// streams and emit the security exchange PDU.
    fn send_security_exchange(
        &mut self,
        strength: KeyStrength,
        server_blocks: &ServerBlocks,
        io_channel_id: u16,
        user_channel_id: u16,
        output: &mut WriteBuf,
    ) -> ConnectorResult<usize> {
        let server_random = server_blocks
            .security
            .server_random
            .ok_or_else(|| general_err!("encryption negotiated but no server random"))?;

        let public_key = public_key_from_certificate(&server_blocks.security.server_cert)
            .map_err(ConnectorError::crypto)?;

        let mut client_random = [0u8; RANDOM_SIZE];
        self.random.fill(&mut client_random);

        let keys = SessionKeys::derive(&client_random, &server_random, strength, KeyPerspective::Client);
        self.encryption = Some(RdpEncryption::new(keys, strength));
        self.client_random = Some(client_random);

        let exchange = SecurityExchangePdu {
            encrypted_client_random: public_key.encrypt(&client_random).map_err(ConnectorError::crypto)?,
        };

        debug!("Send Security Exchange");

        let mut user_data = encode_vec(&SecurityHeader {
            flags: SecurityHeaderFlags::EXCHANGE_PKT,
        })
        .map_err(ConnectorError::encode)?;
        user_data.extend_from_slice(&encode_vec(&exchange).map_err(ConnectorError::encode)?);

        encode_send_data_request(user_channel_id, io_channel_id, user_data, output)
    }
}

impl Sequence for ClientConnector {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint> {
        match &self.state {
            ClientConnectorState::Consumed => None,
            ClientConnectorState::ConnectionInitiationSendRequest => None,
            ClientConnectorState::ConnectionInitiationWaitConfirm { .. } => Some(&spyglass_pdu::X224_HINT),
            ClientConnectorState::EnhancedSecurityUpgrade { .. } => None,
            ClientConnectorState::AwaitClientBlocks { .. } => None,
            ClientConnectorState::BasicSettingsExchangeSendInitial { .. } => None,
            ClientConnectorState::BasicSettingsExchangeWaitResponse { .. } => Some(&spyglass_pdu::X224_HINT),
            ClientConnectorState::ChannelConnection { channel_connection, .. } => channel_connection.next_pdu_hint(),
            ClientConnectorState::AwaitClientInfo { .. } => None,
            ClientConnectorState::SendClientInfo { .. } => None,
            ClientConnectorState::LicenseExchange { .. } => Some(&spyglass_pdu::X224_HINT),
            ClientConnectorState::Connected { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written> {
        let (written, next_state) = match mem::take(&mut self.state) {
            ClientConnectorState::Consumed => return Err(general_err!("connector sequence state is consumed")),

            //== Connection Initiation ==//
            // The victim's negotiation request is forwarded as-is.
            ClientConnectorState::ConnectionInitiationSendRequest => {
                debug!("Connection Initiation");

                let connection_request = nego::ConnectionRequest {
                    nego_data: self.config.nego_data.clone(),
                    flags: self.config.request_flags,
                    protocol: self.config.requested_protocol,
                };

                debug!(message = ?connection_request, "Send");

                let written =
                    spyglass_core::encode_buf(&X224(connection_request), output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::ConnectionInitiationWaitConfirm {
                        requested_protocol: self.config.requested_protocol,
                    },
                )
            }

            ClientConnectorState::ConnectionInitiationWaitConfirm { requested_protocol } => {
                let connection_confirm = decode::<X224<nego::ConnectionConfirm>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;

                debug!(message = ?connection_confirm, "Received");

                let (flags, selected_protocol) = match connection_confirm {
                    nego::ConnectionConfirm::Response { flags, protocol } => (flags, protocol),
                    nego::ConnectionConfirm::Failure { code } => {
                        error!(?code, "Received connection failure code");
                        return Err(ConnectorError::negotiation(code));
                    }
                };

                info!(?selected_protocol, ?flags, "Server confirmed connection");

                if !selected_protocol.is_standard_rdp_security()
                    && !selected_protocol.intersects(requested_protocol)
                {
                    return Err(reason_err!(
                        "Initiation",
                        "client advertised {requested_protocol:?}, but server selected {selected_protocol:?}",
                    ));
                }

                let next_state = if selected_protocol.intersects(nego::SecurityProtocol::SSL) {
                    // Pause here: the transport performs the TLS handshake.
                    ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol }
                } else {
                    ClientConnectorState::AwaitClientBlocks { selected_protocol }
                };

                (Written::Nothing, next_state)
            }

            //== Upgrade to Enhanced RDP Security ==//
            ClientConnectorState::EnhancedSecurityUpgrade { selected_protocol } => (
                Written::Nothing,
                ClientConnectorState::AwaitClientBlocks { selected_protocol },
            ),

            // Paused until the coupler hands over the victim's settings
            // blocks.
            ClientConnectorState::AwaitClientBlocks { .. } => {
                return Err(general_err!(
                    "stepped while waiting for client blocks (use provide_client_blocks)"
                ))
            }

            //== Basic Settings Exchange ==//
            ClientConnectorState::BasicSettingsExchangeSendInitial {
                selected_protocol,
                client_blocks,
            } => {
                debug!("Basic Settings Exchange");

                let connect_initial = mcs::ConnectInitial::with_gcc_blocks(*client_blocks);

                debug!(message = ?connect_initial, "Send");

                let written = encode_x224_packet(&connect_initial, output).map_err(ConnectorError::encode)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::BasicSettingsExchangeWaitResponse { selected_protocol },
                )
            }

            ClientConnectorState::BasicSettingsExchangeWaitResponse { selected_protocol } => {
                let x224_payload = decode::<X224<spyglass_pdu::x224::X224Data<'_>>>(input)
                    .map_err(ConnectorError::decode)?
                    .0;
                let connect_response =
                    decode::<mcs::ConnectResponse>(x224_payload.data.as_ref()).map_err(ConnectorError::decode)?;

                debug!(message = ?connect_response, "Received");

                let io_channel_id = connect_response.io_channel_id();
                let channel_ids = connect_response.channel_ids();
                let server_blocks = connect_response.conference_create_response.gcc_blocks;

                debug!(?channel_ids, io_channel_id);

                (
                    Written::Nothing,
                    ClientConnectorState::ChannelConnection {
                        selected_protocol,
                        server_blocks: Box::new(server_blocks),
                        io_channel_id,
                        channel_connection: ChannelConnectionSequence::new(io_channel_id, channel_ids),
                    },
                )
            }

            //== Channel Connection ==//
            ClientConnectorState::ChannelConnection {
                selected_protocol,
                server_blocks,
                io_channel_id,
                mut channel_connection,
            } => {
                let written = channel_connection.step(input, output)?;

                match channel_connection.state {
                    ChannelConnectionState::AllJoined { channels } => {
                        let mode = Self::security_mode(selected_protocol, &server_blocks)?;

                        // In legacy mode the security exchange goes out
                        // right after the last join confirm.
                        let written = if let SecurityMode::Legacy(strength) = mode {
                            let size = self.send_security_exchange(
                                strength,
                                &server_blocks,
                                io_channel_id,
                                channels.user_channel_id,
                                output,
                            )?;
                            Written::from_size(size)?
                        } else {
                            written
                        };

                        (
                            written,
                            ClientConnectorState::AwaitClientInfo {
                                selected_protocol,
                                server_blocks,
                                io_channel_id,
                                channels,
                                mode,
                            },
                        )
                    }
                    _ => (
                        written,
                        ClientConnectorState::ChannelConnection {
                            selected_protocol,
                            server_blocks,
                            io_channel_id,
                            channel_connection,
                        },
                    ),
                }
            }

            //== Secure Settings Exchange ==//
            // Paused until the coupler hands over the victim's client info.
            ClientConnectorState::AwaitClientInfo { .. } => {
                return Err(general_err!(
                    "stepped while waiting for client info (use provide_client_info)"
                ))
            }

            ClientConnectorState::SendClientInfo {
                selected_protocol,
                server_blocks,
                io_channel_id,
                channels,
                mode,
                client_info,
            } => {
                debug!("Send Client Info");

                let plaintext = encode_vec(client_info.as_ref()).map_err(ConnectorError::encode)?;

                let user_data = match (&mode, self.encryption.as_mut()) {
                    (SecurityMode::Legacy(_), Some(encryption)) => {
                        let mut data = encode_vec(&SecurityHeader {
                            flags: SecurityHeaderFlags::INFO_PKT | SecurityHeaderFlags::ENCRYPT,
                        })
                        .map_err(ConnectorError::encode)?;
                        let (signature, ciphertext) = encryption.encrypt(&plaintext);
                        data.extend_from_slice(&signature);
                        data.extend_from_slice(&ciphertext);
                        data
                    }
                    _ => {
                        let mut data = encode_vec(&SecurityHeader {
                            flags: SecurityHeaderFlags::INFO_PKT,
                        })
                        .map_err(ConnectorError::encode)?;
                        data.extend_from_slice(&plaintext);
                        data
                    }
                };

                let written =
                    encode_send_data_request(channels.user_channel_id, io_channel_id, user_data, output)?;

                (
                    Written::from_size(written)?,
                    ClientConnectorState::LicenseExchange {
                        selected_protocol,
                        server_blocks,
                        io_channel_id,
                        channels,
                        mode,
                    },
                )
            }

            //== Licensing ==//
            // Accept licensing PDUs until the server reports a valid client
            // or grants a license.
            ClientConnectorState::LicenseExchange {
                selected_protocol,
                server_blocks,
                io_channel_id,
                channels,
                mode,
            } => {
                let mcs_msg = decode::<X224<mcs::McsMessage<'_>>>(input).map_err(ConnectorError::decode)?.0;

                let indication = match mcs_msg {
                    mcs::McsMessage::SendDataIndication(msg) => msg,
                    mcs::McsMessage::DisconnectProviderUltimatum(msg) => {
                        return Err(reason_err!(
                            "LicenseExchange",
                            "server disconnected during licensing: {}",
                            msg.reason,
                        ))
                    }
                    _ => return Err(general_err!("unexpected MCS message during licensing")),
                };

                let mut payload = spyglass_core::ReadCursor::new(indication.user_data.as_ref());
                let security_header =
                    spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).map_err(ConnectorError::decode)?;

                if !security_header.flags.contains(SecurityHeaderFlags::LICENSE_PKT) {
                    return Err(general_err!("expected a licensing PDU"));
                }

                let body = if security_header.flags.contains(SecurityHeaderFlags::ENCRYPT) {
                    let encryption = self
                        .encryption
                        .as_mut()
                        .ok_or_else(|| general_err!("encrypted licensing PDU without encryption state"))?;

                    let mut signature = [0u8; spyglass_crypto::MAC_SIGNATURE_SIZE];
                    if payload.len() < signature.len() {
                        return Err(general_err!("encrypted licensing PDU too short"));
                    }
                    let signature_len = signature.len();
                    signature.copy_from_slice(payload.read_slice(signature_len));
                    encryption
                        .decrypt_verify(&signature, payload.read_remaining())
                        .map_err(ConnectorError::crypto)?
                } else {
                    payload.read_remaining().to_vec()
                };

                let license_pdu = decode::<rdp::license::LicensePdu>(&body).map_err(ConnectorError::decode)?;

                debug!(message_type = ?license_pdu.header.message_type, "Received licensing PDU");

                let complete = match license_pdu.header.message_type {
                    PreambleType::ErrorAlert => license_pdu
                        .as_error_alert()
                        .map(|alert| alert.is_valid_client())
                        .unwrap_or(false),
                    PreambleType::NewLicense => true,
                    _ => {
                        return Err(reason_err!(
                            "LicenseExchange",
                            "server demands a license exchange ({:?}), which is not supported",
                            license_pdu.header.message_type,
                        ))
                    }
                };

                if complete {
                    info!("Licensing complete");

                    let result = ConnectionResult {
                        io_channel_id,
                        user_channel_id: channels.user_channel_id,
                        channels,
                        server_blocks: *server_blocks,
                        selected_protocol,
                        security: match mode {
                            SecurityMode::None => SecuritySession::None,
                            SecurityMode::Tls => SecuritySession::Tls {
                                security_header_expected: false,
                            },
                            SecurityMode::Legacy(_) => SecuritySession::Legacy {
                                encryption: self
                                    .encryption
                                    .take()
                                    .ok_or_else(|| general_err!("legacy mode without encryption state"))?,
                            },
                        },
                        client_random: self.client_random,
                    };

                    (Written::Nothing, ClientConnectorState::Connected { result })
                } else {
                    (
                        Written::Nothing,
                        ClientConnectorState::LicenseExchange {
                            selected_protocol,
                            server_blocks,
                            io_channel_id,
                            channels,
                            mode,
                        },
                    )
                }
            }

            ClientConnectorState::Connected { .. } => return Err(general_err!("already connected")),
        };

        self.state = next_state;

        Ok(written)
    }
}

/// Wraps `user_data` into an MCS SendDataRequest inside an X.224 Data TPDU.
pub fn encode_send_data_request(
    initiator_id: u16,
    channel_id: u16,
    user_data: Vec<u8>,
    output: &mut WriteBuf,
) -> ConnectorResult<usize> {
    let pdu = mcs::SendDataRequest {
        initiator_id,
        channel_id,
        user_data: Cow::Owned(user_data),
    };

    spyglass_core::encode_buf(&X224(pdu), output).map_err(ConnectorError::encode)
}

/// Wraps `user_data` into an MCS SendDataIndication inside an X.224 Data TPDU.
pub fn encode_send_data_indication(
    initiator_id: u16,
    channel_id: u16,
    user_data: Vec<u8>,
    output: &mut WriteBuf,
) -> ConnectorResult<usize> {
    let pdu = mcs::SendDataIndication {
        initiator_id,
        channel_id,
        user_data: Cow::Owned(user_data),
    };

    spyglass_core::encode_buf(&X224(pdu), output).map_err(ConnectorError::encode)
}
