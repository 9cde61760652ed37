//! Handshake orchestration: runs the two connection sequences in lockstep,
//! pausing each one where it needs data learned from the other side.

use spyglass_acceptor::{Acceptor, AcceptorConfig};
use spyglass_async::{single_sequence_step, Framed, FramedRead, FramedWrite, StreamWrapper};
use spyglass_connector::{
    ClientConfig, ClientConnector, ConnectorErrorKind, OsRandom, Sequence as _, State as _,
};
use spyglass_core::WriteBuf;
use spyglass_crypto::{RsaPrivateKey, RANDOM_SIZE};

use crate::relay::{EstablishedSession, SideState};
use crate::{from_connector_error, session_general_err, ChannelMap, SessionResult};

/// Session-level configuration the embedding process provides.
pub struct SessionConfig {
    /// Name used to correlate log lines and recordings of this session.
    pub friendly_name: String,
    /// The proxy's own server random for the victim-side legacy handshake.
    pub server_random: [u8; RANDOM_SIZE],
    /// RSA key backing the proxy certificate shown to the victim.
    pub rsa_key: RsaPrivateKey,
}

/// Progress of [`handshake_begin`].
pub enum Handshake<V: StreamWrapper, T: StreamWrapper> {
    /// Both handshakes completed without a transport upgrade.
    Established(Box<EstablishedSession>, Framed<V>, Framed<T>),
    /// TLS was selected: the embedder must upgrade both raw streams and
    /// resume with [`handshake_finish`].
    ShouldUpgrade {
        victim: V::InnerStream,
        target: T::InnerStream,
        resume: HandshakeResume,
    },
}

/// Mid-handshake state carried across a TLS upgrade.
pub struct HandshakeResume {
    acceptor: Acceptor,
    connector: ClientConnector,
    friendly_name: String,
}

/// Starts a session: reads the victim's connection request, opens the
/// negotiation with the target, and either runs the rest of the handshake
/// (plain and legacy-security sessions) or hands control back for the TLS
/// upgrade.
pub async fn handshake_begin<V, T>(
    mut victim: Framed<V>,
    mut target: Framed<T>,
    config: SessionConfig,
) -> SessionResult<Handshake<V, T>>
where
    V: FramedRead + FramedWrite + StreamWrapper,
    T: FramedRead + FramedWrite + StreamWrapper,
{
    let mut buf = WriteBuf::new();

    let mut acceptor = Acceptor::new(AcceptorConfig {
        server_random: config.server_random,
        rsa_key: config.rsa_key,
    });

    // Victim: X.224 connection request.
    single_sequence_step(&mut victim, &mut acceptor, &mut buf)
        .await
        .map_err(from_connector_error)?;

    let request = acceptor
        .connection_request()
        .cloned()
        .ok_or_else(|| session_general_err("no connection request after the first step"))?;

    info!(name = %config.friendly_name, protocol = ?request.protocol, "Intercepted connection request");

    let mut connector = ClientConnector::new(
        ClientConfig {
            nego_data: request.nego_data,
            request_flags: request.flags,
            requested_protocol: request.protocol,
        },
        Box::new(OsRandom),
    );

    // Target: send the request, read the confirm.
    single_sequence_step(&mut target, &mut connector, &mut buf)
        .await
        .map_err(from_connector_error)?;

    if let Err(error) = single_sequence_step(&mut target, &mut connector, &mut buf).await {
        // A negotiation failure is propagated to the victim before closing.
        if let ConnectorErrorKind::Negotiation(code) = error.kind() {
            warn!(?code, "Target refused the negotiation, forwarding the failure");
            acceptor
                .provide_negotiation_failure(*code)
                .map_err(from_connector_error)?;
            single_sequence_step(&mut victim, &mut acceptor, &mut buf)
                .await
                .map_err(from_connector_error)?;
        }
        return Err(from_connector_error(error));
    }

    let selected_protocol = connector
        .selected_protocol()
        .ok_or_else(|| session_general_err("no selected protocol after the confirm"))?;

    // Victim: mirror the confirm.
    acceptor
        .provide_selected_protocol(selected_protocol)
        .map_err(from_connector_error)?;
    single_sequence_step(&mut victim, &mut acceptor, &mut buf)
        .await
        .map_err(from_connector_error)?;

    if connector.should_perform_security_upgrade() {
        debug_assert!(acceptor.should_perform_security_upgrade());

        return Ok(Handshake::ShouldUpgrade {
            victim: victim.into_inner_no_leftover(),
            target: target.into_inner_no_leftover(),
            resume: HandshakeResume {
                acceptor,
                connector,
                friendly_name: config.friendly_name,
            },
        });
    }

    let (session, victim, target) = handshake_run(victim, target, acceptor, connector, config.friendly_name).await?;

    Ok(Handshake::Established(Box::new(session), victim, target))
}

/// Resumes after the embedder upgraded both transports to TLS.
pub async fn handshake_finish<V, T>(
    victim: Framed<V>,
    target: Framed<T>,
    resume: HandshakeResume,
) -> SessionResult<(EstablishedSession, Framed<V>, Framed<T>)>
where
    V: FramedRead + FramedWrite + StreamWrapper,
    T: FramedRead + FramedWrite + StreamWrapper,
{
    let HandshakeResume {
        mut acceptor,
        mut connector,
        friendly_name,
    } = resume;

    connector.mark_security_upgrade_as_done().map_err(from_connector_error)?;
    acceptor.mark_security_upgrade_as_done().map_err(from_connector_error)?;

    handshake_run(victim, target, acceptor, connector, friendly_name).await
}

async fn handshake_run<V, T>(
    mut victim: Framed<V>,
    mut target: Framed<T>,
    mut acceptor: Acceptor,
    mut connector: ClientConnector,
    friendly_name: String,
) -> SessionResult<(EstablishedSession, Framed<V>, Framed<T>)>
where
    V: FramedRead + FramedWrite + StreamWrapper,
    T: FramedRead + FramedWrite + StreamWrapper,
{
    let mut buf = WriteBuf::new();

    // Victim: Connect-Initial, capturing its settings blocks.
    while !acceptor.should_provide_server_blocks() {
        single_sequence_step(&mut victim, &mut acceptor, &mut buf)
            .await
            .map_err(from_connector_error)?;
    }

    let client_blocks = acceptor
        .client_blocks()
        .cloned()
        .ok_or_else(|| session_general_err("no client blocks captured"))?;

    // Target: forward the blocks, run MCS, channel joins, security exchange.
    connector
        .provide_client_blocks(client_blocks.clone())
        .map_err(from_connector_error)?;

    while !connector.should_provide_client_info() {
        single_sequence_step(&mut target, &mut connector, &mut buf)
            .await
            .map_err(from_connector_error)?;
    }

    let server_blocks = connector
        .server_blocks()
        .cloned()
        .ok_or_else(|| session_general_err("no server blocks captured"))?;

    // Victim: Connect-Response mirroring the target's blocks, joins,
    // security exchange, client info and the synthetic license answer.
    acceptor
        .provide_server_blocks(server_blocks.clone())
        .map_err(from_connector_error)?;

    while !acceptor.state().is_terminal() {
        single_sequence_step(&mut victim, &mut acceptor, &mut buf)
            .await
            .map_err(from_connector_error)?;
    }

    let acceptor_result = acceptor
        .take_result()
        .ok_or_else(|| session_general_err("victim handshake failed"))?;

    // Target: forward the victim's client info and wait out licensing.
    connector
        .provide_client_info(acceptor_result.client_info.clone())
        .map_err(from_connector_error)?;

    while !connector.state().is_terminal() {
        single_sequence_step(&mut target, &mut connector, &mut buf)
            .await
            .map_err(from_connector_error)?;
    }

    let connection_result = connector
        .take_result()
        .ok_or_else(|| session_general_err("target handshake failed"))?;

    info!(
        name = %friendly_name,
        victim_user = acceptor_result.user_channel_id,
        target_user = connection_result.user_channel_id,
        "Both handshakes complete, relaying"
    );

    let definitions = client_blocks.channel_names();

    // Channel ids are assigned per side; both maps key by name. The victim
    // side saw the relayed copy of the target's NETWORK block, so its ids
    // come from the same list.
    let channel_ids = server_blocks.channel_ids();

    let victim_side = SideState::new(
        acceptor_result.security,
        acceptor_result.user_channel_id,
        ChannelMap::new(acceptor_result.io_channel_id, &definitions, &channel_ids),
        Vec::new(),
    );

    let target_side = SideState::new(
        connection_result.security,
        connection_result.user_channel_id,
        ChannelMap::new(connection_result.io_channel_id, &definitions, &channel_ids),
        connection_result.channels.refused.clone(),
    );

    let session = EstablishedSession::new(
        friendly_name,
        victim_side,
        target_side,
        acceptor_result.client_info.username.clone(),
    );

    Ok((session, victim, target))
}
