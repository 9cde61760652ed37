//! Whole-proxy test: a scripted client and a scripted server on in-memory
//! transports, with the proxy relaying a legacy-security session between
//! them and recording the decrypted traffic.

use std::borrow::Cow;
use std::io;
use std::sync::mpsc;

use spyglass_async::TokioFramed;
use spyglass_core::{decode, encode_vec, ReadCursor, WriteBuf};
use spyglass_crypto::{
    public_key_from_certificate, proprietary_certificate, KeyPerspective, KeyStrength, RdpEncryption, SessionKeys,
};
use spyglass_mitm::{
    handshake_begin, parse_record, Handshake, NoopObserver, RecordKind, Recorder, RecorderSink, SessionConfig,
};
use spyglass_pdu::rdp::license::LicensePdu;
use spyglass_pdu::rdp::vc::ChannelPduHeader;
use spyglass_pdu::rdp::{ClientInfo, SecurityExchangePdu, SecurityHeader, SecurityHeaderFlags};
use spyglass_pdu::x224::X224;
use spyglass_pdu::{mcs, nego, Action};
use spyglass_testsuite::{client_blocks, server_blocks_legacy, test_rsa_key};
use tokio::io::DuplexStream;

const MITM_SERVER_RANDOM: [u8; 32] = [0x3C; 32];
const TARGET_SERVER_RANDOM: [u8; 32] = [0x5A; 32];
const VICTIM_CLIENT_RANDOM: [u8; 32] = [0x01; 32];

const IO_CHANNEL: u16 = 1003;
const CLIP_CHANNEL: u16 = 1004;
const SND_CHANNEL: u16 = 1005;
const DR_CHANNEL: u16 = 1006;

type Endpoint = TokioFramed<DuplexStream>;

struct ChannelSink(mpsc::Sender<Vec<u8>>);

impl RecorderSink for ChannelSink {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.0
            .send(record.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver gone"))
    }
}

fn frame<'de, T>(pdu: T) -> Vec<u8>
where
    T: spyglass_pdu::x224::X224Pdu<'de>,
{
    encode_vec(&X224(pdu)).expect("encode")
}

fn x224_data_frame<T: spyglass_core::Encode>(pdu: &T) -> Vec<u8> {
    let mut buf = WriteBuf::new();
    spyglass_pdu::encode_x224_packet(pdu, &mut buf).expect("encode x224 data");
    buf.filled().to_vec()
}

fn encrypted_user_data(crypto: &mut RdpEncryption, flags: SecurityHeaderFlags, plaintext: &[u8]) -> Vec<u8> {
    let mut data = encode_vec(&SecurityHeader {
        flags: flags | SecurityHeaderFlags::ENCRYPT,
    })
    .expect("header");
    let (signature, ciphertext) = crypto.encrypt(plaintext);
    data.extend_from_slice(&signature);
    data.extend_from_slice(&ciphertext);
    data
}

fn decrypt_user_data(crypto: &mut RdpEncryption, user_data: &[u8]) -> (SecurityHeaderFlags, Vec<u8>) {
    let mut cursor = ReadCursor::new(user_data);
    let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut cursor).expect("security header");

    if header.flags.contains(SecurityHeaderFlags::ENCRYPT) {
        let mut signature = [0u8; spyglass_crypto::MAC_SIGNATURE_SIZE];
        let signature_len = signature.len();
        signature.copy_from_slice(cursor.read_slice(signature_len));
        let plaintext = crypto.decrypt_verify(&signature, cursor.read_remaining()).expect("mac");
        (header.flags, plaintext)
    } else {
        (header.flags, cursor.read_remaining().to_vec())
    }
}

fn clipboard_pdu(msg_type: u16, data: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::new();
    pdu.extend_from_slice(&msg_type.to_le_bytes());
    pdu.extend_from_slice(&0u16.to_le_bytes());
    pdu.extend_from_slice(&(data.len() as u32).to_le_bytes());
    pdu.extend_from_slice(data);

    let mut payload = encode_vec(&ChannelPduHeader::single_chunk(pdu.len() as u32)).expect("chunk header");
    payload.extend_from_slice(&pdu);
    payload
}

async fn read_x224_message(endpoint: &mut Endpoint) -> mcs::McsMessage<'static> {
    let (action, bytes) = endpoint.read_pdu().await.expect("read frame");
    assert_eq!(action, Action::X224);
    decode::<X224<mcs::McsMessage<'_>>>(&bytes).expect("mcs message").0.into_owned()
}

async fn read_send_data_request(endpoint: &mut Endpoint) -> mcs::SendDataRequest<'static> {
    match read_x224_message(endpoint).await {
        mcs::McsMessage::SendDataRequest(msg) => msg,
        other => panic!("expected SendDataRequest, got {other:?}"),
    }
}

async fn read_send_data_indication(endpoint: &mut Endpoint) -> mcs::SendDataIndication<'static> {
    match read_x224_message(endpoint).await {
        mcs::McsMessage::SendDataIndication(msg) => msg,
        other => panic!("expected SendDataIndication, got {other:?}"),
    }
}

/// The intercepted client.
async fn victim_script(mut endpoint: Endpoint) {
    // Connection initiation, standard RDP security.
    endpoint
        .write_all(&frame(nego::ConnectionRequest {
            nego_data: Some(nego::NegoRequestData::cookie("victim".to_owned())),
            flags: nego::RequestFlags::empty(),
            protocol: nego::SecurityProtocol::RDP,
        }))
        .await
        .expect("send request");

    let (_, bytes) = endpoint.read_pdu().await.expect("confirm");
    let confirm = decode::<X224<nego::ConnectionConfirm>>(&bytes).expect("confirm").0;
    match confirm {
        nego::ConnectionConfirm::Response { protocol, .. } => {
            assert_eq!(protocol, nego::SecurityProtocol::RDP);
        }
        other => panic!("unexpected confirm: {other:?}"),
    }

    // Basic settings exchange.
    let connect_initial = mcs::ConnectInitial::with_gcc_blocks(client_blocks(&["cliprdr", "rdpsnd", "rdpdr"]));
    endpoint
        .write_all(&x224_data_frame(&connect_initial))
        .await
        .expect("send connect initial");

    let (_, bytes) = endpoint.read_pdu().await.expect("connect response");
    let payload = decode::<X224<spyglass_pdu::x224::X224Data<'_>>>(&bytes).expect("x224 data").0;
    let connect_response = decode::<mcs::ConnectResponse>(payload.data.as_ref()).expect("connect response");

    let security = connect_response
        .conference_create_response
        .gcc_blocks
        .security
        .clone();
    assert_eq!(connect_response.io_channel_id(), IO_CHANNEL);

    // The random and certificate must be the proxy's, not the target's.
    let server_random = security.server_random.expect("server random");
    assert_eq!(server_random, MITM_SERVER_RANDOM);
    let public_key = public_key_from_certificate(&security.server_cert).expect("certificate");

    // MCS domain setup.
    endpoint
        .write_all(&frame(mcs::ErectDomainPdu {
            sub_height: 0,
            sub_interval: 0,
        }))
        .await
        .expect("erect");
    endpoint.write_all(&frame(mcs::AttachUserRequest)).await.expect("attach");

    let attach_confirm = match read_x224_message(&mut endpoint).await {
        mcs::McsMessage::AttachUserConfirm(msg) => msg,
        other => panic!("expected AttachUserConfirm, got {other:?}"),
    };
    let user_id = attach_confirm.initiator_id;

    for channel_id in [IO_CHANNEL, CLIP_CHANNEL, SND_CHANNEL, DR_CHANNEL] {
        endpoint
            .write_all(&frame(mcs::ChannelJoinRequest {
                initiator_id: user_id,
                channel_id,
            }))
            .await
            .expect("join");

        let confirm = match read_x224_message(&mut endpoint).await {
            mcs::McsMessage::ChannelJoinConfirm(msg) => msg,
            other => panic!("expected ChannelJoinConfirm, got {other:?}"),
        };
        assert_eq!(confirm.result, 0);
        assert_eq!(confirm.channel_id, channel_id);
    }

    // Security exchange against the proxy key, then keys and streams.
    let mut crypto = RdpEncryption::new(
        SessionKeys::derive(
            &VICTIM_CLIENT_RANDOM,
            &server_random,
            KeyStrength::Bits128,
            KeyPerspective::Client,
        ),
        KeyStrength::Bits128,
    );

    let exchange = SecurityExchangePdu {
        encrypted_client_random: public_key.encrypt(&VICTIM_CLIENT_RANDOM).expect("rsa"),
    };
    let mut user_data = encode_vec(&SecurityHeader {
        flags: SecurityHeaderFlags::EXCHANGE_PKT,
    })
    .expect("header");
    user_data.extend_from_slice(&encode_vec(&exchange).expect("exchange"));

    endpoint
        .write_all(&frame(mcs::SendDataRequest {
            initiator_id: user_id,
            channel_id: IO_CHANNEL,
            user_data: Cow::Owned(user_data),
        }))
        .await
        .expect("security exchange");

    // Encrypted client info.
    let client_info = ClientInfo::new("victim", "hunter2", "CONTOSO");
    let info_data = encrypted_user_data(
        &mut crypto,
        SecurityHeaderFlags::INFO_PKT,
        &encode_vec(&client_info).expect("client info"),
    );
    endpoint
        .write_all(&frame(mcs::SendDataRequest {
            initiator_id: user_id,
            channel_id: IO_CHANNEL,
            user_data: Cow::Owned(info_data),
        }))
        .await
        .expect("client info");

    // Valid-client licensing answer.
    let indication = read_send_data_indication(&mut endpoint).await;
    let mut payload = ReadCursor::new(indication.user_data.as_ref());
    let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).expect("security header");
    assert!(header.flags.contains(SecurityHeaderFlags::LICENSE_PKT));
    let license = decode::<LicensePdu>(payload.read_remaining()).expect("license");
    assert!(license.as_error_alert().expect("alert").is_valid_client());

    // Active: one input event, one clipboard format list, and noise on the
    // channel the target refused.
    for (channel_id, plaintext) in [
        (IO_CHANNEL, b"INPUT-EVENT".to_vec()),
        (CLIP_CHANNEL, clipboard_pdu(0x0002, &[])),
        (SND_CHANNEL, b"SND-NOISE".to_vec()),
    ] {
        let user_data = encrypted_user_data(&mut crypto, SecurityHeaderFlags::empty(), &plaintext);
        endpoint
            .write_all(&frame(mcs::SendDataRequest {
                initiator_id: user_id,
                channel_id,
                user_data: Cow::Owned(user_data),
            }))
            .await
            .expect("relay send");
    }

    // Output and clipboard response come back re-encrypted for this side.
    let indication = read_send_data_indication(&mut endpoint).await;
    assert_eq!(indication.channel_id, IO_CHANNEL);
    let (_, plaintext) = decrypt_user_data(&mut crypto, indication.user_data.as_ref());
    assert_eq!(plaintext, b"OUTPUT-UPDATE");

    let indication = read_send_data_indication(&mut endpoint).await;
    assert_eq!(indication.channel_id, CLIP_CHANNEL);
    let (_, plaintext) = decrypt_user_data(&mut crypto, indication.user_data.as_ref());
    assert_eq!(plaintext, clipboard_pdu(0x0005, b"ABC\0"));

    // The target hung up; the ultimatum is relayed through.
    match read_x224_message(&mut endpoint).await {
        mcs::McsMessage::DisconnectProviderUltimatum(_) => {}
        other => panic!("expected DisconnectProviderUltimatum, got {other:?}"),
    }
}

/// The real server behind the proxy.
async fn target_script(mut endpoint: Endpoint) {
    let rsa_key = test_rsa_key();

    // The proxy forwards the victim's request untouched.
    let (_, bytes) = endpoint.read_pdu().await.expect("request");
    let request = decode::<X224<nego::ConnectionRequest>>(&bytes).expect("request").0;
    assert_eq!(request.protocol, nego::SecurityProtocol::RDP);
    assert_eq!(
        request.nego_data,
        Some(nego::NegoRequestData::cookie("victim".to_owned()))
    );

    endpoint
        .write_all(&frame(nego::ConnectionConfirm::Response {
            flags: nego::ResponseFlags::empty(),
            protocol: nego::SecurityProtocol::RDP,
        }))
        .await
        .expect("confirm");

    // The victim's settings blocks cross the proxy unchanged.
    let (_, bytes) = endpoint.read_pdu().await.expect("connect initial");
    let payload = decode::<X224<spyglass_pdu::x224::X224Data<'_>>>(&bytes).expect("x224 data").0;
    let connect_initial = decode::<mcs::ConnectInitial>(payload.data.as_ref()).expect("connect initial");

    let names: Vec<String> = connect_initial
        .channel_names()
        .iter()
        .filter_map(|def| def.name.as_str().map(str::to_owned))
        .collect();
    assert_eq!(names, ["cliprdr", "rdpsnd", "rdpdr"]);
    assert_eq!(
        connect_initial.conference_create_request.gcc_blocks.core.client_name(),
        "TESTBOX"
    );

    let server_blocks = server_blocks_legacy(
        IO_CHANNEL,
        &[CLIP_CHANNEL, SND_CHANNEL, DR_CHANNEL],
        TARGET_SERVER_RANDOM,
        proprietary_certificate(&rsa_key.public_key()),
    );
    endpoint
        .write_all(&x224_data_frame(&mcs::ConnectResponse {
            conference_create_response: spyglass_pdu::gcc::ConferenceCreateResponse {
                user_id: 1002,
                gcc_blocks: server_blocks,
            },
            called_connect_id: 0,
            domain_parameters: mcs::DomainParameters::target(),
        }))
        .await
        .expect("connect response");

    // MCS domain setup from the proxy's outbound connector.
    match read_x224_message(&mut endpoint).await {
        mcs::McsMessage::ErectDomainRequest(_) => {}
        other => panic!("expected ErectDomainRequest, got {other:?}"),
    }
    match read_x224_message(&mut endpoint).await {
        mcs::McsMessage::AttachUserRequest(_) => {}
        other => panic!("expected AttachUserRequest, got {other:?}"),
    }

    let user_id = 1007;
    endpoint
        .write_all(&frame(mcs::AttachUserConfirm {
            result: 0,
            initiator_id: user_id,
        }))
        .await
        .expect("attach confirm");

    // Serialized joins, I/O first; rdpsnd is refused.
    for expected in [IO_CHANNEL, CLIP_CHANNEL, SND_CHANNEL, DR_CHANNEL] {
        let join = match read_x224_message(&mut endpoint).await {
            mcs::McsMessage::ChannelJoinRequest(msg) => msg,
            other => panic!("expected ChannelJoinRequest, got {other:?}"),
        };
        assert_eq!(join.channel_id, expected);

        let result = if expected == SND_CHANNEL { 14 } else { 0 };
        endpoint
            .write_all(&frame(mcs::ChannelJoinConfirm {
                result,
                initiator_id: user_id,
                requested_channel_id: expected,
                channel_id: expected,
            }))
            .await
            .expect("join confirm");
    }

    // Security exchange: recover the proxy's client random.
    let request = read_send_data_request(&mut endpoint).await;
    let mut payload = ReadCursor::new(request.user_data.as_ref());
    let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).expect("security header");
    assert!(header.flags.contains(SecurityHeaderFlags::EXCHANGE_PKT));
    let exchange = spyglass_core::decode_cursor::<SecurityExchangePdu>(&mut payload).expect("exchange");

    let proxy_random = rsa_key.decrypt(&exchange.encrypted_client_random, 32).expect("rsa");
    let mut proxy_random_fixed = [0u8; 32];
    proxy_random_fixed.copy_from_slice(&proxy_random);

    let mut crypto = RdpEncryption::new(
        SessionKeys::derive(
            &proxy_random_fixed,
            &TARGET_SERVER_RANDOM,
            KeyStrength::Bits128,
            KeyPerspective::Server,
        ),
        KeyStrength::Bits128,
    );

    // The victim's credentials come through the proxy.
    let request = read_send_data_request(&mut endpoint).await;
    let (flags, plaintext) = decrypt_user_data(&mut crypto, request.user_data.as_ref());
    assert!(flags.contains(SecurityHeaderFlags::INFO_PKT));
    let client_info = decode::<ClientInfo>(&plaintext).expect("client info");
    assert_eq!(client_info.username, "victim");
    assert_eq!(client_info.password, "hunter2");

    // No license dance needed.
    let mut user_data = encode_vec(&SecurityHeader {
        flags: SecurityHeaderFlags::LICENSE_PKT,
    })
    .expect("header");
    user_data.extend_from_slice(
        &encode_vec(
            &LicensePdu::error_alert(&spyglass_pdu::rdp::license::LicensingErrorMessage::valid_client())
                .expect("license"),
        )
        .expect("license bytes"),
    );
    endpoint
        .write_all(&frame(mcs::SendDataIndication {
            initiator_id: user_id,
            channel_id: IO_CHANNEL,
            user_data: Cow::Owned(user_data),
        }))
        .await
        .expect("license error");

    // Relay phase: the input event and the clipboard list arrive, the
    // refused-channel noise never does.
    let request = read_send_data_request(&mut endpoint).await;
    assert_eq!(request.channel_id, IO_CHANNEL);
    let (_, plaintext) = decrypt_user_data(&mut crypto, request.user_data.as_ref());
    assert_eq!(plaintext, b"INPUT-EVENT");

    let request = read_send_data_request(&mut endpoint).await;
    assert_eq!(request.channel_id, CLIP_CHANNEL);
    let (_, plaintext) = decrypt_user_data(&mut crypto, request.user_data.as_ref());
    assert_eq!(plaintext, clipboard_pdu(0x0002, &[]));

    // Answer with a display update and the clipboard data.
    for (channel_id, plaintext) in [
        (IO_CHANNEL, b"OUTPUT-UPDATE".to_vec()),
        (CLIP_CHANNEL, clipboard_pdu(0x0005, b"ABC\0")),
    ] {
        let user_data = encrypted_user_data(&mut crypto, SecurityHeaderFlags::empty(), &plaintext);
        endpoint
            .write_all(&frame(mcs::SendDataIndication {
                initiator_id: user_id,
                channel_id,
                user_data: Cow::Owned(user_data),
            }))
            .await
            .expect("relay send");
    }

    // Hang up; the proxy shuts the victim side down symmetrically.
    endpoint
        .write_all(&frame(mcs::DisconnectProviderUltimatum::from_reason(
            mcs::DisconnectReason::UserRequested,
        )))
        .await
        .expect("ultimatum");
}

#[tokio::test]
async fn legacy_session_is_relayed_and_recorded() {
    let (victim_io, victim_mitm_io) = tokio::io::duplex(1 << 16);
    let (target_mitm_io, target_io) = tokio::io::duplex(1 << 16);

    let (tx, rx) = mpsc::channel();
    let recorder = Recorder::new(vec![Box::new(ChannelSink(tx))]);

    let victim = tokio::spawn(victim_script(TokioFramed::<DuplexStream>::new(victim_io)));
    let target = tokio::spawn(target_script(TokioFramed::<DuplexStream>::new(target_io)));

    let mitm = async move {
        let config = SessionConfig {
            friendly_name: "e2e".to_owned(),
            server_random: MITM_SERVER_RANDOM,
            rsa_key: test_rsa_key(),
        };

        let handshake = handshake_begin(
            TokioFramed::<DuplexStream>::new(victim_mitm_io),
            TokioFramed::<DuplexStream>::new(target_mitm_io),
            config,
        )
        .await
        .expect("handshake");

        let Handshake::Established(session, victim_framed, target_framed) = handshake else {
            panic!("unexpected TLS upgrade in a standard security session");
        };

        assert_eq!(session.friendly_name(), "e2e");
        assert_eq!(session.victim_username(), "victim");

        session
            .run(victim_framed, target_framed, recorder, &mut NoopObserver)
            .await
            .expect("relay");
    };

    let (victim_result, target_result, ()) = tokio::join!(victim, target, mitm);
    victim_result.expect("victim script");
    target_result.expect("target script");

    // The transcript holds the decrypted traffic in observation order, with
    // monotonic timestamps, ending in a normal CLOSE record.
    let raw: Vec<Vec<u8>> = rx.try_iter().collect();
    let records: Vec<(RecordKind, u64, Vec<u8>)> = raw
        .iter()
        .map(|bytes| {
            let ((kind, timestamp, payload), rest) = parse_record(bytes).expect("record");
            assert!(rest.is_empty());
            (kind, timestamp, payload.to_vec())
        })
        .collect();

    let kinds: Vec<RecordKind> = records.iter().map(|(kind, _, _)| *kind).collect();
    assert_eq!(
        kinds,
        [
            RecordKind::Input,
            RecordKind::Clipboard,
            RecordKind::Output,
            RecordKind::Clipboard,
            RecordKind::Close,
        ]
    );

    assert_eq!(records[0].2, b"INPUT-EVENT");
    assert_eq!(records[2].2, b"OUTPUT-UPDATE");
    assert_eq!(records[3].2, clipboard_pdu(0x0005, b"ABC\0"));

    let timestamps: Vec<u64> = records.iter().map(|(_, timestamp, _)| *timestamp).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));

    // The CLOSE record reports a normal end and no recorder overflow.
    let close_payload = &records[4].2;
    assert_eq!(&close_payload[..2], &0u16.to_le_bytes());
    assert_eq!(&close_payload[4..8], &0u32.to_le_bytes());
}
