//! The victim-facing handshake in legacy security mode, driven end to end
//! with frames a real client would send.

use spyglass_acceptor::{Acceptor, AcceptorConfig, SecuritySession, Sequence as _, State as _};
use spyglass_core::{decode, encode_vec, ReadCursor, WriteBuf};
use spyglass_crypto::{public_key_from_certificate, KeyPerspective, KeyStrength, RdpEncryption, SessionKeys};
use spyglass_pdu::gcc::EncryptionMethod;
use spyglass_pdu::rdp::license::LicensePdu;
use spyglass_pdu::rdp::{ClientInfo, SecurityExchangePdu, SecurityHeader, SecurityHeaderFlags};
use spyglass_pdu::x224::X224;
use spyglass_pdu::{mcs, nego};
use spyglass_testsuite::{client_blocks, server_blocks_legacy, test_rsa_key};
use std::borrow::Cow;

const SERVER_RANDOM: [u8; 32] = [0x5A; 32];
const CLIENT_RANDOM: [u8; 32] = [0x01; 32];

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

fn send_data_request_frame(initiator_id: u16, channel_id: u16, user_data: Vec<u8>) -> Vec<u8> {
    frame(mcs::SendDataRequest {
        initiator_id,
        channel_id,
        user_data: Cow::Owned(user_data),
    })
}

#[test]
fn legacy_handshake_from_connection_request_to_license_error() {
    let mut acceptor = Acceptor::new(AcceptorConfig {
        server_random: SERVER_RANDOM,
        rsa_key: test_rsa_key(),
    });
    let mut buf = WriteBuf::new();

    // X.224 connection request, standard RDP security.
    buf.clear();
    acceptor
        .step(
            &frame(nego::ConnectionRequest {
                nego_data: Some(nego::NegoRequestData::cookie("victim".to_owned())),
                flags: nego::RequestFlags::empty(),
                protocol: nego::SecurityProtocol::RDP,
            }),
            &mut buf,
        )
        .expect("connection request");

    assert!(acceptor.should_select_protocol());
    assert_eq!(
        acceptor.connection_request().expect("request captured").protocol,
        nego::SecurityProtocol::RDP
    );

    acceptor
        .provide_selected_protocol(nego::SecurityProtocol::RDP)
        .expect("select protocol");

    buf.clear();
    acceptor.step_no_input(&mut buf).expect("send confirm");
    let confirm = decode::<X224<nego::ConnectionConfirm>>(buf.filled()).expect("confirm").0;
    assert!(matches!(confirm, nego::ConnectionConfirm::Response { .. }));

    // Connect-Initial with the victim's settings blocks.
    let victim_blocks = client_blocks(&["cliprdr", "rdpsnd", "rdpdr"]);
    let connect_initial = mcs::ConnectInitial::with_gcc_blocks(victim_blocks.clone());

    buf.clear();
    acceptor
        .step(&x224_data_frame(&connect_initial), &mut buf)
        .expect("connect initial");

    assert!(acceptor.should_provide_server_blocks());
    assert_eq!(acceptor.client_blocks().expect("captured"), &victim_blocks);

    // The coupler injects the target's blocks; the proxy swaps in its own
    // security material.
    let target_blocks = server_blocks_legacy(1003, &[1004, 1005, 1006], [0x77; 32], vec![0x01, 0x02, 0x03]);
    acceptor.provide_server_blocks(target_blocks).expect("server blocks");

    buf.clear();
    acceptor.step_no_input(&mut buf).expect("send connect response");

    let x224_payload = decode::<X224<spyglass_pdu::x224::X224Data<'_>>>(buf.filled())
        .expect("x224 data")
        .0;
    let connect_response = decode::<mcs::ConnectResponse>(x224_payload.data.as_ref()).expect("connect response");

    assert_eq!(connect_response.io_channel_id(), 1003);
    assert_eq!(connect_response.channel_ids(), vec![1004, 1005, 1006]);

    let security = &connect_response.conference_create_response.gcc_blocks.security;
    assert_eq!(security.encryption_method, EncryptionMethod::BIT_128);
    assert_eq!(security.server_random, Some(SERVER_RANDOM));

    // The advertised certificate carries the proxy's key, not the target's.
    let mitm_public_key = public_key_from_certificate(&security.server_cert).expect("proxy certificate");
    assert_eq!(mitm_public_key, test_rsa_key().public_key());

    // Erect domain, attach user.
    buf.clear();
    acceptor
        .step(
            &frame(mcs::ErectDomainPdu {
                sub_height: 0,
                sub_interval: 0,
            }),
            &mut buf,
        )
        .expect("erect domain");

    buf.clear();
    acceptor.step(&frame(mcs::AttachUserRequest), &mut buf).expect("attach");

    let attach_confirm = decode::<X224<mcs::AttachUserConfirm>>(buf.filled()).expect("attach confirm").0;
    assert_eq!(attach_confirm.result, 0);
    let user_channel_id = attach_confirm.initiator_id;
    assert_eq!(user_channel_id, 1007);

    // Channel joins: the acceptor confirms each requested channel.
    for channel_id in [1003u16, 1004, 1005, 1006] {
        buf.clear();
        acceptor
            .step(
                &frame(mcs::ChannelJoinRequest {
                    initiator_id: user_channel_id,
                    channel_id,
                }),
                &mut buf,
            )
            .expect("channel join");

        let join_confirm = decode::<X224<mcs::ChannelJoinConfirm>>(buf.filled()).expect("join confirm").0;
        assert_eq!(join_confirm.result, 0);
        assert_eq!(join_confirm.channel_id, channel_id);
    }

    // Security exchange: the victim keys against the proxy certificate.
    let mut victim_crypto = RdpEncryption::new(
        SessionKeys::derive(&CLIENT_RANDOM, &SERVER_RANDOM, KeyStrength::Bits128, KeyPerspective::Client),
        KeyStrength::Bits128,
    );

    let exchange = SecurityExchangePdu {
        encrypted_client_random: mitm_public_key.encrypt(&CLIENT_RANDOM).expect("rsa encrypt"),
    };

    let mut user_data = encode_vec(&SecurityHeader {
        flags: SecurityHeaderFlags::EXCHANGE_PKT,
    })
    .expect("header");
    user_data.extend_from_slice(&encode_vec(&exchange).expect("exchange"));

    buf.clear();
    acceptor
        .step(&send_data_request_frame(user_channel_id, 1003, user_data), &mut buf)
        .expect("security exchange");

    assert_eq!(acceptor.client_random(), Some(&CLIENT_RANDOM[..]));

    // Encrypted client info.
    let client_info = ClientInfo::new("victim", "hunter2", "CONTOSO");
    let plaintext = encode_vec(&client_info).expect("client info");

    let mut user_data = encode_vec(&SecurityHeader {
        flags: SecurityHeaderFlags::INFO_PKT | SecurityHeaderFlags::ENCRYPT,
    })
    .expect("header");
    let (signature, ciphertext) = victim_crypto.encrypt(&plaintext);
    user_data.extend_from_slice(&signature);
    user_data.extend_from_slice(&ciphertext);

    buf.clear();
    acceptor
        .step(&send_data_request_frame(user_channel_id, 1003, user_data), &mut buf)
        .expect("client info");

    // Synthetic licensing answer.
    buf.clear();
    acceptor.step_no_input(&mut buf).expect("license error");

    let message = decode::<X224<mcs::McsMessage<'_>>>(buf.filled()).expect("mcs").0;
    let indication = match message {
        mcs::McsMessage::SendDataIndication(msg) => msg,
        other => panic!("unexpected MCS message: {other:?}"),
    };

    let mut payload = ReadCursor::new(indication.user_data.as_ref());
    let header = spyglass_core::decode_cursor::<SecurityHeader>(&mut payload).expect("security header");
    assert!(header.flags.contains(SecurityHeaderFlags::LICENSE_PKT));

    let license = decode::<LicensePdu>(payload.read_remaining()).expect("license pdu");
    assert!(license.as_error_alert().expect("error alert").is_valid_client());

    // Handshake is done; the relay takes over with live crypto.
    assert!(acceptor.state().is_terminal());
    let mut result = acceptor.take_result().expect("result");

    assert_eq!(result.client_info.username, "victim");
    assert_eq!(result.io_channel_id, 1003);
    assert_eq!(result.user_channel_id, user_channel_id);

    let SecuritySession::Legacy { encryption } = &mut result.security else {
        panic!("expected legacy security");
    };

    // The decrypt stream continues where the client info left off.
    let (signature, ciphertext) = victim_crypto.encrypt(b"first relayed input");
    let plaintext = encryption.decrypt_verify(&signature, &ciphertext).expect("decrypt");
    assert_eq!(plaintext, b"first relayed input");
}
