use spyglass_core::{decode, encode_vec};
use spyglass_pdu::gcc::{ConferenceCreateRequest, ConferenceCreateResponse, RawBlock};
use spyglass_pdu::mcs;
use spyglass_pdu::nego;
use spyglass_pdu::x224::X224;
use spyglass_testsuite::{client_blocks, server_blocks_legacy};
use std::borrow::Cow;

fn x224_round_trip<T>(pdu: T) -> T
where
    T: for<'de> spyglass_pdu::x224::X224Pdu<'de>,
{
    let encoded = encode_vec(&X224(pdu)).expect("encode");
    decode::<X224<T>>(&encoded).expect("decode").0
}

#[test]
fn negotiation_request_round_trip() {
    let request = nego::ConnectionRequest {
        nego_data: Some(nego::NegoRequestData::cookie("victim".to_owned())),
        flags: nego::RequestFlags::empty(),
        protocol: nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID,
    };

    assert_eq!(x224_round_trip(request.clone()), request);
}

#[test]
fn negotiation_request_standard_rdp_round_trip() {
    // Standard RDP security omits the negotiation payload entirely.
    let request = nego::ConnectionRequest {
        nego_data: None,
        flags: nego::RequestFlags::empty(),
        protocol: nego::SecurityProtocol::RDP,
    };

    assert_eq!(x224_round_trip(request.clone()), request);
}

#[test]
fn negotiation_confirm_round_trip() {
    let response = nego::ConnectionConfirm::Response {
        flags: nego::ResponseFlags::empty(),
        protocol: nego::SecurityProtocol::SSL,
    };
    assert_eq!(x224_round_trip(response.clone()), response);

    let failure = nego::ConnectionConfirm::Failure {
        code: nego::FailureCode::SSL_REQUIRED_BY_SERVER,
    };
    assert_eq!(x224_round_trip(failure.clone()), failure);
}

#[test]
fn mcs_domain_pdus_round_trip() {
    let erect = mcs::ErectDomainPdu {
        sub_height: 0,
        sub_interval: 0,
    };
    assert_eq!(x224_round_trip(erect.clone()), erect);

    assert_eq!(x224_round_trip(mcs::AttachUserRequest), mcs::AttachUserRequest);

    let attach_confirm = mcs::AttachUserConfirm {
        result: 0,
        initiator_id: 1007,
    };
    assert_eq!(x224_round_trip(attach_confirm.clone()), attach_confirm);

    let join_request = mcs::ChannelJoinRequest {
        initiator_id: 1007,
        channel_id: 1004,
    };
    assert_eq!(x224_round_trip(join_request.clone()), join_request);

    let join_confirm = mcs::ChannelJoinConfirm {
        result: 0,
        initiator_id: 1007,
        requested_channel_id: 1004,
        channel_id: 1004,
    };
    assert_eq!(x224_round_trip(join_confirm.clone()), join_confirm);

    let ultimatum = mcs::DisconnectProviderUltimatum::from_reason(mcs::DisconnectReason::UserRequested);
    assert_eq!(x224_round_trip(ultimatum), ultimatum);
}

#[test]
fn mcs_send_data_round_trip() {
    let request = mcs::SendDataRequest {
        initiator_id: 1007,
        channel_id: 1003,
        user_data: Cow::Owned(vec![0xDE, 0xAD, 0xBE, 0xEF]),
    };

    let encoded = encode_vec(&X224(request.clone())).expect("encode");
    let decoded = decode::<X224<mcs::McsMessage<'_>>>(&encoded).expect("decode").0;

    match decoded {
        mcs::McsMessage::SendDataRequest(decoded) => {
            assert_eq!(decoded.initiator_id, request.initiator_id);
            assert_eq!(decoded.channel_id, request.channel_id);
            assert_eq!(decoded.user_data, request.user_data);
        }
        other => panic!("unexpected MCS message: {other:?}"),
    }

    let indication = mcs::SendDataIndication {
        initiator_id: 1002,
        channel_id: 1004,
        user_data: Cow::Owned(vec![0x01; 300]),
    };

    let encoded = encode_vec(&X224(indication.clone())).expect("encode");
    let decoded = decode::<X224<mcs::SendDataIndication<'_>>>(&encoded).expect("decode").0;
    assert_eq!(decoded.user_data, indication.user_data);
}

#[test]
fn conference_create_request_round_trip() {
    let request = ConferenceCreateRequest {
        gcc_blocks: client_blocks(&["cliprdr", "rdpsnd", "rdpdr"]),
    };

    let encoded = encode_vec(&request).expect("encode");
    assert_eq!(encoded.len(), spyglass_core::size(&request));

    let decoded: ConferenceCreateRequest = decode(&encoded).expect("decode");
    assert_eq!(decoded, request);
}

#[test]
fn conference_create_request_preserves_unknown_blocks() {
    let mut blocks = client_blocks(&["cliprdr"]);
    blocks.other.push(RawBlock {
        block_type: 0xC006, // message channel block, not interpreted
        data: vec![0xAA, 0xBB, 0xCC, 0xDD],
    });

    let request = ConferenceCreateRequest { gcc_blocks: blocks };

    let encoded = encode_vec(&request).expect("encode");
    let decoded: ConferenceCreateRequest = decode(&encoded).expect("decode");

    assert_eq!(decoded.gcc_blocks.other.len(), 1);
    assert_eq!(decoded.gcc_blocks.other[0].block_type, 0xC006);
    assert_eq!(decoded.gcc_blocks.other[0].data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn conference_create_response_round_trip() {
    let response = ConferenceCreateResponse {
        user_id: 1007,
        gcc_blocks: server_blocks_legacy(1003, &[1004, 1005, 1006], [0x5A; 32], vec![0x01, 0x02, 0x03, 0x04]),
    };

    let encoded = encode_vec(&response).expect("encode");
    let decoded: ConferenceCreateResponse = decode(&encoded).expect("decode");
    assert_eq!(decoded, response);
}

#[test]
fn connect_initial_round_trip() {
    let connect_initial = mcs::ConnectInitial::with_gcc_blocks(client_blocks(&["cliprdr", "rdpdr"]));

    let encoded = encode_vec(&connect_initial).expect("encode");
    assert_eq!(encoded.len(), spyglass_core::size(&connect_initial));

    let decoded: mcs::ConnectInitial = decode(&encoded).expect("decode");
    assert_eq!(decoded, connect_initial);
}

#[test]
fn share_headers_round_trip() {
    use spyglass_pdu::rdp::{ShareControlHeader, ShareControlPduType, ShareDataHeader, ShareDataPduType};

    let data_header = ShareDataHeader {
        stream_id: 1,
        pdu_type: ShareDataPduType::INPUT,
        compression_flags: 0,
        payload: vec![0x01, 0x02, 0x03],
    };

    let encoded = encode_vec(&data_header).expect("encode");
    let decoded: ShareDataHeader = decode(&encoded).expect("decode");
    assert_eq!(decoded, data_header);

    let control_header = ShareControlHeader {
        pdu_type: ShareControlPduType::DATA,
        pdu_source: 1007,
        share_id: 0x0001_0001,
        payload: encoded,
    };

    let encoded = encode_vec(&control_header).expect("encode");
    let decoded: ShareControlHeader = decode(&encoded).expect("decode");
    assert_eq!(decoded, control_header);
}

#[test]
fn test_rsa_fixture_round_trips_a_client_random() {
    let key = spyglass_testsuite::test_rsa_key();
    let public = key.public_key();

    let client_random = [0x42u8; 32];
    let ciphertext = public.encrypt(&client_random).expect("encrypt");
    let decrypted = key.decrypt(&ciphertext, 32).expect("decrypt");

    assert_eq!(decrypted, client_random);
}

#[test]
fn connect_response_round_trip() {
    let connect_response = mcs::ConnectResponse {
        conference_create_response: ConferenceCreateResponse {
            user_id: 1002,
            gcc_blocks: server_blocks_legacy(1003, &[1004, 1005], [0x11; 32], vec![0xFF; 16]),
        },
        called_connect_id: 0,
        domain_parameters: mcs::DomainParameters::target(),
    };

    let encoded = encode_vec(&connect_response).expect("encode");
    let decoded: mcs::ConnectResponse = decode(&encoded).expect("decode");
    assert_eq!(decoded, connect_response);
}
