//! Connection initiation on the outbound side: TLS selection and
//! negotiation failures.

use rstest::rstest;
use spyglass_connector::{
    ClientConfig, ClientConnector, ConnectorErrorKind, OsRandom, Sequence as _,
};
use spyglass_core::{decode, encode_vec, WriteBuf};
use spyglass_pdu::nego;
use spyglass_pdu::x224::X224;

fn connector_with_request(protocol: nego::SecurityProtocol) -> ClientConnector {
    ClientConnector::new(
        ClientConfig {
            nego_data: Some(nego::NegoRequestData::cookie("victim".to_owned())),
            request_flags: nego::RequestFlags::empty(),
            requested_protocol: protocol,
        },
        Box::new(OsRandom),
    )
}

#[test]
fn tls_selection_pauses_for_the_upgrade() {
    // The victim asked for TLS or CredSSP; the server picks TLS.
    let mut connector = connector_with_request(nego::SecurityProtocol::SSL | nego::SecurityProtocol::HYBRID);
    let mut buf = WriteBuf::new();

    connector.step_no_input(&mut buf).expect("send request");

    let request = decode::<X224<nego::ConnectionRequest>>(buf.filled()).expect("request").0;
    assert!(request.protocol.contains(nego::SecurityProtocol::SSL));
    assert!(request.protocol.contains(nego::SecurityProtocol::HYBRID));

    let confirm = encode_vec(&X224(nego::ConnectionConfirm::Response {
        flags: nego::ResponseFlags::empty(),
        protocol: nego::SecurityProtocol::SSL,
    }))
    .expect("encode confirm");

    buf.clear();
    connector.step(&confirm, &mut buf).expect("confirm");

    // The transport upgrade happens before any MCS byte is exchanged.
    assert!(connector.should_perform_security_upgrade());
    assert_eq!(connector.selected_protocol(), Some(nego::SecurityProtocol::SSL));

    connector.mark_security_upgrade_as_done().expect("upgrade done");
    assert!(connector.should_provide_client_blocks());
}

#[test]
fn standard_rdp_selection_skips_the_upgrade() {
    let mut connector = connector_with_request(nego::SecurityProtocol::RDP);
    let mut buf = WriteBuf::new();

    connector.step_no_input(&mut buf).expect("send request");

    let confirm = encode_vec(&X224(nego::ConnectionConfirm::Response {
        flags: nego::ResponseFlags::empty(),
        protocol: nego::SecurityProtocol::RDP,
    }))
    .expect("encode confirm");

    buf.clear();
    connector.step(&confirm, &mut buf).expect("confirm");

    assert!(!connector.should_perform_security_upgrade());
    assert!(connector.should_provide_client_blocks());
}

#[rstest]
#[case::ssl_required(nego::FailureCode::SSL_REQUIRED_BY_SERVER)]
#[case::ssl_not_allowed(nego::FailureCode::SSL_NOT_ALLOWED_BY_SERVER)]
#[case::hybrid_required(nego::FailureCode::HYBRID_REQUIRED_BY_SERVER)]
fn negotiation_failure_is_fatal_and_carries_the_code(#[case] code: nego::FailureCode) {
    let mut connector = connector_with_request(nego::SecurityProtocol::SSL);
    let mut buf = WriteBuf::new();

    connector.step_no_input(&mut buf).expect("send request");

    let failure = encode_vec(&X224(nego::ConnectionConfirm::Failure { code })).expect("encode failure");

    buf.clear();
    let error = connector.step(&failure, &mut buf).expect_err("failure must be fatal");

    match error.kind() {
        ConnectorErrorKind::Negotiation(got) => assert_eq!(*got, code),
        other => panic!("unexpected error kind: {other:?}"),
    }
}
