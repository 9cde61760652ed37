//! The channel connection phase: serialized joins, one refusal tolerated.

use spyglass_connector::{ChannelConnectionSequence, Sequence as _};
use spyglass_core::{decode, encode_vec, WriteBuf};
use spyglass_pdu::mcs;
use spyglass_pdu::x224::X224;

fn frame<'de, T>(pdu: T) -> Vec<u8>
where
    T: spyglass_pdu::x224::X224Pdu<'de>,
{
    encode_vec(&X224(pdu)).expect("encode")
}

fn written_join_request(buf: &WriteBuf) -> mcs::ChannelJoinRequest {
    decode::<X224<mcs::ChannelJoinRequest>>(buf.filled()).expect("join request").0
}

#[test]
fn joins_are_serialized_and_a_refusal_is_tolerated() {
    const USER_CHANNEL_ID: u16 = 1007;
    const IO_CHANNEL_ID: u16 = 1003;
    const REFUSED_CHANNEL_ID: u16 = 1005; // "rdpsnd" in the scenario

    let mut sequence = ChannelConnectionSequence::new(IO_CHANNEL_ID, vec![1004, 1005, 1006]);
    let mut buf = WriteBuf::new();

    // erect domain
    buf.clear();
    sequence.step_no_input(&mut buf).expect("erect domain");
    decode::<X224<mcs::ErectDomainPdu>>(buf.filled()).expect("erect domain pdu");

    // attach user
    buf.clear();
    sequence.step_no_input(&mut buf).expect("attach user");
    decode::<X224<mcs::AttachUserRequest>>(buf.filled()).expect("attach user pdu");

    buf.clear();
    sequence
        .step(
            &frame(mcs::AttachUserConfirm {
                result: 0,
                initiator_id: USER_CHANNEL_ID,
            }),
            &mut buf,
        )
        .expect("attach user confirm");

    // Joins must be issued one at a time, I/O channel first, each request
    // only after the previous confirm.
    let expected_order = [1003, 1004, 1005, 1006];

    for channel_id in expected_order {
        buf.clear();
        sequence.step_no_input(&mut buf).expect("join request");

        let request = written_join_request(&buf);
        assert_eq!(request.channel_id, channel_id);
        assert_eq!(request.initiator_id, USER_CHANNEL_ID);

        let result = if channel_id == REFUSED_CHANNEL_ID { 14 } else { 0 };

        buf.clear();
        sequence
            .step(
                &frame(mcs::ChannelJoinConfirm {
                    result,
                    initiator_id: USER_CHANNEL_ID,
                    requested_channel_id: channel_id,
                    channel_id,
                }),
                &mut buf,
            )
            .expect("join confirm");
    }

    // The refused channel is omitted; everything else joined and the
    // session carries on.
    let channels = sequence.channels().expect("all joined").clone();
    assert_eq!(channels.user_channel_id, USER_CHANNEL_ID);
    assert_eq!(channels.joined, vec![1003, 1004, 1006]);
    assert_eq!(channels.refused, vec![REFUSED_CHANNEL_ID]);
}

#[test]
fn out_of_order_confirm_is_fatal() {
    let mut sequence = ChannelConnectionSequence::new(1003, vec![1004]);
    let mut buf = WriteBuf::new();

    sequence.step_no_input(&mut buf).expect("erect domain");
    buf.clear();
    sequence.step_no_input(&mut buf).expect("attach user");
    buf.clear();
    sequence
        .step(
            &frame(mcs::AttachUserConfirm {
                result: 0,
                initiator_id: 1007,
            }),
            &mut buf,
        )
        .expect("attach user confirm");

    buf.clear();
    sequence.step_no_input(&mut buf).expect("join request"); // requests 1003

    buf.clear();
    let result = sequence.step(
        &frame(mcs::ChannelJoinConfirm {
            result: 0,
            initiator_id: 1007,
            requested_channel_id: 1999,
            channel_id: 1999,
        }),
        &mut buf,
    );

    assert!(result.is_err());
}
