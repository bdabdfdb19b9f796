mod common;
use common::*;

use megacam_lib::HandshakeMessage;

fn message(total_length: u32) -> HandshakeMessage {
    HandshakeMessage::for_session(&CaptureSession::new(total_length), DEFAULT_BUFFER_CAPACITY)
}

#[test]
fn test_handshake_layout_for_5000_bytes() {
    let msg = message(5000);
    assert_eq!(msg.burst_count, 5);

    let bytes = msg.encode().unwrap();
    assert_eq!(bytes.len(), 1024);
    assert_eq!(hex::encode(&bytes[..8]), "0000138800000005");
    assert!(bytes[8..1022].iter().all(|&b| b == 0));
    assert_eq!(bytes[1022], ACK_SENTINEL);
    assert_eq!(bytes[1023], TAIL_SENTINEL);

    let decoded = HandshakeMessage::decode(&bytes).unwrap();
    assert_eq!((decoded.total_length, decoded.burst_count), (5000, 5));
}

#[test]
fn test_handshake_round_trips() {
    for refusals in [0, 1, 3, 17] {
        let (model, mut link) = relay(Some(refusals), PollPolicy::new(100, 0));

        let attempts = link.handshake(&message(5000)).unwrap();

        assert_eq!(attempts, refusals + 1);
        let model = model.borrow();
        assert_eq!(model.handshakes.len() as u32, refusals + 1);
        assert_eq!(model.acknowledged, 1);
    }
}

#[test]
fn test_handshake_holds_chip_select_for_all_attempts() {
    let (model, mut link) = relay(Some(2), PollPolicy::new(10, 0));
    link.handshake(&message(100)).unwrap();

    let model = model.borrow();
    let events = &model.events;
    assert_eq!(events.first(), Some(&BusEvent::Select));
    assert_eq!(events.last(), Some(&BusEvent::Deselect));
    assert_eq!(
        events.iter().filter(|e| matches!(e, BusEvent::Transfer(_))).count(),
        3
    );
    assert_eq!(events.iter().filter(|e| **e == BusEvent::Select).count(), 1);
}

#[test]
fn test_silent_downstream_times_out() {
    let (model, mut link) = relay(None, PollPolicy::new(25, 0));

    match link.handshake(&message(5000)) {
        Err(CamError::DeviceTimeout { operation, attempts }) => {
            assert_eq!(operation, "downstream handshake");
            assert_eq!(attempts, 25);
        }
        other => panic!("expected DeviceTimeout, got {other:?}"),
    }
    let model = model.borrow();
    assert_eq!(model.handshakes.len(), 25);
    assert_eq!(model.events.last(), Some(&BusEvent::Deselect), "Chip-select released on timeout");
}

#[test]
fn test_burst_outside_transfer_is_rejected() {
    let (model, mut link) = relay(Some(0), PollPolicy::new(1, 0));
    let buffer = megacam_lib::FrameBuffer::new(16);

    assert!(matches!(link.send_burst(&buffer), Err(CamError::ProtocolDesync(_))));

    link.begin_transfer().unwrap();
    link.send_burst(&buffer).unwrap();
    link.end_transfer().unwrap();
    link.end_transfer().unwrap();

    assert_eq!(
        model.borrow().events,
        vec![BusEvent::Select, BusEvent::Write(vec![0; 16]), BusEvent::Deselect]
    );
}
