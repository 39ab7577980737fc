//! STUN message and attribute tests

use bytes::Bytes;
use dmtp_stun::attribute::{kind as attr, Value};
use dmtp_stun::message::kind as msg;
use dmtp_stun::{StunMessage, TransactionId, MAGIC_COOKIE};

fn fixed_txn() -> TransactionId {
    TransactionId::modern([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
}

#[test]
fn test_reflexive_address_discovery() {
    // client side: binding request with a fixed transaction id
    let request = StunMessage::new(msg::BINDING_REQUEST, fixed_txn());
    let wire = request.encode();
    assert_eq!(&wire[0..4], &[0x00, 0x01, 0x00, 0x00]);
    assert_eq!(&wire[4..8], &MAGIC_COOKIE.to_be_bytes());
    assert_eq!(&wire[8..20], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);

    // server side: echo the transaction id, report the source address
    let observed = "192.0.2.1:54321".parse().unwrap();
    let request = StunMessage::parse(&wire).unwrap();
    let mut response = StunMessage::new(msg::BINDING_RESPONSE, request.transaction_id);
    response
        .push_xor_address(attr::XOR_MAPPED_ADDRESS, observed)
        .unwrap();
    response.push_software("dmtp-stun test server");

    // client side again: unmasking recovers the observed address
    let response = StunMessage::parse(&response.encode()).unwrap();
    assert_eq!(response.kind, msg::BINDING_RESPONSE);
    assert_eq!(response.mapped_address(), Some(observed));
}

#[test]
fn test_plain_mapped_address_fallback() {
    let observed = "198.51.100.9:1234".parse().unwrap();
    let mut response = StunMessage::new(msg::BINDING_RESPONSE, fixed_txn());
    response.push_address(attr::MAPPED_ADDRESS, observed);

    let parsed = StunMessage::parse(&response.encode()).unwrap();
    assert_eq!(parsed.mapped_address(), Some(observed));
}

#[test]
fn test_attribute_roundtrip_through_registry() {
    let mut message = StunMessage::new(msg::BINDING_RESPONSE, fixed_txn());
    message.push_address(attr::SOURCE_ADDRESS, "203.0.113.1:3478".parse().unwrap());
    message.push_address(attr::CHANGED_ADDRESS, "203.0.113.2:3479".parse().unwrap());
    message.push_raw(attr::CHANGE_REQUEST, Bytes::from_static(&[0, 0, 0, 0x04]));
    message.push_software("dmtp");

    let parsed = StunMessage::parse(&message.encode()).unwrap();
    assert_eq!(parsed.attributes.len(), 4);
    assert_eq!(parsed.residual, 0);
    assert_eq!(
        parsed.get(attr::SOURCE_ADDRESS).map(|a| &a.value),
        Some(&Value::Address("203.0.113.1:3478".parse().unwrap()))
    );
    assert_eq!(
        parsed.get(attr::CHANGE_REQUEST).map(|a| &a.value),
        Some(&Value::ChangeRequest {
            change_ip: true,
            change_port: false
        })
    );
    assert_eq!(
        parsed.get(attr::SOFTWARE).map(|a| &a.value),
        Some(&Value::Software("dmtp".into()))
    );
}

#[test]
fn test_unknown_attribute_passes_through() {
    let mut message = StunMessage::new(msg::BINDING_RESPONSE, fixed_txn());
    message.push_raw(0x7F31, Bytes::from_static(b"odd"));
    message.push_address(attr::MAPPED_ADDRESS, "192.0.2.5:10".parse().unwrap());

    let parsed = StunMessage::parse(&message.encode()).unwrap();
    assert_eq!(
        parsed.get(0x7F31).map(|a| &a.value),
        Some(&Value::Raw(Bytes::from_static(b"odd")))
    );
    // parsing continued past the unknown attribute
    assert!(parsed.mapped_address().is_some());
}

#[test]
fn test_turn_relayed_address() {
    let relayed = "203.0.113.77:50000".parse().unwrap();
    let mut response = StunMessage::new(msg::ALLOCATE_RESPONSE, fixed_txn());
    response
        .push_xor_address(attr::XOR_RELAYED_ADDRESS, relayed)
        .unwrap();
    response.push_raw(attr::LIFETIME, Bytes::from_static(&[0, 0, 0x02, 0x58]));

    let parsed = StunMessage::parse(&response.encode()).unwrap();
    assert_eq!(parsed.relayed_address(), Some(relayed));
    assert_eq!(
        parsed.get(attr::LIFETIME).map(|a| &a.value),
        Some(&Value::Lifetime(600))
    );
}

#[test]
fn test_send_and_data_indications_carry_payload() {
    let peer = "192.0.2.33:9000".parse().unwrap();
    let mut indication = StunMessage::new(msg::SEND_INDICATION, TransactionId::random());
    indication.push_xor_address(attr::XOR_PEER_ADDRESS, peer).unwrap();
    indication.push_raw(attr::DATA, Bytes::from_static(b"hello through relay"));

    let parsed = StunMessage::parse(&indication.encode()).unwrap();
    assert_eq!(parsed.xor_address(attr::XOR_PEER_ADDRESS), Some(peer));
    assert_eq!(
        parsed.get(attr::DATA).map(|a| &a.value),
        Some(&Value::Data(Bytes::from_static(b"hello through relay")))
    );
}
