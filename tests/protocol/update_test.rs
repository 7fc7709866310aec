// Update and Ack Payload Tests
// Reconciliation query/response layout and acknowledgement payloads

use hammesh::protocol::{
    AckPayload, CacheQuery, CacheResponse, Contact, Message, MessageKey, PayloadType,
    ProtocolError, UpdateOperation, UpdatePayload,
};

fn contact(callsign: &str) -> Contact {
    Contact::fixed(callsign).unwrap()
}

// ============================================================================
// ACK PAYLOAD
// ============================================================================

#[test]
fn test_ack_roundtrip() {
    let ack = AckPayload::new(contact("DL1ABC"), 99);
    let decoded = AckPayload::decode(&ack.encode()).unwrap();

    assert_eq!(decoded, ack);
    assert_eq!(decoded.key(), MessageKey::new(99, contact("DL1ABC")));
}

#[test]
fn test_ack_from_key() {
    let ack = AckPayload::from(MessageKey::new(5, contact("K1")));
    assert_eq!(ack.sequence, 5);
    assert_eq!(ack.contact, contact("K1"));
}

// ============================================================================
// CACHE QUERY
// ============================================================================

#[test]
fn test_cache_query_layout() {
    let query = CacheQuery::new(vec![MessageKey::new(2, contact("A"))]);

    assert_eq!(
        query.encode().unwrap(),
        vec![
            1, 0, 0, 0, // count
            2, 0, 0, 0, 0, 0, 0, 0, // sequence
            1, 1, b'A', 0, // contact
        ]
    );
}

#[test]
fn test_cache_query_roundtrip() {
    let query = CacheQuery::new(vec![
        MessageKey::new(1, contact("A")),
        MessageKey::new(u64::MAX, contact("BB")),
    ]);
    assert_eq!(CacheQuery::decode(&query.encode().unwrap()).unwrap(), query);
}

#[test]
fn test_cache_query_empty() {
    let query = CacheQuery::default();
    let encoded = query.encode().unwrap();

    assert_eq!(encoded, vec![0, 0, 0, 0]);
    assert!(CacheQuery::decode(&encoded).unwrap().entries.is_empty());
}

#[test]
fn test_cache_query_count_exceeds_entries() {
    let mut encoded = CacheQuery::new(vec![MessageKey::new(1, contact("A"))])
        .encode()
        .unwrap();
    encoded[0] = 2;

    assert!(matches!(
        CacheQuery::decode(&encoded),
        Err(ProtocolError::MalformedMessage(_))
    ));
}

// ============================================================================
// CACHE RESPONSE
// ============================================================================

#[test]
fn test_cache_response_roundtrip() {
    let messages = vec![
        Message::new(contact("A"), 1, PayloadType::Cq, b"one".to_vec()).with_path("A"),
        Message::new(contact("B"), 2, PayloadType::MessengerGroup, vec![]).with_ttl(3),
    ];
    let response = CacheResponse::new(messages);

    assert_eq!(CacheResponse::decode(&response.encode().unwrap()).unwrap(), response);
}

#[test]
fn test_cache_response_broken_entry_fails_whole() {
    let response = CacheResponse::new(vec![Message::new(contact("A"), 1, PayloadType::Cq, vec![7])]);
    let mut encoded = response.encode().unwrap();
    encoded.pop();

    assert!(CacheResponse::decode(&encoded).is_err());
}

// ============================================================================
// UPDATE ENVELOPE
// ============================================================================

#[test]
fn test_update_roundtrip_nested() {
    let query = CacheQuery::new(vec![MessageKey::new(7, contact("Z9"))]);
    let update = UpdatePayload::new(UpdateOperation::CacheRequest, query.encode().unwrap());

    let decoded = UpdatePayload::decode(&update.encode().unwrap()).unwrap();
    assert_eq!(decoded.operation, UpdateOperation::CacheRequest);
    assert_eq!(CacheQuery::decode(&decoded.data).unwrap(), query);
}

#[test]
fn test_update_data_length_overruns() {
    // Declares 16 bytes of data, carries 2
    let buf = [0, 16, 0, 1, 2];
    assert!(matches!(
        UpdatePayload::decode(&buf),
        Err(ProtocolError::MalformedMessage(_))
    ));
}
