use policy_bridge::rule_vector::{decode, encode, RuleVector, SliceAnchors, ANCHOR_DIM};
use policy_bridge::StoreError;

fn sample_vector() -> RuleVector {
    let mut anchors = SliceAnchors::default();
    for i in 0..ANCHOR_DIM {
        anchors.action[i] = i as f32 * 0.01;
        anchors.resource[i] = -(i as f32) * 0.02;
        anchors.data[i] = 1.0 / (i as f32 + 1.0);
        anchors.risk[i] = if i % 2 == 0 { f32::MIN_POSITIVE } else { -0.0 };
    }
    let mut vector = RuleVector::new("rule-serialization", anchors, [0.1, 0.25, 0.5, 1.0]);
    vector.installed_at_ms = 1_700_000_000_123;
    vector
}

#[test]
fn test_record_round_trip_is_byte_exact() {
    let original = sample_vector();

    let encoded = encode(&original).unwrap();
    let (decoded, consumed) = decode(&encoded).unwrap();

    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded, original);
    // Bit patterns survive, including -0.0
    assert_eq!(decoded.anchors.risk[1].to_bits(), (-0.0f32).to_bits());
    assert_eq!(encode(&decoded).unwrap(), encoded);
}

#[test]
fn test_decode_consumes_one_record_from_a_stream() {
    let first = sample_vector();
    let mut second = sample_vector();
    second.rule_id = "rule-second".to_string();

    let mut stream = encode(&first).unwrap();
    let first_len = stream.len();
    stream.extend(encode(&second).unwrap());

    let (decoded, consumed) = decode(&stream).unwrap();
    assert_eq!(decoded.rule_id, "rule-serialization");
    assert_eq!(consumed, first_len);

    let (decoded, _) = decode(&stream[consumed..]).unwrap();
    assert_eq!(decoded.rule_id, "rule-second");
}

#[test]
fn test_every_truncation_is_a_serialization_error() {
    let encoded = encode(&sample_vector()).unwrap();

    for len in 0..encoded.len() {
        let result = decode(&encoded[..len]);
        assert!(
            matches!(result, Err(StoreError::Serialization { .. })),
            "truncation to {} bytes should fail",
            len
        );
    }
}
