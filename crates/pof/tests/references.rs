//! Object-identity sharing via the IDENTITY/REFERENCE markers (§4.1, §9).

use std::sync::Arc;

use pof::{decode, encode, PofContext, PofValue};

fn tracking_ctx() -> PofContext {
    PofContext::builder().with_reference_tracking(true).build()
}

#[test]
fn shared_subtree_is_encoded_once_and_shares_identity_on_decode() {
    let context = tracking_ctx();
    let shared = Arc::new(vec![PofValue::Int32(1), PofValue::Int32(2)]);
    let value = PofValue::Array(Arc::new(vec![
        PofValue::Collection(shared.clone()),
        PofValue::Collection(shared.clone()),
    ]));

    let bytes = encode(&context, &value).expect("encode");
    let decoded = decode(&context, &bytes).expect("decode");
    assert_eq!(decoded, value);

    // Both occurrences must resolve to the very same allocation, not merely
    // structurally-equal copies.
    if let PofValue::Array(outer) = &decoded {
        let (PofValue::Collection(a), PofValue::Collection(b)) = (&outer[0], &outer[1]) else {
            panic!("expected collections");
        };
        assert!(Arc::ptr_eq(a, b));
    } else {
        panic!("expected array");
    }
}

#[test]
fn reference_tracking_disabled_encodes_each_occurrence_independently() {
    let context = PofContext::builder().build();
    let shared = Arc::new(vec![PofValue::Int32(1)]);
    let value = PofValue::Array(Arc::new(vec![
        PofValue::Collection(shared.clone()),
        PofValue::Collection(shared),
    ]));

    let bytes = encode(&context, &value).unwrap();
    let decoded = decode(&context, &bytes).unwrap();
    assert_eq!(decoded, value);

    if let PofValue::Array(outer) = &decoded {
        let (PofValue::Collection(a), PofValue::Collection(b)) = (&outer[0], &outer[1]) else {
            panic!("expected collections");
        };
        // Without reference tracking each occurrence decodes to its own
        // freshly-allocated Arc, even though the values are equal.
        assert!(!Arc::ptr_eq(a, b));
    } else {
        panic!("expected array");
    }
}

#[test]
fn dangling_reference_is_a_decode_error() {
    let context = tracking_ctx();
    // A REFERENCE indicator (-31) followed by an id that was never assigned.
    let mut bytes = Vec::new();
    bytes.extend(zigzag_varint(pof::type_id::REFERENCE as i64));
    bytes.extend(zigzag_varint(0));
    let err = decode(&context, &bytes).unwrap_err();
    assert!(matches!(err, pof::PofError::Reference(0)));
}

/// Minimal local zigzag-varint encoder for constructing malformed test input;
/// deliberately independent of `pof`'s internal `varint` module.
fn zigzag_varint(value: i64) -> Vec<u8> {
    let mut v = ((value << 1) ^ (value >> 63)) as u64;
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}
