//! Encode/decode round trips over the generic `PofValue` tree (§4.1, §8).

use std::sync::Arc;

use pof::{
    decode, encode, Date, DateTime, Decimal, PofContext, PofValue, Time, TimeZone,
    UserTypeValue,
};

fn ctx() -> PofContext {
    PofContext::builder().build()
}

#[test]
fn intrinsics_round_trip() {
    let context = ctx();
    let values = vec![
        PofValue::Nil,
        PofValue::Boolean(true),
        PofValue::Boolean(false),
        PofValue::Int8(-12),
        PofValue::Int16(-4000),
        PofValue::Int32(i32::MIN),
        PofValue::Int64(i64::MAX),
        PofValue::Int128(i128::MIN),
        PofValue::Float32(3.25),
        PofValue::Float64(-0.001),
        PofValue::Decimal64(Decimal::new(123_456, 2)),
        PofValue::Char('z'),
        PofValue::String("hyacinth".to_string()),
        PofValue::Date(Date {
            year: 2024,
            month: 2,
            day: 29,
        }),
        PofValue::Time(Time {
            hour: 23,
            minute: 59,
            second: 59,
            nanos: 500_000_000,
            zone: TimeZone::Utc,
        }),
    ];
    for value in values {
        let bytes = encode(&context, &value).expect("encode");
        let decoded = decode(&context, &bytes).expect("decode");
        assert_eq!(decoded, value);
    }
}

#[test]
fn datetime_with_offset_round_trips() {
    let context = ctx();
    let value = PofValue::DateTime(DateTime {
        date: Date {
            year: 1999,
            month: 12,
            day: 31,
        },
        time: Time {
            hour: 23,
            minute: 0,
            second: 0,
            nanos: 0,
            zone: TimeZone::Offset {
                hour: -5,
                minute: -30,
            },
        },
    });
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn array_round_trips() {
    let context = ctx();
    let value = PofValue::Array(Arc::new(vec![
        PofValue::Int32(1),
        PofValue::String("two".into()),
        PofValue::Nil,
    ]));
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn uniform_array_round_trips() {
    let context = ctx();
    let value = PofValue::UniformArray {
        element_type: pof::type_id::INT32,
        values: Arc::new(vec![PofValue::Int32(1), PofValue::Int32(2), PofValue::Int32(3)]),
    };
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn map_round_trips() {
    let context = ctx();
    let value = PofValue::Map(Arc::new(vec![
        (PofValue::String("k1".into()), PofValue::Int32(1)),
        (PofValue::String("k2".into()), PofValue::Int32(2)),
    ]));
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn sparse_array_round_trips() {
    let context = ctx();
    let value = PofValue::SparseArray(Arc::new(vec![
        (0, PofValue::Int32(10)),
        (5, PofValue::Int32(50)),
    ]));
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn nested_user_type_round_trips() {
    let context = ctx();
    let inner = UserTypeValue {
        type_id: 100,
        data_version: 0,
        properties: vec![(0, PofValue::Int32(7)), (1, PofValue::String("leaf".into()))],
        remainder: Vec::new(),
    };
    let value = PofValue::UserType(Arc::new(inner));
    let bytes = encode(&context, &value).unwrap();
    assert_eq!(decode(&context, &bytes).unwrap(), value);
}

#[test]
fn decimal_overflow_is_rejected_on_encode() {
    let context = ctx();
    // decimal32 cannot hold an unscaled magnitude this large.
    let value = PofValue::Decimal32(Decimal::new(1_000_000_000, 0));
    assert!(encode(&context, &value).is_err());
}

#[test]
fn truncated_stream_is_an_io_error() {
    let context = ctx();
    let bytes = encode(&context, &PofValue::String("not quite enough bytes".into())).unwrap();
    let truncated = &bytes[..bytes.len() - 2];
    assert!(decode(&context, truncated).is_err());
}
