use super::*;
use pretty_assertions::assert_eq;

fn numeric(ndigits: i16, weight: i16, sign: u16, dscale: i16, digits: &[u16]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&ndigits.to_be_bytes());
    raw.extend_from_slice(&weight.to_be_bytes());
    raw.extend_from_slice(&sign.to_be_bytes());
    raw.extend_from_slice(&dscale.to_be_bytes());
    for digit in digits {
        raw.extend_from_slice(&digit.to_be_bytes());
    }
    raw
}

#[test]
fn test_integers_narrow_to_column_width() {
    assert_eq!(PgValue::for_type(&Value::Int64(7), &Type::INT4), PgValue::Int32(7));
    assert_eq!(PgValue::for_type(&Value::Int32(7), &Type::INT2), PgValue::Int16(7));
    assert_eq!(PgValue::for_type(&Value::Int16(7), &Type::INT8), PgValue::Int64(7));
    assert_eq!(
        PgValue::for_type(&Value::Int64(7), &Type::TEXT),
        PgValue::String("7".into())
    );
}

#[test]
fn test_arrays_follow_the_member_type() {
    let keys = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
    assert_eq!(
        PgValue::for_type(&keys, &Type::INT4_ARRAY),
        PgValue::Array(vec![PgValue::Int32(1), PgValue::Int32(2)])
    );

    let ids = Value::Array(vec![Value::from("0b7c2c0e-8d7a-4f5e-9c1d-2f9a0c6b1e33")]);
    match PgValue::for_type(&ids, &Type::UUID_ARRAY) {
        PgValue::Array(items) => assert!(matches!(items[0], PgValue::Uuid(_))),
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn test_array_parameter_encodes_as_postgres_array() {
    let keys = Value::Array(vec![Value::Int64(3), Value::Int64(1), Value::Int64(2)]);
    let bound = PgValue::for_type(&keys, &Type::INT8_ARRAY);

    let mut buf = BytesMut::new();
    let is_null = bound.to_sql(&Type::INT8_ARRAY, &mut buf).unwrap();
    assert!(matches!(is_null, IsNull::No));

    let decoded = Vec::<i64>::from_sql(&Type::INT8_ARRAY, &buf).unwrap();
    assert_eq!(decoded, vec![3, 1, 2]);
}

#[test]
fn test_strings_parse_into_typed_columns() {
    assert_eq!(
        PgValue::for_type(&Value::from("2024-02-29"), &Type::DATE),
        PgValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
    );
    assert!(matches!(
        PgValue::for_type(&Value::from("2024-02-29T10:00:00Z"), &Type::TIMESTAMPTZ),
        PgValue::DateTimeUtc(_)
    ));
    assert!(matches!(
        PgValue::for_type(&Value::from(r#"{"a":1}"#), &Type::JSONB),
        PgValue::Json(_)
    ));
    assert_eq!(
        PgValue::for_type(&Value::from("not a date"), &Type::DATE),
        PgValue::String("not a date".into())
    );
}

#[test]
fn test_bind_all_without_reported_types() {
    let bound = PgValue::bind_all(&[Value::Null, Value::Bool(true)], &[Type::BOOL]);
    assert_eq!(bound, vec![PgValue::Null, PgValue::Bool(true)]);
}

#[test]
fn test_numeric_decoding() {
    // 123.45
    let raw = numeric(2, 0, 0x0000, 2, &[123, 4500]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "123.45");

    // -10000.5
    let raw = numeric(3, 1, 0x4000, 1, &[1, 0, 5000]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "-10000.5");

    // 0.12
    let raw = numeric(1, -1, 0x0000, 2, &[1200]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "0.12");

    // 0.000012
    let raw = numeric(1, -2, 0x0000, 6, &[1200]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "0.000012");

    // NUMERIC(10,2) keeps its scale: 1.50
    let raw = numeric(2, 0, 0x0000, 2, &[1, 5000]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "1.50");

    // -2.000 with a trailing zero group dropped from the payload
    let raw = numeric(1, 0, 0x4000, 3, &[2]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "-2.000");

    let raw = numeric(0, 0, 0x0000, 2, &[]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "0.00");

    let raw = numeric(0, 0, 0xC000, 0, &[]);
    assert_eq!(PgNumericString::parse(&raw).unwrap(), "NaN");

    assert!(PgNumericString::parse(&[0, 1]).is_err());
}
