use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use uuid::Uuid;

use super::response::result::{deser_cql_value, ColumnType, CqlValue};
use super::types;
use super::value::{
    BoundValue, Counter, CqlDate, CqlDecimal, CqlTime, CqlTimestamp, CqlTimeuuid, CqlVarint,
    SerializeValuesError, SerializedValues,
};

/// Serializes a value as a cell against `typ`, then decodes the cell
/// content back. Null cells come back as None.
fn round_trip(value: &CqlValue, typ: &ColumnType) -> Option<CqlValue> {
    let mut values = SerializedValues::new();
    values
        .add_value(&BoundValue::Value(value.clone()), typ)
        .unwrap();

    let mut buf = Vec::new();
    values.write_to_request(&mut buf);

    let mut p = &buf[..];
    assert_eq!(types::read_short(&mut p).unwrap(), 1);
    match types::read_bytes_opt(&mut p).unwrap() {
        Some(mut cell) => Some(deser_cql_value(typ, &mut cell).unwrap()),
        None => None,
    }
}

fn assert_round_trips(value: CqlValue, typ: ColumnType) {
    assert_eq!(round_trip(&value, &typ), Some(value));
}

#[test]
fn scalar_round_trips() {
    assert_round_trips(CqlValue::Boolean(true), ColumnType::Boolean);
    assert_round_trips(CqlValue::Boolean(false), ColumnType::Boolean);
    assert_round_trips(CqlValue::TinyInt(-3), ColumnType::TinyInt);
    assert_round_trips(CqlValue::SmallInt(-31_337), ColumnType::SmallInt);
    assert_round_trips(CqlValue::Int(i32::MIN), ColumnType::Int);
    assert_round_trips(CqlValue::BigInt(i64::MAX), ColumnType::BigInt);
    assert_round_trips(CqlValue::Counter(Counter(42)), ColumnType::Counter);
    assert_round_trips(CqlValue::Float(1.5), ColumnType::Float);
    assert_round_trips(CqlValue::Double(-2.25), ColumnType::Double);
    assert_round_trips(CqlValue::Ascii("abc".to_owned()), ColumnType::Ascii);
    assert_round_trips(CqlValue::Text("zażółć".to_owned()), ColumnType::Text);
    assert_round_trips(CqlValue::Blob(vec![0, 1, 2, 255]), ColumnType::Blob);
    assert_round_trips(
        CqlValue::Timestamp(CqlTimestamp(1_652_701_934_000)),
        ColumnType::Timestamp,
    );
    assert_round_trips(CqlValue::Date(CqlDate(1 << 31)), ColumnType::Date);
    assert_round_trips(CqlValue::Time(CqlTime(0)), ColumnType::Time);
    assert_round_trips(
        CqlValue::Time(CqlTime(86_399_999_999_999)),
        ColumnType::Time,
    );
    assert_round_trips(
        CqlValue::Inet(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
        ColumnType::Inet,
    );
    assert_round_trips(
        CqlValue::Inet(IpAddr::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1))),
        ColumnType::Inet,
    );

    let uuid = Uuid::parse_str("f3b4958c-52a1-11e7-802a-010203040506").unwrap();
    assert_round_trips(CqlValue::Uuid(uuid), ColumnType::Uuid);
    assert_round_trips(
        CqlValue::Timeuuid(CqlTimeuuid::from(uuid)),
        ColumnType::Timeuuid,
    );
}

#[test]
fn varint_and_decimal_round_trips() {
    // -1 is a single 0xff byte in two's complement of minimal length.
    assert_round_trips(
        CqlValue::Varint(CqlVarint::from_signed_bytes_be(vec![0xff])),
        ColumnType::Varint,
    );
    assert_round_trips(
        CqlValue::Varint(CqlVarint::from_signed_bytes_be(vec![0x01, 0x00])),
        ColumnType::Varint,
    );
    assert_round_trips(
        CqlValue::Decimal(CqlDecimal::from_signed_be_bytes_and_exponent(
            vec![0x07, 0x5b, 0xcd, 0x15],
            3,
        )),
        ColumnType::Decimal,
    );
}

#[test]
fn collection_round_trips() {
    let list_typ = ColumnType::List(Box::new(ColumnType::Int));
    assert_round_trips(
        CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2), CqlValue::Int(3)]),
        list_typ,
    );

    let set_typ = ColumnType::Set(Box::new(ColumnType::Text));
    assert_round_trips(
        CqlValue::Set(vec![
            CqlValue::Text("a".to_owned()),
            CqlValue::Text("b".to_owned()),
        ]),
        set_typ,
    );

    let map_typ = ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::BigInt));
    assert_round_trips(
        CqlValue::Map(vec![
            (CqlValue::Text("k1".to_owned()), CqlValue::BigInt(1)),
            (CqlValue::Text("k2".to_owned()), CqlValue::BigInt(2)),
        ]),
        map_typ,
    );
}

#[test]
fn tuple_round_trips_with_null_field() {
    let typ = ColumnType::Tuple(vec![ColumnType::Int, ColumnType::Text]);
    assert_round_trips(
        CqlValue::Tuple(vec![Some(CqlValue::Int(7)), None]),
        typ,
    );
}

#[test]
fn udt_round_trips() {
    let typ = ColumnType::UserDefinedType {
        keyspace: "ks".to_owned(),
        type_name: "person".to_owned(),
        field_types: vec![
            ("name".to_owned(), ColumnType::Text),
            ("age".to_owned(), ColumnType::Int),
        ],
    };
    assert_round_trips(
        CqlValue::UserDefinedType {
            keyspace: "ks".to_owned(),
            type_name: "person".to_owned(),
            fields: vec![
                ("name".to_owned(), Some(CqlValue::Text("Homer".to_owned()))),
                ("age".to_owned(), Some(CqlValue::Int(39))),
            ],
        },
        typ,
    );
}

#[test]
fn udt_missing_trailing_fields_decode_as_absent() {
    let typ = ColumnType::UserDefinedType {
        keyspace: "ks".to_owned(),
        type_name: "person".to_owned(),
        field_types: vec![
            ("name".to_owned(), ColumnType::Text),
            ("age".to_owned(), ColumnType::Int),
        ],
    };

    // Only the first field serialized, as if the UDT gained a field
    // after the value was written.
    let mut cell = Vec::new();
    types::write_bytes(b"Homer", &mut cell).unwrap();

    let decoded = deser_cql_value(&typ, &mut &cell[..]).unwrap();
    let fields = decoded.as_udt().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(
        fields[0],
        ("name".to_owned(), Some(CqlValue::Text("Homer".to_owned())))
    );
}

#[test]
fn null_and_unset_cells() {
    let mut values = SerializedValues::new();
    values.add_value(&BoundValue::Null, &ColumnType::Int).unwrap();
    values.add_value(&BoundValue::Unset, &ColumnType::Int).unwrap();

    let mut buf = Vec::new();
    values.write_to_request(&mut buf);

    let mut p = &buf[..];
    assert_eq!(types::read_short(&mut p).unwrap(), 2);
    assert_eq!(types::read_int(&mut p).unwrap(), -1);
    assert_eq!(types::read_int(&mut p).unwrap(), -2);
    assert!(p.is_empty());
}

#[test]
fn empty_cell_decodes_to_empty_for_int_but_not_text() {
    assert_eq!(
        deser_cql_value(&ColumnType::Int, &mut &[][..]).unwrap(),
        CqlValue::Empty
    );
    assert_eq!(
        deser_cql_value(&ColumnType::Text, &mut &[][..]).unwrap(),
        CqlValue::Text(String::new())
    );
    assert_eq!(
        deser_cql_value(&ColumnType::Blob, &mut &[][..]).unwrap(),
        CqlValue::Blob(Vec::new())
    );
}

#[test]
fn integer_hints_coerce_into_wider_and_narrower_columns() {
    // An `int` hint binds to a bigint column as 8 bytes.
    assert_eq!(
        round_trip(&CqlValue::Int(7), &ColumnType::BigInt),
        Some(CqlValue::BigInt(7))
    );
    // A `bigint` hint binds to an int column when in range.
    assert_eq!(
        round_trip(&CqlValue::BigInt(7), &ColumnType::Int),
        Some(CqlValue::Int(7))
    );
    // Timestamp columns take integer hints too.
    assert_eq!(
        round_trip(&CqlValue::BigInt(1000), &ColumnType::Timestamp),
        Some(CqlValue::Timestamp(CqlTimestamp(1000)))
    );
}

#[test]
fn out_of_range_integer_is_rejected() {
    let mut values = SerializedValues::new();
    let err = values
        .add_value(
            &BoundValue::Value(CqlValue::BigInt(i64::from(i32::MAX) + 1)),
            &ColumnType::Int,
        )
        .unwrap_err();
    assert_eq!(err, SerializeValuesError::ValueOutOfRange("int"));
}

#[test]
fn type_mismatch_is_rejected() {
    let mut values = SerializedValues::new();
    let err = values
        .add_value(
            &BoundValue::Value(CqlValue::Text("not a number".to_owned())),
            &ColumnType::Int,
        )
        .unwrap_err();
    assert!(matches!(err, SerializeValuesError::TypeMismatch { .. }));
}

#[test]
fn non_ascii_in_ascii_column_is_rejected() {
    let mut values = SerializedValues::new();
    let err = values
        .add_value(
            &BoundValue::Value(CqlValue::Ascii("zażółć".to_owned())),
            &ColumnType::Ascii,
        )
        .unwrap_err();
    assert_eq!(err, SerializeValuesError::NotAscii);
}

#[test]
fn untyped_serialization_matches_typed() {
    let value = CqlValue::Int(2137);

    let mut typed = SerializedValues::new();
    typed
        .add_value(&BoundValue::Value(value.clone()), &ColumnType::Int)
        .unwrap();

    let mut untyped = SerializedValues::new();
    untyped.add_value_untyped(&BoundValue::Value(value)).unwrap();

    assert_eq!(typed, untyped);
}

#[test]
fn varint_normalization() {
    // Leading sign bytes do not affect equality.
    assert_eq!(
        CqlVarint::from_signed_bytes_be(vec![0x00, 0x01]),
        CqlVarint::from_signed_bytes_be(vec![0x01]),
    );
    assert_eq!(
        CqlVarint::from_signed_bytes_be(vec![0xff, 0xff, 0x80]),
        CqlVarint::from_signed_bytes_be(vec![0xff, 0x80]),
    );
    assert_ne!(
        CqlVarint::from_signed_bytes_be(vec![0x01, 0x00]),
        CqlVarint::from_signed_bytes_be(vec![0x01]),
    );
}
