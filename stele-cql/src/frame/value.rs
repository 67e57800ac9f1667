//! Serialization of CQL values into request cells.
//!
//! A cell is `[int length][length bytes of content]`, where a length of
//! -1 encodes null and -2 encodes "not set". When bound-column metadata
//! is available (prepared statements) values are checked against the
//! column type before writing; without metadata (simple statements) the
//! [CqlValue] variant itself determines the layout.

use bytes::BufMut;
use thiserror::Error;
use uuid::Uuid;

use super::response::result::{ColumnType, CqlValue};

/// Represents a counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(pub i64);

/// Days since the epoch shifted by 2^31, i.e. `1970-01-01` is 2^31.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlDate(pub u32);

/// Milliseconds since the unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlTimestamp(pub i64);

/// Nanoseconds since midnight.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CqlTime(pub i64);

/// A timeuuid (version 1 UUID) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CqlTimeuuid(Uuid);

impl CqlTimeuuid {
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(b: &[u8]) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::from_slice(b)?))
    }
}

impl From<Uuid> for CqlTimeuuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CqlTimeuuid> for Uuid {
    fn from(timeuuid: CqlTimeuuid) -> Self {
        timeuuid.0
    }
}

/// An arbitrary-precision integer kept in its wire form: a big-endian
/// two's-complement byte string of minimal length. This crate does not
/// do arithmetic on it.
#[derive(Clone, Eq, Debug)]
pub struct CqlVarint(Vec<u8>);

impl CqlVarint {
    /// Creates a [CqlVarint] from big-endian two's-complement bytes.
    /// The byte string is normalized, so equal numbers with a different
    /// count of leading sign bytes compare equal.
    pub fn from_signed_bytes_be(digits: Vec<u8>) -> Self {
        Self(digits)
    }

    pub fn as_signed_bytes_be_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_normalized_slice(&self) -> &[u8] {
        let digits = self.0.as_slice();
        if digits.is_empty() {
            // 0 has an empty representation in this encoding.
            return digits;
        }
        let non_zero_position = match digits.iter().position(|b| *b != 0) {
            Some(pos) => pos,
            None => {
                // All-zero buffers normalize to a single zero byte.
                return &digits[digits.len() - 1..];
            }
        };
        let zeros_to_remove = if digits[non_zero_position] > 0x7f {
            // Retain one leading zero to keep the number positive.
            non_zero_position.saturating_sub(1)
        } else {
            non_zero_position
        };

        let mut sign_bytes_to_remove = 0;
        while sign_bytes_to_remove + 1 < digits.len()
            && digits[sign_bytes_to_remove] == 0xff
            && digits[sign_bytes_to_remove + 1] > 0x7f
        {
            sign_bytes_to_remove += 1;
        }

        &digits[zeros_to_remove.max(sign_bytes_to_remove)..]
    }
}

impl PartialEq for CqlVarint {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized_slice() == other.as_normalized_slice()
    }
}

impl std::hash::Hash for CqlVarint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_normalized_slice().hash(state)
    }
}

/// An arbitrary-precision decimal: a base-10 scale applied to a varint
/// unscaled value, both kept in wire form.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CqlDecimal {
    int_val: CqlVarint,
    scale: i32,
}

impl CqlDecimal {
    pub fn from_signed_be_bytes_and_exponent(bytes: Vec<u8>, scale: i32) -> Self {
        Self {
            int_val: CqlVarint::from_signed_bytes_be(bytes),
            scale,
        }
    }

    pub fn as_signed_be_bytes_slice_and_exponent(&self) -> (&[u8], i32) {
        (self.int_val.as_signed_bytes_be_slice(), self.scale)
    }
}

/// A value bound to a statement position: typed content, a null, or the
/// protocol's "not set" marker.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Value(CqlValue),
    Null,
    Unset,
}

impl From<CqlValue> for BoundValue {
    fn from(value: CqlValue) -> Self {
        BoundValue::Value(value)
    }
}

impl From<Option<CqlValue>> for BoundValue {
    fn from(value: Option<CqlValue>) -> Self {
        match value {
            Some(v) => BoundValue::Value(v),
            None => BoundValue::Null,
        }
    }
}

/// An error returned when a value cannot be serialized into a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializeValuesError {
    #[error("Too many values to add, max 65535 values can be sent in a request")]
    TooManyValues,
    #[error("Value of CQL type {expected} expected, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("Value out of range for CQL type {0}")]
    ValueOutOfRange(&'static str),
    #[error("ascii value contains a non-ASCII character")]
    NotAscii,
    #[error("Value too big to be sent in a request: {0} bytes")]
    ValueTooBig(usize),
    #[error("Tuple or UDT value has more fields ({got}) than its type ({expected})")]
    TooManyFields { expected: usize, got: usize },
}

fn mismatch(expected: &ColumnType, got: &CqlValue) -> SerializeValuesError {
    SerializeValuesError::TypeMismatch {
        expected: format!("{:?}", expected),
        got: format!("{:?}", got),
    }
}

/// An ordered buffer of serialized cells, ready to be written into a
/// QUERY, EXECUTE or BATCH body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializedValues {
    serialized_values: Vec<u8>,
    values_num: u16,
}

impl SerializedValues {
    pub const EMPTY: &'static SerializedValues = &SerializedValues {
        serialized_values: Vec::new(),
        values_num: 0,
    };

    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value checked against the bound column's type.
    pub fn add_value(
        &mut self,
        value: &BoundValue,
        typ: &ColumnType,
    ) -> Result<(), SerializeValuesError> {
        self.add(value, Some(typ))
    }

    /// Appends a value whose layout is determined by its variant alone.
    /// Used for simple statements, which carry no column metadata.
    pub fn add_value_untyped(&mut self, value: &BoundValue) -> Result<(), SerializeValuesError> {
        self.add(value, None)
    }

    fn add(
        &mut self,
        value: &BoundValue,
        typ: Option<&ColumnType>,
    ) -> Result<(), SerializeValuesError> {
        if self.values_num == u16::MAX {
            return Err(SerializeValuesError::TooManyValues);
        }
        write_bound_value(value, typ, &mut self.serialized_values)?;
        self.values_num += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.values_num == 0
    }

    pub fn len(&self) -> u16 {
        self.values_num
    }

    /// Writes `[short count]` followed by the cells.
    pub fn write_to_request(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.values_num);
        buf.put_slice(&self.serialized_values);
    }
}

/// Writes a whole cell: length prefix plus content.
pub fn write_bound_value(
    value: &BoundValue,
    typ: Option<&ColumnType>,
    buf: &mut Vec<u8>,
) -> Result<(), SerializeValuesError> {
    match value {
        BoundValue::Null => buf.put_i32(-1),
        BoundValue::Unset => buf.put_i32(-2),
        BoundValue::Value(v) => {
            let mut content = Vec::new();
            ser_cql_value(v, typ, &mut content)?;
            let len: i32 = content
                .len()
                .try_into()
                .map_err(|_| SerializeValuesError::ValueTooBig(content.len()))?;
            buf.put_i32(len);
            buf.put_slice(&content);
        }
    }
    Ok(())
}

/// Serializes the content of a cell (without the length prefix).
fn ser_cql_value(
    value: &CqlValue,
    typ: Option<&ColumnType>,
    buf: &mut Vec<u8>,
) -> Result<(), SerializeValuesError> {
    match typ {
        Some(typ) => ser_typed(value, typ, buf),
        None => ser_untyped(value, buf),
    }
}

/// Integer columns accept both their exactly-sized value and the other
/// integer variants when the value fits the column's width. This lets
/// simple-statement-style `Int`/`BigInt` hints bind to any integer
/// column.
fn integer_for_column(value: &CqlValue, typ: &ColumnType) -> Option<Result<i64, SerializeValuesError>> {
    let wide: i64 = match *value {
        CqlValue::TinyInt(v) => v.into(),
        CqlValue::SmallInt(v) => v.into(),
        CqlValue::Int(v) => v.into(),
        CqlValue::BigInt(v) => v,
        _ => return None,
    };
    let fits = match typ {
        ColumnType::TinyInt => i8::try_from(wide).is_ok(),
        ColumnType::SmallInt => i16::try_from(wide).is_ok(),
        ColumnType::Int => i32::try_from(wide).is_ok(),
        ColumnType::BigInt | ColumnType::Counter | ColumnType::Timestamp => true,
        _ => return None,
    };
    Some(if fits {
        Ok(wide)
    } else {
        Err(SerializeValuesError::ValueOutOfRange(typ.name()))
    })
}

fn ser_typed(
    value: &CqlValue,
    typ: &ColumnType,
    buf: &mut Vec<u8>,
) -> Result<(), SerializeValuesError> {
    use ColumnType::*;

    // Integer widening and narrowing first, it cuts across variants.
    if let Some(res) = integer_for_column(value, typ) {
        let wide = res?;
        match typ {
            TinyInt => buf.put_i8(wide as i8),
            SmallInt => buf.put_i16(wide as i16),
            Int => buf.put_i32(wide as i32),
            BigInt | Counter | Timestamp => buf.put_i64(wide),
            _ => unreachable!(),
        }
        return Ok(());
    }

    match (typ, value) {
        (Ascii, CqlValue::Ascii(s)) | (Ascii, CqlValue::Text(s)) => {
            if !s.is_ascii() {
                return Err(SerializeValuesError::NotAscii);
            }
            buf.extend_from_slice(s.as_bytes());
        }
        (Text, CqlValue::Text(s)) | (Text, CqlValue::Ascii(s)) => {
            buf.extend_from_slice(s.as_bytes());
        }
        (Blob, CqlValue::Blob(b)) => buf.extend_from_slice(b),
        (Boolean, CqlValue::Boolean(b)) => buf.put_u8(*b as u8),
        (Counter, CqlValue::Counter(c)) => buf.put_i64(c.0),
        (Timestamp, CqlValue::Timestamp(ts)) => buf.put_i64(ts.0),
        (Double, CqlValue::Double(d)) => buf.put_f64(*d),
        (Float, CqlValue::Float(f)) => buf.put_f32(*f),
        (Uuid, CqlValue::Uuid(u)) => buf.extend_from_slice(&u.as_bytes()[..]),
        (Timeuuid, CqlValue::Timeuuid(u)) => buf.extend_from_slice(&u.as_bytes()[..]),
        (Inet, CqlValue::Inet(addr)) => match addr {
            std::net::IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            std::net::IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
        },
        (Date, CqlValue::Date(d)) => buf.put_u32(d.0),
        (Time, CqlValue::Time(t)) => {
            if !(0..=86_399_999_999_999).contains(&t.0) {
                return Err(SerializeValuesError::ValueOutOfRange("time"));
            }
            buf.put_i64(t.0);
        }
        (Varint, CqlValue::Varint(v)) => buf.extend_from_slice(v.as_signed_bytes_be_slice()),
        (Decimal, CqlValue::Decimal(d)) => {
            let (unscaled, scale) = d.as_signed_be_bytes_slice_and_exponent();
            buf.put_i32(scale);
            buf.extend_from_slice(unscaled);
        }
        (List(elem_typ), CqlValue::List(elems)) | (Set(elem_typ), CqlValue::Set(elems)) => {
            ser_collection_len(elems.len(), buf)?;
            for elem in elems {
                write_bound_value(&BoundValue::Value(elem.clone()), Some(elem_typ), buf)?;
            }
        }
        (Map(key_typ, val_typ), CqlValue::Map(entries)) => {
            ser_collection_len(entries.len(), buf)?;
            for (k, v) in entries {
                write_bound_value(&BoundValue::Value(k.clone()), Some(key_typ), buf)?;
                write_bound_value(&BoundValue::Value(v.clone()), Some(val_typ), buf)?;
            }
        }
        (Tuple(field_types), CqlValue::Tuple(fields)) => {
            if fields.len() > field_types.len() {
                return Err(SerializeValuesError::TooManyFields {
                    expected: field_types.len(),
                    got: fields.len(),
                });
            }
            for (field, field_typ) in fields.iter().zip(field_types) {
                let bound = match field {
                    Some(v) => BoundValue::Value(v.clone()),
                    None => BoundValue::Null,
                };
                write_bound_value(&bound, Some(field_typ), buf)?;
            }
        }
        (
            UserDefinedType { field_types, .. },
            CqlValue::UserDefinedType { fields, .. },
        ) => {
            if fields.len() > field_types.len() {
                return Err(SerializeValuesError::TooManyFields {
                    expected: field_types.len(),
                    got: fields.len(),
                });
            }
            for ((_, field), (_, field_typ)) in fields.iter().zip(field_types) {
                let bound = match field {
                    Some(v) => BoundValue::Value(v.clone()),
                    None => BoundValue::Null,
                };
                write_bound_value(&bound, Some(field_typ), buf)?;
            }
        }
        (typ, value) => return Err(mismatch(typ, value)),
    }
    Ok(())
}

fn ser_collection_len(len: usize, buf: &mut Vec<u8>) -> Result<(), SerializeValuesError> {
    let len: i32 = len
        .try_into()
        .map_err(|_| SerializeValuesError::ValueTooBig(len))?;
    buf.put_i32(len);
    Ok(())
}

fn ser_untyped(value: &CqlValue, buf: &mut Vec<u8>) -> Result<(), SerializeValuesError> {
    match value {
        CqlValue::Ascii(s) => {
            if !s.is_ascii() {
                return Err(SerializeValuesError::NotAscii);
            }
            buf.extend_from_slice(s.as_bytes());
        }
        CqlValue::Text(s) => buf.extend_from_slice(s.as_bytes()),
        CqlValue::Blob(b) => buf.extend_from_slice(b),
        CqlValue::Boolean(b) => buf.put_u8(*b as u8),
        CqlValue::TinyInt(v) => buf.put_i8(*v),
        CqlValue::SmallInt(v) => buf.put_i16(*v),
        CqlValue::Int(v) => buf.put_i32(*v),
        CqlValue::BigInt(v) => buf.put_i64(*v),
        CqlValue::Counter(c) => buf.put_i64(c.0),
        CqlValue::Double(d) => buf.put_f64(*d),
        CqlValue::Float(f) => buf.put_f32(*f),
        CqlValue::Uuid(u) => buf.extend_from_slice(&u.as_bytes()[..]),
        CqlValue::Timeuuid(u) => buf.extend_from_slice(&u.as_bytes()[..]),
        CqlValue::Inet(addr) => match addr {
            std::net::IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            std::net::IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
        },
        CqlValue::Date(d) => buf.put_u32(d.0),
        CqlValue::Time(t) => {
            if !(0..=86_399_999_999_999).contains(&t.0) {
                return Err(SerializeValuesError::ValueOutOfRange("time"));
            }
            buf.put_i64(t.0);
        }
        CqlValue::Timestamp(ts) => buf.put_i64(ts.0),
        CqlValue::Varint(v) => buf.extend_from_slice(v.as_signed_bytes_be_slice()),
        CqlValue::Decimal(d) => {
            let (unscaled, scale) = d.as_signed_be_bytes_slice_and_exponent();
            buf.put_i32(scale);
            buf.extend_from_slice(unscaled);
        }
        CqlValue::List(elems) | CqlValue::Set(elems) => {
            ser_collection_len(elems.len(), buf)?;
            for elem in elems {
                write_bound_value(&BoundValue::Value(elem.clone()), None, buf)?;
            }
        }
        CqlValue::Map(entries) => {
            ser_collection_len(entries.len(), buf)?;
            for (k, v) in entries {
                write_bound_value(&BoundValue::Value(k.clone()), None, buf)?;
                write_bound_value(&BoundValue::Value(v.clone()), None, buf)?;
            }
        }
        CqlValue::Tuple(fields) => {
            for field in fields {
                let bound = match field {
                    Some(v) => BoundValue::Value(v.clone()),
                    None => BoundValue::Null,
                };
                write_bound_value(&bound, None, buf)?;
            }
        }
        CqlValue::UserDefinedType { fields, .. } => {
            for (_, field) in fields {
                let bound = match field {
                    Some(v) => BoundValue::Value(v.clone()),
                    None => BoundValue::Null,
                };
                write_bound_value(&bound, None, buf)?;
            }
        }
        CqlValue::Empty => {}
    }
    Ok(())
}
