use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use std::{
    convert::{TryFrom, TryInto},
    net::IpAddr,
    result::Result as StdResult,
    str,
};
use uuid::Uuid;

use crate::frame::frame_errors::ParseError;
use crate::frame::response::event::SchemaChangeEvent;
use crate::frame::types;
use crate::frame::value::{
    Counter, CqlDate, CqlDecimal, CqlTime, CqlTimestamp, CqlTimeuuid, CqlVarint,
};

#[derive(Debug)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug)]
pub struct Prepared {
    pub id: Bytes,
    pub prepared_metadata: PreparedMetadata,
    pub result_metadata: ResultMetadata,
}

#[derive(Debug)]
pub struct SchemaChange {
    pub event: SchemaChangeEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub ks_name: String,
    pub table_name: String,
}

/// The closed set of CQL column types this driver understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Float,
    Inet,
    Int,
    SmallInt,
    Text,
    Time,
    Timestamp,
    Timeuuid,
    TinyInt,
    Uuid,
    Varint,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    Tuple(Vec<ColumnType>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        field_types: Vec<(String, ColumnType)>,
    },
}

impl ColumnType {
    /// The CQL name of the type, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Ascii => "ascii",
            ColumnType::BigInt => "bigint",
            ColumnType::Blob => "blob",
            ColumnType::Boolean => "boolean",
            ColumnType::Counter => "counter",
            ColumnType::Date => "date",
            ColumnType::Decimal => "decimal",
            ColumnType::Double => "double",
            ColumnType::Float => "float",
            ColumnType::Inet => "inet",
            ColumnType::Int => "int",
            ColumnType::SmallInt => "smallint",
            ColumnType::Text => "text",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Timeuuid => "timeuuid",
            ColumnType::TinyInt => "tinyint",
            ColumnType::Uuid => "uuid",
            ColumnType::Varint => "varint",
            ColumnType::List(_) => "list",
            ColumnType::Map(_, _) => "map",
            ColumnType::Set(_) => "set",
            ColumnType::Tuple(_) => "tuple",
            ColumnType::UserDefinedType { .. } => "udt",
        }
    }

    // Returns true if the type admits a special, zero-length empty value
    // distinct from null. String and blob types cannot: their natural
    // representation already covers the empty cell.
    pub(crate) fn supports_special_empty_value(&self) -> bool {
        !matches!(
            self,
            ColumnType::Ascii
                | ColumnType::Text
                | ColumnType::Blob
                | ColumnType::Counter
                | ColumnType::List(_)
                | ColumnType::Map(_, _)
                | ColumnType::Set(_)
                | ColumnType::UserDefinedType { .. }
        )
    }
}

/// An owned, fully materialized CQL value.
#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Counter(Counter),
    Decimal(CqlDecimal),
    Date(CqlDate),
    Double(f64),
    /// A zero-length cell of a non-string type; distinct from null.
    Empty,
    Float(f32),
    Int(i32),
    BigInt(i64),
    Text(String),
    Timestamp(CqlTimestamp),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Set(Vec<CqlValue>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        /// Field order matches the UDT definition.
        fields: Vec<(String, Option<CqlValue>)>,
    },
    SmallInt(i16),
    TinyInt(i8),
    Time(CqlTime),
    Timeuuid(CqlTimeuuid),
    Tuple(Vec<Option<CqlValue>>),
    Uuid(Uuid),
    Varint(CqlVarint),
}

impl CqlValue {
    pub fn as_ascii(&self) -> Option<&String> {
        match self {
            Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_smallint(&self) -> Option<i16> {
        match self {
            Self::SmallInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_tinyint(&self) -> Option<i8> {
        match self {
            Self::TinyInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<Counter> {
        match self {
            Self::Counter(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Ascii(s) => Some(s),
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Vec<u8>> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_timeuuid(&self) -> Option<CqlTimeuuid> {
        match self {
            Self::Timeuuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_inet(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_cql_date(&self) -> Option<CqlDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_cql_time(&self) -> Option<CqlTime> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_cql_timestamp(&self) -> Option<CqlTimestamp> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Vec<(CqlValue, CqlValue)>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_udt(&self) -> Option<&Vec<(String, Option<CqlValue>)>> {
        match self {
            Self::UserDefinedType { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Vec<Option<CqlValue>>> {
        match self {
            Self::Tuple(t) => Some(t),
            _ => None,
        }
    }
}

impl From<i32> for CqlValue {
    fn from(v: i32) -> Self {
        CqlValue::Int(v)
    }
}

impl From<i64> for CqlValue {
    fn from(v: i64) -> Self {
        CqlValue::BigInt(v)
    }
}

impl From<bool> for CqlValue {
    fn from(v: bool) -> Self {
        CqlValue::Boolean(v)
    }
}

impl From<&str> for CqlValue {
    fn from(v: &str) -> Self {
        CqlValue::Text(v.to_owned())
    }
}

impl From<String> for CqlValue {
    fn from(v: String) -> Self {
        CqlValue::Text(v)
    }
}

impl From<f64> for CqlValue {
    fn from(v: f64) -> Self {
        CqlValue::Double(v)
    }
}

impl From<Uuid> for CqlValue {
    fn from(v: Uuid) -> Self {
        CqlValue::Uuid(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub typ: ColumnType,
}

#[derive(Debug, Default, Clone)]
pub struct ResultMetadata {
    pub col_count: usize,
    pub paging_state: Option<Bytes>,
    pub col_specs: Vec<ColumnSpec>,
}

/// Position of a bound column within the partition key.
#[derive(Debug, Copy, Clone)]
pub struct PartitionKeyIndex {
    /// index in the serialized values
    pub index: u16,
    /// sequence number in the partition key
    pub sequence: u16,
}

#[derive(Debug, Clone)]
pub struct PreparedMetadata {
    pub flags: i32,
    pub col_count: usize,
    pub pk_indexes: Vec<PartitionKeyIndex>,
    pub col_specs: Vec<ColumnSpec>,
}

#[derive(Debug, Default, PartialEq)]
pub struct Row {
    pub columns: Vec<Option<CqlValue>>,
}

#[derive(Debug)]
pub struct Rows {
    pub metadata: ResultMetadata,
    pub rows_count: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug)]
pub enum Result {
    Void,
    Rows(Rows),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

fn deser_table_spec(buf: &mut &[u8]) -> StdResult<TableSpec, ParseError> {
    let ks_name = types::read_string(buf)?.to_owned();
    let table_name = types::read_string(buf)?.to_owned();
    Ok(TableSpec {
        ks_name,
        table_name,
    })
}

fn deser_type(buf: &mut &[u8]) -> StdResult<ColumnType, ParseError> {
    use ColumnType::*;
    let id = types::read_short(buf)?;
    Ok(match id {
        0x0001 => Ascii,
        0x0002 => BigInt,
        0x0003 => Blob,
        0x0004 => Boolean,
        0x0005 => Counter,
        0x0006 => Decimal,
        0x0007 => Double,
        0x0008 => Float,
        0x0009 => Int,
        0x000B => Timestamp,
        0x000C => Uuid,
        0x000D => Text,
        0x000E => Varint,
        0x000F => Timeuuid,
        0x0010 => Inet,
        0x0011 => Date,
        0x0012 => Time,
        0x0013 => SmallInt,
        0x0014 => TinyInt,
        0x0020 => List(Box::new(deser_type(buf)?)),
        0x0021 => Map(Box::new(deser_type(buf)?), Box::new(deser_type(buf)?)),
        0x0022 => Set(Box::new(deser_type(buf)?)),
        0x0030 => {
            let keyspace = types::read_string(buf)?.to_string();
            let type_name = types::read_string(buf)?.to_string();
            let fields_size: usize = types::read_short(buf)?.into();

            let mut field_types = Vec::with_capacity(fields_size);
            for _ in 0..fields_size {
                let field_name = types::read_string(buf)?.to_string();
                let field_type = deser_type(buf)?;
                field_types.push((field_name, field_type));
            }

            UserDefinedType {
                keyspace,
                type_name,
                field_types,
            }
        }
        0x0031 => {
            let len: usize = types::read_short(buf)?.into();
            let mut type_list = Vec::with_capacity(len);
            for _ in 0..len {
                type_list.push(deser_type(buf)?);
            }
            Tuple(type_list)
        }
        id => return Err(ParseError::UnknownTypeId(id)),
    })
}

fn deser_col_specs(
    buf: &mut &[u8],
    global_table_spec: &Option<TableSpec>,
    col_count: usize,
) -> StdResult<Vec<ColumnSpec>, ParseError> {
    let mut col_specs = Vec::with_capacity(col_count);
    for _ in 0..col_count {
        let table_spec = if let Some(spec) = global_table_spec {
            spec.clone()
        } else {
            deser_table_spec(buf)?
        };
        let name = types::read_string(buf)?.to_owned();
        let typ = deser_type(buf)?;
        col_specs.push(ColumnSpec {
            table_spec,
            name,
            typ,
        });
    }
    Ok(col_specs)
}

// Rows-metadata flags
const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;

fn deser_result_metadata(buf: &mut &[u8]) -> StdResult<ResultMetadata, ParseError> {
    let flags = types::read_int(buf)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
    let has_more_pages = flags & FLAG_HAS_MORE_PAGES != 0;
    let no_metadata = flags & FLAG_NO_METADATA != 0;

    let col_count: usize = types::read_int(buf)?.try_into()?;

    let paging_state = if has_more_pages {
        Some(types::read_bytes(buf)?.to_owned().into())
    } else {
        None
    };

    if no_metadata {
        return Ok(ResultMetadata {
            col_count,
            paging_state,
            col_specs: vec![],
        });
    }

    let global_table_spec = if global_tables_spec {
        Some(deser_table_spec(buf)?)
    } else {
        None
    };

    let col_specs = deser_col_specs(buf, &global_table_spec, col_count)?;

    Ok(ResultMetadata {
        col_count,
        paging_state,
        col_specs,
    })
}

fn deser_prepared_metadata(buf: &mut &[u8]) -> StdResult<PreparedMetadata, ParseError> {
    let flags = types::read_int(buf)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;

    let col_count: usize = types::read_int(buf)?.try_into()?;
    let pk_count: usize = types::read_int(buf)?.try_into()?;

    let mut pk_indexes = Vec::with_capacity(pk_count);
    for i in 0..pk_count {
        pk_indexes.push(PartitionKeyIndex {
            index: types::read_short(buf)?,
            sequence: i as u16,
        });
    }
    pk_indexes.sort_unstable_by_key(|pki| pki.index);

    let global_table_spec = if global_tables_spec {
        Some(deser_table_spec(buf)?)
    } else {
        None
    };

    let col_specs = deser_col_specs(buf, &global_table_spec, col_count)?;

    Ok(PreparedMetadata {
        flags,
        col_count,
        pk_indexes,
        col_specs,
    })
}

fn read_utf8(buf: &[u8]) -> StdResult<&str, ParseError> {
    str::from_utf8(buf)
        .map_err(|err| ParseError::MalformedValue(format!("Invalid UTF-8 in text value: {}", err)))
}

pub fn deser_cql_value(typ: &ColumnType, buf: &mut &[u8]) -> StdResult<CqlValue, ParseError> {
    use ColumnType::*;

    if buf.is_empty() && typ.supports_special_empty_value() {
        return Ok(CqlValue::Empty);
    }

    let wrong_len = |expected: usize, got: usize| {
        ParseError::MalformedValue(format!(
            "Expected a {} byte buffer, got {}",
            expected, got
        ))
    };

    Ok(match typ {
        Ascii => {
            if !buf.is_ascii() {
                return Err(ParseError::MalformedValue(
                    "ascii value is not ASCII".to_string(),
                ));
            }
            CqlValue::Ascii(read_utf8(buf)?.to_owned())
        }
        Text => CqlValue::Text(read_utf8(buf)?.to_owned()),
        Blob => CqlValue::Blob(buf.to_vec()),
        Boolean => {
            if buf.len() != 1 {
                return Err(wrong_len(1, buf.len()));
            }
            CqlValue::Boolean(buf[0] != 0x00)
        }
        TinyInt => {
            if buf.len() != 1 {
                return Err(wrong_len(1, buf.len()));
            }
            CqlValue::TinyInt(buf.read_i8()?)
        }
        SmallInt => {
            if buf.len() != 2 {
                return Err(wrong_len(2, buf.len()));
            }
            CqlValue::SmallInt(buf.read_i16::<BigEndian>()?)
        }
        Int => {
            if buf.len() != 4 {
                return Err(wrong_len(4, buf.len()));
            }
            CqlValue::Int(buf.read_i32::<BigEndian>()?)
        }
        BigInt => {
            if buf.len() != 8 {
                return Err(wrong_len(8, buf.len()));
            }
            CqlValue::BigInt(buf.read_i64::<BigEndian>()?)
        }
        Counter => {
            if buf.len() != 8 {
                return Err(wrong_len(8, buf.len()));
            }
            CqlValue::Counter(crate::frame::value::Counter(buf.read_i64::<BigEndian>()?))
        }
        Float => {
            if buf.len() != 4 {
                return Err(wrong_len(4, buf.len()));
            }
            CqlValue::Float(buf.read_f32::<BigEndian>()?)
        }
        Double => {
            if buf.len() != 8 {
                return Err(wrong_len(8, buf.len()));
            }
            CqlValue::Double(buf.read_f64::<BigEndian>()?)
        }
        Date => {
            if buf.len() != 4 {
                return Err(wrong_len(4, buf.len()));
            }
            CqlValue::Date(CqlDate(buf.read_u32::<BigEndian>()?))
        }
        Time => {
            if buf.len() != 8 {
                return Err(wrong_len(8, buf.len()));
            }
            let nanoseconds = buf.read_i64::<BigEndian>()?;
            // Valid values are in the range 0 to 86399999999999
            if !(0..=86_399_999_999_999).contains(&nanoseconds) {
                return Err(ParseError::MalformedValue(format!(
                    "Invalid time value: {}",
                    nanoseconds
                )));
            }
            CqlValue::Time(CqlTime(nanoseconds))
        }
        Timestamp => {
            if buf.len() != 8 {
                return Err(wrong_len(8, buf.len()));
            }
            CqlValue::Timestamp(CqlTimestamp(buf.read_i64::<BigEndian>()?))
        }
        Uuid => {
            if buf.len() != 16 {
                return Err(wrong_len(16, buf.len()));
            }
            CqlValue::Uuid(uuid::Uuid::from_bytes(<[u8; 16]>::try_from(&buf[0..16])?))
        }
        Timeuuid => {
            if buf.len() != 16 {
                return Err(wrong_len(16, buf.len()));
            }
            CqlValue::Timeuuid(CqlTimeuuid::from_bytes(<[u8; 16]>::try_from(&buf[0..16])?))
        }
        Inet => CqlValue::Inet(match buf.len() {
            4 => IpAddr::from(<[u8; 4]>::try_from(&buf[0..4])?),
            16 => IpAddr::from(<[u8; 16]>::try_from(&buf[0..16])?),
            v => {
                return Err(ParseError::MalformedValue(format!(
                    "Invalid inet bytes length: {}",
                    v
                )));
            }
        }),
        Varint => CqlValue::Varint(CqlVarint::from_signed_bytes_be(buf.to_vec())),
        Decimal => {
            let scale = types::read_int(buf)?;
            CqlValue::Decimal(CqlDecimal::from_signed_be_bytes_and_exponent(
                buf.to_vec(),
                scale,
            ))
        }
        List(elem_type) => {
            let len: usize = types::read_int(buf)?.try_into().map_err(|_| {
                ParseError::MalformedValue("Negative collection size".to_string())
            })?;
            let mut res = Vec::with_capacity(len);
            for _ in 0..len {
                let mut b = types::read_bytes(buf)?;
                res.push(deser_cql_value(elem_type, &mut b)?);
            }
            CqlValue::List(res)
        }
        Set(elem_type) => {
            let len: usize = types::read_int(buf)?.try_into().map_err(|_| {
                ParseError::MalformedValue("Negative collection size".to_string())
            })?;
            let mut res = Vec::with_capacity(len);
            for _ in 0..len {
                let mut b = types::read_bytes(buf)?;
                res.push(deser_cql_value(elem_type, &mut b)?);
            }
            CqlValue::Set(res)
        }
        Map(key_type, value_type) => {
            let len: usize = types::read_int(buf)?.try_into().map_err(|_| {
                ParseError::MalformedValue("Negative collection size".to_string())
            })?;
            let mut res = Vec::with_capacity(len);
            for _ in 0..len {
                let mut b = types::read_bytes(buf)?;
                let key = deser_cql_value(key_type, &mut b)?;
                b = types::read_bytes(buf)?;
                let val = deser_cql_value(value_type, &mut b)?;
                res.push((key, val));
            }
            CqlValue::Map(res)
        }
        UserDefinedType {
            keyspace,
            type_name,
            field_types,
        } => {
            let mut fields: Vec<(String, Option<CqlValue>)> = Vec::new();

            for (field_name, field_type) in field_types {
                // A value serialized before a field was added to the UDT
                // ends early; the remaining fields read as null.
                if buf.is_empty() {
                    break;
                }

                let mut field_value: Option<CqlValue> = None;
                if let Some(mut field_val_bytes) = types::read_bytes_opt(buf)? {
                    field_value = Some(deser_cql_value(field_type, &mut field_val_bytes)?);
                }

                fields.push((field_name.clone(), field_value));
            }

            CqlValue::UserDefinedType {
                keyspace: keyspace.clone(),
                type_name: type_name.clone(),
                fields,
            }
        }
        Tuple(type_list) => {
            let mut res = Vec::with_capacity(type_list.len());
            for elem_type in type_list {
                if buf.is_empty() {
                    // Missing trailing fields decode as null.
                    res.push(None);
                    continue;
                }
                match types::read_bytes_opt(buf)? {
                    Some(mut b) => res.push(Some(deser_cql_value(elem_type, &mut b)?)),
                    None => res.push(None),
                };
            }
            CqlValue::Tuple(res)
        }
    })
}

fn deser_rows(buf: &mut &[u8]) -> StdResult<Rows, ParseError> {
    let metadata = deser_result_metadata(buf)?;

    // The driver never sets SKIP_METADATA, so every rows result carries
    // its column specs.
    if metadata.col_count != metadata.col_specs.len() {
        return Err(ParseError::BadIncomingData(format!(
            "Bad column count: claimed {}, got {} specs",
            metadata.col_count,
            metadata.col_specs.len()
        )));
    }

    let rows_count: usize = types::read_int(buf)?.try_into()?;

    let mut rows = Vec::with_capacity(rows_count);
    for _ in 0..rows_count {
        let mut columns = Vec::with_capacity(metadata.col_count);
        for i in 0..metadata.col_count {
            let v = if let Some(mut b) = types::read_bytes_opt(buf)? {
                Some(deser_cql_value(&metadata.col_specs[i].typ, &mut b)?)
            } else {
                None
            };
            columns.push(v);
        }
        rows.push(Row { columns });
    }
    Ok(Rows {
        metadata,
        rows_count,
        rows,
    })
}

fn deser_set_keyspace(buf: &mut &[u8]) -> StdResult<SetKeyspace, ParseError> {
    let keyspace_name = types::read_string(buf)?.to_string();
    Ok(SetKeyspace { keyspace_name })
}

fn deser_prepared(buf: &mut &[u8]) -> StdResult<Prepared, ParseError> {
    let id: Bytes = types::read_short_bytes(buf)?.to_owned().into();
    let prepared_metadata = deser_prepared_metadata(buf)?;
    let result_metadata = deser_result_metadata(buf)?;
    Ok(Prepared {
        id,
        prepared_metadata,
        result_metadata,
    })
}

fn deser_schema_change(buf: &mut &[u8]) -> StdResult<SchemaChange, ParseError> {
    Ok(SchemaChange {
        event: SchemaChangeEvent::deserialize(buf)?,
    })
}

pub fn deserialize(buf: &mut &[u8]) -> StdResult<Result, ParseError> {
    use self::Result::*;
    Ok(match types::read_int(buf)? {
        0x0001 => Void,
        0x0002 => Rows(deser_rows(buf)?),
        0x0003 => SetKeyspace(deser_set_keyspace(buf)?),
        0x0004 => Prepared(deser_prepared(buf)?),
        0x0005 => SchemaChange(deser_schema_change(buf)?),
        k => {
            return Err(ParseError::BadIncomingData(format!(
                "Unknown result kind: {}",
                k
            )))
        }
    })
}
