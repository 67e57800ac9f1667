use std::borrow::Cow;

use bytes::{BufMut, Bytes};

use crate::frame::frame_errors::ParseError;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;
use crate::frame::value::SerializedValues;

// Query parameter flags
pub const FLAG_VALUES: u8 = 0x01;
pub const FLAG_SKIP_METADATA: u8 = 0x02;
pub const FLAG_PAGE_SIZE: u8 = 0x04;
pub const FLAG_WITH_PAGING_STATE: u8 = 0x08;
pub const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
pub const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;
pub const FLAG_WITH_NAMES_FOR_VALUES: u8 = 0x40;

/// Executes a single unprepared statement.
pub struct Query<'q> {
    pub contents: Cow<'q, str>,
    pub parameters: QueryParameters<'q>,
}

impl SerializableRequest for Query<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Query;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), ParseError> {
        types::write_long_string(&self.contents, buf)?;
        self.parameters.serialize(buf)?;
        Ok(())
    }
}

/// The execution parameters shared by QUERY and EXECUTE.
pub struct QueryParameters<'a> {
    pub consistency: types::Consistency,
    pub serial_consistency: Option<types::SerialConsistency>,
    pub timestamp: Option<i64>,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
    pub skip_metadata: bool,
    pub values: Cow<'a, SerializedValues>,
}

impl Default for QueryParameters<'_> {
    fn default() -> Self {
        Self {
            consistency: Default::default(),
            serial_consistency: None,
            timestamp: None,
            page_size: None,
            paging_state: None,
            skip_metadata: false,
            values: Cow::Borrowed(SerializedValues::EMPTY),
        }
    }
}

impl QueryParameters<'_> {
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        types::write_consistency(self.consistency, buf);

        let mut flags = 0;
        // A request with no bound values must not carry the VALUES flag.
        if !self.values.is_empty() {
            flags |= FLAG_VALUES;
        }
        if self.skip_metadata {
            flags |= FLAG_SKIP_METADATA;
        }
        if self.page_size.is_some() {
            flags |= FLAG_PAGE_SIZE;
        }
        if self.paging_state.is_some() {
            flags |= FLAG_WITH_PAGING_STATE;
        }
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }

        buf.put_u8(flags);

        if !self.values.is_empty() {
            self.values.write_to_request(buf);
        }
        if let Some(page_size) = self.page_size {
            types::write_int(page_size, buf);
        }
        if let Some(paging_state) = &self.paging_state {
            types::write_bytes(paging_state, buf)?;
        }
        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::types::Consistency;
    use crate::frame::value::BoundValue;
    use crate::frame::response::result::CqlValue;

    #[test]
    fn empty_values_omit_values_flag() {
        let params = QueryParameters::default();
        let mut buf = Vec::new();
        params.serialize(&mut buf).unwrap();

        // [consistency: 2 bytes][flags: 1 byte]
        assert_eq!(buf.len(), 3);
        assert_eq!(buf[2] & FLAG_VALUES, 0);
    }

    #[test]
    fn full_parameter_layout() {
        let mut values = SerializedValues::new();
        values.add_value_untyped(&BoundValue::Value(CqlValue::Int(7))).unwrap();

        let params = QueryParameters {
            consistency: Consistency::One,
            serial_consistency: Some(types::SerialConsistency::Serial),
            timestamp: Some(1234),
            page_size: Some(100),
            paging_state: Some(Bytes::from_static(&[0xca, 0xfe])),
            skip_metadata: false,
            values: Cow::Owned(values),
        };
        let mut buf = Vec::new();
        params.serialize(&mut buf).unwrap();

        let mut p = &buf[..];
        assert_eq!(types::read_consistency(&mut p).unwrap(), Consistency::One);
        let flags = p[0];
        p = &p[1..];
        assert_eq!(
            flags,
            FLAG_VALUES
                | FLAG_PAGE_SIZE
                | FLAG_WITH_PAGING_STATE
                | FLAG_WITH_SERIAL_CONSISTENCY
                | FLAG_WITH_DEFAULT_TIMESTAMP
        );

        // values: [short 1][int 4][7 as 4 bytes]
        assert_eq!(types::read_short(&mut p).unwrap(), 1);
        assert_eq!(types::read_bytes(&mut p).unwrap(), &7i32.to_be_bytes()[..]);
        assert_eq!(types::read_int(&mut p).unwrap(), 100);
        assert_eq!(types::read_bytes(&mut p).unwrap(), &[0xca, 0xfe][..]);
        assert_eq!(types::read_short(&mut p).unwrap(), 0x0008);
        assert_eq!(types::read_long(&mut p).unwrap(), 1234);
        assert!(p.is_empty());
    }
}
