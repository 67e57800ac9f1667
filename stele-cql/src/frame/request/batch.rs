use bytes::BufMut;
use std::borrow::Cow;
use std::convert::TryInto;

use crate::frame::frame_errors::ParseError;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;
use crate::frame::value::SerializedValues;

// Batch flags. Unlike QUERY, batches take no paging or page-size flags.
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;

/// A list of statements executed as one unit. Values are positional
/// only; the server rejects named values in batches, so the driver never
/// builds them.
pub struct Batch<'b> {
    pub statements: Cow<'b, [BatchStatement<'b>]>,
    pub batch_type: BatchType,
    pub consistency: types::Consistency,
    pub serial_consistency: Option<types::SerialConsistency>,
    pub timestamp: Option<i64>,
    pub values: Vec<SerializedValues>,
}

/// The type of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Logged = 0,
    Unlogged = 1,
    Counter = 2,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BatchStatement<'a> {
    Query { text: Cow<'a, str> },
    Prepared { id: Cow<'a, [u8]> },
}

impl SerializableRequest for Batch<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Batch;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), ParseError> {
        if self.values.len() != self.statements.len() {
            return Err(ParseError::BadDataToSerialize(format!(
                "Batch has {} statements but {} value lists",
                self.statements.len(),
                self.values.len()
            )));
        }

        buf.put_u8(self.batch_type as u8);

        types::write_short(self.statements.len().try_into()?, buf);
        for (statement, values) in self.statements.iter().zip(self.values.iter()) {
            statement.serialize(buf)?;
            values.write_to_request(buf);
        }

        types::write_consistency(self.consistency, buf);

        let mut flags = 0;
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }
        buf.put_u8(flags);

        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }
}

impl BatchStatement<'_> {
    fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        match self {
            Self::Query { text } => {
                buf.put_u8(0);
                types::write_long_string(text, buf)?;
            }
            Self::Prepared { id } => {
                buf.put_u8(1);
                types::write_short_bytes(id, buf)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::response::result::CqlValue;
    use crate::frame::types::Consistency;
    use crate::frame::value::BoundValue;

    #[test]
    fn batch_body_layout() {
        let mut delete_values = SerializedValues::new();
        delete_values
            .add_value_untyped(&BoundValue::Value(CqlValue::Int(1)))
            .unwrap();

        let batch = Batch {
            statements: Cow::Owned(vec![
                BatchStatement::Query {
                    text: "INSERT INTO users (code, name) VALUES (2, 'Marge')".into(),
                },
                BatchStatement::Prepared {
                    id: Cow::Owned(vec![0xde, 0xad]),
                },
            ]),
            batch_type: BatchType::Logged,
            consistency: Consistency::Quorum,
            serial_consistency: None,
            timestamp: None,
            values: vec![SerializedValues::new(), delete_values],
        };

        let mut buf = Vec::new();
        batch.serialize(&mut buf).unwrap();

        let mut p = &buf[..];
        assert_eq!(p[0], 0); // logged
        p = &p[1..];
        assert_eq!(types::read_short(&mut p).unwrap(), 2);

        // First statement: kind 0 + long string + zero values.
        assert_eq!(p[0], 0);
        p = &p[1..];
        assert!(types::read_long_string(&mut p)
            .unwrap()
            .starts_with("INSERT"));
        assert_eq!(types::read_short(&mut p).unwrap(), 0);

        // Second statement: kind 1 + short bytes + one value.
        assert_eq!(p[0], 1);
        p = &p[1..];
        assert_eq!(types::read_short_bytes(&mut p).unwrap(), &[0xde, 0xad][..]);
        assert_eq!(types::read_short(&mut p).unwrap(), 1);
        assert_eq!(types::read_bytes(&mut p).unwrap(), &1i32.to_be_bytes()[..]);

        assert_eq!(types::read_consistency(&mut p).unwrap(), Consistency::Quorum);
        assert_eq!(p, &[0u8][..]); // flags byte, nothing optional
    }

    #[test]
    fn mismatched_value_list_count_is_rejected() {
        let batch = Batch {
            statements: Cow::Owned(vec![BatchStatement::Query {
                text: "SELECT 1".into(),
            }]),
            batch_type: BatchType::Unlogged,
            consistency: Consistency::One,
            serial_consistency: None,
            timestamp: None,
            values: vec![],
        };
        assert!(batch.serialize(&mut Vec::new()).is_err());
    }
}
