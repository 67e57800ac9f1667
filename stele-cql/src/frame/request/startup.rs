use std::borrow::Cow;
use std::collections::HashMap;

use crate::frame::frame_errors::ParseError;
use crate::frame::request::{RequestOpcode, SerializableRequest};
use crate::frame::types;

/// Finalizes connection negotiation. The options map carries at least
/// `CQL_VERSION` and, when compression was negotiated, `COMPRESSION`.
/// This frame itself is never compressed.
pub struct Startup<'a> {
    pub options: HashMap<Cow<'a, str>, Cow<'a, str>>,
}

impl SerializableRequest for Startup<'_> {
    const OPCODE: RequestOpcode = RequestOpcode::Startup;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), ParseError> {
        types::write_string_map(&self.options, buf)?;
        Ok(())
    }
}
