use crate::frame::frame_errors::ParseError;
use crate::frame::types;
use std::collections::HashMap;

/// The server's supported STARTUP options, notably `COMPRESSION`.
#[derive(Debug)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let options = types::read_string_multimap(buf)?;
        Ok(Supported { options })
    }

    /// The compression algorithm names the server accepts.
    pub fn compression_algorithms(&self) -> &[String] {
        self.options
            .get("COMPRESSION")
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
