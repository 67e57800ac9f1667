use super::response;
use thiserror::Error;

/// An error that occurred when producing or consuming a whole frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Frame is compressed, but no compressor has been negotiated")]
    NoCompressionNegotiated,
    #[error("Received a frame with the client-to-server version bit")]
    FrameFromClient,
    #[error("Received a frame with unsupported protocol version {0:#04x}")]
    VersionNotSupported(u8),
    #[error("Received a frame with unknown response opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),
    #[error("Frame decompression failed")]
    FrameDecompression,
    #[error("Frame compression failed")]
    FrameCompression,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<response::TryFromPrimitiveError<u8>> for FrameError {
    fn from(err: response::TryFromPrimitiveError<u8>) -> Self {
        FrameError::UnknownOpcode(err.primitive())
    }
}

/// An error that occurred when serializing or deserializing a frame body.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Could not serialize frame: {0}")]
    BadDataToSerialize(String),
    #[error("Could not deserialize frame: {0}")]
    BadIncomingData(String),
    #[error("Could not decode a CQL value: {0}")]
    MalformedValue(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Type id {0:#06x} is not known")]
    UnknownTypeId(u16),
    #[error(transparent)]
    SerializeValuesError(#[from] crate::frame::value::SerializeValuesError),
    #[error("Invalid UTF-8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    TryFromSliceError(#[from] std::array::TryFromSliceError),
}
