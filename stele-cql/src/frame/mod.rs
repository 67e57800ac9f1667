pub mod compression;
pub mod frame_errors;
pub mod request;
pub mod response;
pub mod server_event_type;
pub mod types;
pub mod value;

#[cfg(test)]
mod value_tests;

use bytes::{Buf, BufMut, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};

use compression::Compressor;
use frame_errors::FrameError;
use request::SerializableRequest;
use response::ResponseOpcode;

const HEADER_SIZE: usize = 9;

/// Protocol version sent in request frames. Responses carry the same
/// version with the high bit set.
pub const PROTOCOL_VERSION: u8 = 0x04;

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

/// A request serialized into its final on-wire form, except for the
/// stream id which is patched in by the connection just before the write.
pub struct SerializedRequest {
    data: Vec<u8>,
}

impl SerializedRequest {
    pub fn make<R: SerializableRequest>(
        req: &R,
        compressor: Option<&dyn Compressor>,
        tracing: bool,
    ) -> Result<SerializedRequest, FrameError> {
        let mut flags = 0;
        let mut data = vec![0; HEADER_SIZE];

        if let Some(compressor) = compressor {
            flags |= FLAG_COMPRESSION;
            let mut body = Vec::new();
            req.serialize(&mut body)?;
            compressor.compress(&body, &mut data)?;
        } else {
            req.serialize(&mut data)?;
        }

        if tracing {
            flags |= FLAG_TRACING;
        }

        data[0] = PROTOCOL_VERSION;
        data[1] = flags;
        // Bytes 2..4 are the stream id, filled in by set_stream().
        data[4] = R::OPCODE as u8;

        let body_size = (data.len() - HEADER_SIZE) as u32;
        data[5..9].copy_from_slice(&body_size.to_be_bytes());

        Ok(Self { data })
    }

    pub fn set_stream(&mut self, stream: i16) {
        self.data[2..4].copy_from_slice(&stream.to_be_bytes());
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Header fields that are not determined by the request/response type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0x00,
            stream: 0,
        }
    }
}

/// Reads a whole response frame: the 9-byte header and exactly as many
/// body bytes as the header declares.
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<(FrameParams, ResponseOpcode, Bytes), FrameError> {
    let mut raw_header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw_header[..]).await?;

    let mut buf = &raw_header[..];

    let version = buf.get_u8();
    if version & 0x80 != 0x80 {
        return Err(FrameError::FrameFromClient);
    }
    if version & 0x7F != PROTOCOL_VERSION {
        return Err(FrameError::VersionNotSupported(version & 0x7F));
    }

    let flags = buf.get_u8();
    let stream = buf.get_i16();

    let frame_params = FrameParams {
        version,
        flags,
        stream,
    };

    let opcode = ResponseOpcode::try_from(buf.get_u8())?;
    let length = buf.get_u32() as usize;

    let mut raw_body = Vec::with_capacity(length).limit(length);
    while raw_body.has_remaining_mut() {
        let n = reader.read_buf(&mut raw_body).await?;
        if n == 0 {
            // EOF in the middle of a body
            return Err(FrameError::ConnectionClosed(
                raw_body.remaining_mut(),
                length,
            ));
        }
    }

    Ok((frame_params, opcode, raw_body.into_inner().into()))
}

/// A response body with its envelope extensions stripped off.
#[derive(Debug)]
pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<uuid::Uuid>,
    pub warnings: Vec<String>,
    pub custom_payload: Option<std::collections::HashMap<String, Vec<u8>>>,
    pub body: Bytes,
}

/// Undoes what the header flags announce: decompresses the body and
/// strips the tracing-id and warning-list prefixes.
pub fn parse_response_body_extensions(
    flags: u8,
    compressor: Option<&dyn Compressor>,
    mut body: Bytes,
) -> Result<ResponseBodyWithExtensions, FrameError> {
    if flags & FLAG_COMPRESSION != 0 {
        if let Some(compressor) = compressor {
            body = compressor.decompress(&body)?.into();
        } else {
            return Err(FrameError::NoCompressionNegotiated);
        }
    }

    let trace_id = if flags & FLAG_TRACING != 0 {
        let buf = &mut &*body;
        let trace_id = types::read_uuid(buf).map_err(frame_errors::ParseError::from)?;
        body.advance(16);
        Some(trace_id)
    } else {
        None
    };

    let warnings = if flags & FLAG_WARNING != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let warnings = types::read_string_list(buf).map_err(frame_errors::ParseError::from)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        warnings
    } else {
        Vec::new()
    };

    let custom_payload = if flags & FLAG_CUSTOM_PAYLOAD != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let payload_map = types::read_bytes_map(buf).map_err(frame_errors::ParseError::from)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        Some(payload_map)
    } else {
        None
    };

    Ok(ResponseBodyWithExtensions {
        trace_id,
        warnings,
        custom_payload,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::compression::{Compressor, SnappyCompressor};
    use super::request::{Options, SerializableRequest};
    use super::*;

    #[test]
    fn serialized_request_header_layout() {
        let mut req = SerializedRequest::make(&Options, None, false).unwrap();
        req.set_stream(0x0102);

        let data = req.get_data();
        assert_eq!(data.len(), HEADER_SIZE);
        assert_eq!(data[0], PROTOCOL_VERSION);
        assert_eq!(data[1], 0);
        assert_eq!(&data[2..4], &[0x01, 0x02]);
        assert_eq!(data[4], request::RequestOpcode::Options as u8);
        assert_eq!(&data[5..9], &[0, 0, 0, 0]);
    }

    #[test]
    fn compressed_request_sets_flag_and_length() {
        let query = request::Query {
            contents: "SELECT * FROM system.local".into(),
            parameters: Default::default(),
        };
        let req = SerializedRequest::make(&query, Some(&SnappyCompressor), false).unwrap();
        let data = req.get_data();
        assert_eq!(data[1] & FLAG_COMPRESSION, FLAG_COMPRESSION);

        let declared_len = u32::from_be_bytes(data[5..9].try_into().unwrap()) as usize;
        assert_eq!(declared_len, data.len() - HEADER_SIZE);

        // The body must round-trip through the compressor.
        let mut plain = Vec::new();
        query.serialize(&mut plain).unwrap();
        let restored = SnappyCompressor.decompress(&data[HEADER_SIZE..]).unwrap();
        assert_eq!(restored, plain);
    }

    #[tokio::test]
    async fn response_frame_round_trip() {
        // READY response with an empty body.
        let raw: &[u8] = &[0x84, 0x00, 0x00, 0x07, 0x02, 0, 0, 0, 0];
        let (params, opcode, body) = read_response_frame(&mut &raw[..]).await.unwrap();
        assert_eq!(params.version, 0x84);
        assert_eq!(params.stream, 7);
        assert_eq!(opcode, ResponseOpcode::Ready);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn response_frame_rejects_request_version() {
        let raw: &[u8] = &[0x04, 0x00, 0x00, 0x00, 0x02, 0, 0, 0, 0];
        let err = read_response_frame(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::FrameFromClient));
    }

    #[tokio::test]
    async fn response_frame_rejects_unknown_opcode() {
        let raw: &[u8] = &[0x84, 0x00, 0x00, 0x00, 0x42, 0, 0, 0, 0];
        let err = read_response_frame(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::UnknownOpcode(0x42)));
    }

    #[tokio::test]
    async fn response_frame_rejects_truncated_body() {
        let raw: &[u8] = &[0x84, 0x00, 0x00, 0x00, 0x08, 0, 0, 0, 10, 1, 2, 3];
        let err = read_response_frame(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed(7, 10)));
    }

    #[test]
    fn body_extensions_decompress_transparently() {
        let plain = b"some response body".to_vec();
        let mut compressed = Vec::new();
        SnappyCompressor.compress(&plain, &mut compressed).unwrap();

        let parsed = parse_response_body_extensions(
            FLAG_COMPRESSION,
            Some(&SnappyCompressor),
            compressed.into(),
        )
        .unwrap();
        assert_eq!(&parsed.body[..], &plain[..]);
    }

    #[test]
    fn compressed_body_without_compressor_is_rejected() {
        let err =
            parse_response_body_extensions(FLAG_COMPRESSION, None, Bytes::from_static(b"xx"))
                .unwrap_err();
        assert!(matches!(err, FrameError::NoCompressionNegotiated));
    }
}
