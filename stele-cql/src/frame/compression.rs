//! Body compression as a pluggable capability.
//!
//! Which algorithm (if any) a connection uses is decided during the
//! handshake: the client offers the algorithm name in STARTUP, picked
//! from the server's SUPPORTED list. STARTUP and OPTIONS themselves are
//! never compressed.

use bytes::BufMut;

use super::frame_errors::FrameError;

/// A frame-body compression algorithm.
///
/// Implementations must be stateless: the same object is shared by every
/// connection of a session and used concurrently.
pub trait Compressor: Send + Sync {
    /// The algorithm name offered in STARTUP and matched against the
    /// server's SUPPORTED `COMPRESSION` list.
    fn algorithm(&self) -> &str;

    /// Compresses `body` and appends the result to `out`.
    fn compress(&self, body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError>;

    /// Decompresses a whole compressed frame body.
    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>, FrameError>;
}

/// The `lz4` algorithm: a big-endian u32 uncompressed length followed by
/// an LZ4 block.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> &str {
        "lz4"
    }

    fn compress(&self, body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
        let compressed = lz4_flex::compress(body);
        out.reserve_exact(std::mem::size_of::<u32>() + compressed.len());
        out.put_u32(body.len() as u32);
        out.extend_from_slice(&compressed[..]);
        Ok(())
    }

    fn decompress(&self, mut body: &[u8]) -> Result<Vec<u8>, FrameError> {
        if body.len() < 4 {
            return Err(FrameError::FrameDecompression);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&body[..4]);
        body = &body[4..];
        let uncomp_len = u32::from_be_bytes(len_bytes) as usize;
        lz4_flex::decompress(body, uncomp_len).map_err(|_| FrameError::FrameDecompression)
    }
}

/// The `snappy` algorithm, raw (unframed) encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn algorithm(&self) -> &str {
        "snappy"
    }

    fn compress(&self, body: &[u8], out: &mut Vec<u8>) -> Result<(), FrameError> {
        let old_size = out.len();
        out.resize(old_size + snap::raw::max_compress_len(body.len()), 0);
        let compressed_size = snap::raw::Encoder::new()
            .compress(body, &mut out[old_size..])
            .map_err(|_| FrameError::FrameCompression)?;
        out.truncate(old_size + compressed_size);
        Ok(())
    }

    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>, FrameError> {
        snap::raw::Decoder::new()
            .decompress_vec(body)
            .map_err(|_| FrameError::FrameDecompression)
    }
}
