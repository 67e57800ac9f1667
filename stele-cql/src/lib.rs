//! Wire-level codec for the CQL native protocol, version 4.
//!
//! This crate knows nothing about sockets or sessions. It turns requests
//! into frames, frames back into responses, and CQL cells into typed
//! values. The driver crate (`stele`) builds connections and clusters on
//! top of it.

pub mod frame;

pub use crate::frame::compression::{Compressor, Lz4Compressor, SnappyCompressor};
pub use crate::frame::response::result::{ColumnSpec, ColumnType, CqlValue, Row};
pub use crate::frame::types::Consistency;
pub use crate::frame::value::{BoundValue, SerializedValues};
