//! The driver's error taxonomy.
//!
//! Every request path returns these as first-class values; the only
//! errors treated as caller bugs are [DriverError::InvalidArguments].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use stele_cql::frame::frame_errors::{FrameError, ParseError};
use stele_cql::frame::response::error::DbError;
use stele_cql::frame::value::SerializeValuesError;

/// Top-level error returned by every session operation.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Socket-level or connection-lifecycle failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The peer sent something the protocol does not allow here:
    /// an unexpected opcode, a bad version byte, a malformed frame.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A value could not be encoded for, or decoded from, the wire.
    #[error("Malformed value: {0}")]
    MalformedValue(String),

    /// The server refused the credentials or the authentication
    /// exchange broke down.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A decoded ERROR response, surfaced to the caller unchanged.
    /// `unprepared` never reaches the caller on the first occurrence;
    /// the connection re-prepares and retries once.
    #[error("Database error: {error} (reason: {reason})")]
    Server { error: DbError, reason: String },

    /// Caller misuse: named values in a batch, an unknown
    /// load-balancing policy name, a malformed node string.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The request exceeded its client-side deadline. The stream id
    /// stays quarantined until the late response arrives.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Socket/transport failures, including the cluster-level
/// "nothing to talk to" condition.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection is closed: {0}")]
    Broken(BrokenConnectionError),

    #[error("No node is currently up")]
    NotConnected,
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}

/// Why a connection's router stopped. Cloned into every pending
/// request when the connection breaks.
#[derive(Error, Debug, Clone)]
pub enum BrokenConnectionError {
    #[error("Failed to read a frame: {0}")]
    FrameError(Arc<FrameError>),

    #[error("Failed to write a frame: {0}")]
    WriteError(Arc<std::io::Error>),

    #[error("Received a response with unexpected stream id {0}")]
    UnexpectedStreamId(i16),

    #[error("Too many orphaned stream ids: {0}")]
    TooManyOrphanedStreamIds(usize),

    #[error("Keepalive request failed: {0}")]
    KeepaliveError(Arc<DriverError>),

    #[error("Event handling failed: {0}")]
    EventError(Arc<DriverError>),

    #[error("Connection was requested to close")]
    Closed,
}

impl From<BrokenConnectionError> for DriverError {
    fn from(err: BrokenConnectionError) -> Self {
        DriverError::Connection(ConnectionError::Broken(err))
    }
}

impl From<FrameError> for DriverError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => DriverError::Connection(ConnectionError::Io(Arc::new(io))),
            other => DriverError::Protocol(other.to_string()),
        }
    }
}

impl From<ParseError> for DriverError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::SerializeValuesError(e) => e.into(),
            ParseError::MalformedValue(msg) => DriverError::MalformedValue(msg),
            other => DriverError::Protocol(other.to_string()),
        }
    }
}

impl From<SerializeValuesError> for DriverError {
    fn from(err: SerializeValuesError) -> Self {
        DriverError::MalformedValue(err.to_string())
    }
}

impl DriverError {
    /// True for the `unprepared` server error, which the connection
    /// recovers from locally by re-preparing.
    pub(crate) fn is_unprepared(&self) -> bool {
        matches!(
            self,
            DriverError::Server {
                error: DbError::Unprepared { .. },
                ..
            }
        )
    }
}
