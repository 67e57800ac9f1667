//! An asynchronous driver for wide-column databases speaking the CQL
//! native protocol, version 4.
//!
//! The entry point is [Session]: configure it with [SessionConfig],
//! connect, then `query`, `prepare`/`execute` and `batch` against it.
//! Each node of the cluster gets a pool of multiplexed connections plus
//! a control connection that subscribes to topology and status events,
//! so nodes going down and coming back are handled without polling.
//!
//! ```no_run
//! use stele::{CqlValue, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stele::DriverError> {
//!     let session = Session::connect(SessionConfig::default()).await?;
//!
//!     let prepared = session
//!         .prepare("SELECT name FROM ks.users WHERE code = ?")
//!         .await?;
//!     let result = session.execute(&prepared, vec![CqlValue::Int(1)]).await?;
//!     for row in result.rows() {
//!         println!("{:?}", row);
//!     }
//!     Ok(())
//! }
//! ```

pub mod authentication;
pub mod client;
pub mod errors;
pub mod policies;
pub mod response;
pub mod statement;

mod cluster;
mod network;
mod prepared_cache;

pub use client::pager::PageStream;
pub use client::session::{Session, SessionConfig};
pub use errors::{ConnectionError, DriverError};
pub use network::AfterConnectHook;
pub use policies::load_balancing::LoadBalancingPolicy;
pub use response::QueryResult;
pub use statement::batch::{Batch, BatchStatement, BatchType};
pub use statement::{PreparedStatement, Statement, Values};

pub use stele_cql::frame::response::error::DbError;
pub use stele_cql::frame::types::SerialConsistency;
pub use stele_cql::{
    BoundValue, ColumnSpec, ColumnType, Compressor, Consistency, CqlValue, Lz4Compressor, Row,
    SnappyCompressor,
};
