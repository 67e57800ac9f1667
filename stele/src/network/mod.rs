mod connection;
mod pool;

pub use connection::AfterConnectHook;
pub(crate) use connection::{Connection, ConnectionConfig};
pub(crate) use pool::NodePool;
