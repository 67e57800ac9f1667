//! A fixed-size set of data connections to one node.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::errors::{ConnectionError, DriverError};
use crate::network::{Connection, ConnectionConfig};

/// All connections of a pool share the node address and the cluster's
/// prepared cache. Broken connections are not refilled here: recovery
/// goes through the cluster's control-connection events, which tear the
/// pool down on DOWN and build a fresh one on UP.
pub(crate) struct NodePool {
    connections: Vec<Arc<Connection>>,
    next: AtomicUsize,
}

impl NodePool {
    pub(crate) async fn open(
        address: SocketAddr,
        pool_size: usize,
        config: &ConnectionConfig,
    ) -> Result<NodePool, DriverError> {
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let (connection, _error_receiver) = Connection::open(address, config.clone()).await?;
            connections.push(Arc::new(connection));
        }

        debug!(address = %address, size = pool_size, "Node pool is up");
        Ok(NodePool {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    /// Picks a live connection round-robin. Fails only when every
    /// connection of the pool has broken.
    pub(crate) fn connection(&self) -> Result<Arc<Connection>, ConnectionError> {
        let len = self.connections.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..len {
            let connection = &self.connections[(start + i) % len];
            if !connection.is_broken() {
                return Ok(connection.clone());
            }
        }
        Err(ConnectionError::NotConnected)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connections.iter().any(|c| !c.is_broken())
    }
}
