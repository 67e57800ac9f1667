//! The cluster manager: one task owning the pool map, fed by control
//! connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use stele_cql::frame::response::event::{Event, StatusChangeEvent};

use crate::cluster::control_connection::{run_control_connection, ControlSignal};
use crate::cluster::node::{Node, NodeStatus};
use crate::cluster::state::ClusterState;
use crate::errors::{ConnectionError, DriverError};
use crate::network::{ConnectionConfig, NodePool};
use crate::policies::load_balancing::LoadBalancingPolicy;
use crate::prepared_cache::PreparedCache;

const SIGNAL_CHANNEL_SIZE: usize = 32;

/// Handle to the cluster worker. Owns the worker and the control
/// connection tasks; dropping it tears everything down, including the
/// data pools.
pub(crate) struct Cluster {
    state: Arc<ArcSwap<ClusterState>>,
    up_pools_watch: watch::Receiver<usize>,

    _worker_handle: RemoteHandle<()>,
    _control_handles: Vec<RemoteHandle<()>>,
}

impl Cluster {
    pub(crate) fn new(
        node_addresses: Vec<SocketAddr>,
        pool_config: ConnectionConfig,
        pool_size: usize,
        prepared_cache: Arc<PreparedCache>,
    ) -> Cluster {
        // A duplicate address in the configuration gets one pool, not
        // two; the second occurrence is logged and ignored.
        let mut nodes: Vec<Arc<Node>> = Vec::with_capacity(node_addresses.len());
        for address in node_addresses {
            if nodes.iter().any(|n| n.address == address) {
                warn!(address = %address, "Duplicate node address in configuration, ignoring");
                continue;
            }
            nodes.push(Arc::new(Node::new(address)));
        }

        let state = Arc::new(ArcSwap::from_pointee(ClusterState {
            nodes: nodes.clone(),
            pools: HashMap::new(),
        }));

        let (signal_sender, signal_receiver) = mpsc::channel(SIGNAL_CHANNEL_SIZE);
        let (up_pools_sender, up_pools_watch) = watch::channel(0usize);

        // Control connections share the data connections' config; the
        // event sender is added per connection attempt.
        let mut control_handles = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let (task, handle) = run_control_connection(
                node.address,
                pool_config.clone(),
                signal_sender.clone(),
            )
            .remote_handle();
            tokio::task::spawn(task);
            control_handles.push(handle);
        }

        let worker = ClusterWorker {
            state: state.clone(),
            pool_config,
            pool_size,
            prepared_cache,
            signal_receiver,
            up_pools_sender,
        };
        let (worker_task, worker_handle) = worker.work().remote_handle();
        tokio::task::spawn(worker_task);

        Cluster {
            state,
            up_pools_watch,
            _worker_handle: worker_handle,
            _control_handles: control_handles,
        }
    }

    /// Picks a pool according to the load-balancing policy. Fails with
    /// [ConnectionError::NotConnected] when no node is up.
    pub(crate) fn checkout(
        &self,
        policy: LoadBalancingPolicy,
    ) -> Result<Arc<NodePool>, DriverError> {
        let state = self.state.load();
        policy
            .pick(&state)
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    /// Waits until at least one pool is up, or the deadline passes.
    pub(crate) async fn wait_until_connected(
        &self,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        let mut watch = self.up_pools_watch.clone();
        let wait = async {
            loop {
                if *watch.borrow_and_update() > 0 {
                    return;
                }
                if watch.changed().await.is_err() {
                    // Worker is gone; the timeout below reports it.
                    futures::future::pending::<()>().await;
                }
            }
        };

        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| DriverError::Connection(ConnectionError::NotConnected))
    }
}

struct ClusterWorker {
    state: Arc<ArcSwap<ClusterState>>,
    pool_config: ConnectionConfig,
    pool_size: usize,
    prepared_cache: Arc<PreparedCache>,
    signal_receiver: mpsc::Receiver<ControlSignal>,
    up_pools_sender: watch::Sender<usize>,
}

impl ClusterWorker {
    async fn work(mut self) {
        loop {
            let signal = match self.signal_receiver.recv().await {
                Some(signal) => signal,
                None => return, // All control connections are gone.
            };

            match signal {
                ControlSignal::Activated(address) => self.node_up(address).await,
                ControlSignal::Broken(address) => {
                    // An unreachable control connection does not prove
                    // the node is down for data traffic, but without it
                    // we would not learn about recovery either; treat
                    // the node as down until it comes back.
                    self.node_down(address);
                }
                ControlSignal::Event(event) => self.handle_event(event).await,
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::StatusChange(StatusChangeEvent::Up(address)) => {
                if let Some(address) = self.resolve_node_address(address) {
                    self.node_up(address).await;
                }
            }
            Event::StatusChange(StatusChangeEvent::Down(address)) => {
                if let Some(address) = self.resolve_node_address(address) {
                    self.node_down(address);
                }
            }
            Event::TopologyChange(change) => {
                // Observed but the configured node set stays as it is.
                debug!(change = ?change, "Topology change event");
            }
            Event::SchemaChange(change) => {
                debug!(
                    keyspace = change.keyspace(),
                    table = change.table().unwrap_or(""),
                    "Schema change event, invalidating matching prepared statements"
                );
                self.prepared_cache
                    .invalidate_keyspace(change.keyspace(), change.table());
            }
        }
    }

    // Events report the address the server listens on, which may use a
    // different port than the one configured (or the default). Match on
    // the full address first, then fall back to the IP alone.
    fn resolve_node_address(&self, event_address: SocketAddr) -> Option<SocketAddr> {
        let state = self.state.load();
        state
            .nodes
            .iter()
            .find(|node| node.address == event_address)
            .or_else(|| {
                state
                    .nodes
                    .iter()
                    .find(|node| node.address.ip() == event_address.ip())
            })
            .map(|node| node.address)
    }

    async fn node_up(&mut self, address: SocketAddr) {
        let state = self.state.load_full();
        let Some(node) = state.nodes.iter().find(|n| n.address == address) else {
            debug!(address = %address, "UP event for an unknown node, ignoring");
            return;
        };

        if node.is_up() {
            if let Some(pool) = state.pools.get(&address) {
                if pool.is_connected() {
                    return; // Pool is already running.
                }
            }
        }

        match NodePool::open(address, self.pool_size, &self.pool_config).await {
            Ok(pool) => {
                node.set_status(NodeStatus::Up);
                self.update_pools(|pools| {
                    pools.insert(address, Arc::new(pool));
                });
                debug!(address = %address, "Node is up");
            }
            Err(err) => {
                warn!(
                    address = %address,
                    error = %err,
                    "Failed to start the data pool for a node reported up"
                );
                node.set_status(NodeStatus::Down);
                self.update_pools(|pools| {
                    pools.remove(&address);
                });
            }
        }
    }

    fn node_down(&mut self, address: SocketAddr) {
        let state = self.state.load();
        let Some(node) = state.nodes.iter().find(|n| n.address == address) else {
            return;
        };

        node.set_status(NodeStatus::Down);
        self.update_pools(|pools| {
            pools.remove(&address);
        });
        debug!(address = %address, "Node is down");
    }

    fn update_pools(&self, mutate: impl FnOnce(&mut HashMap<SocketAddr, Arc<NodePool>>)) {
        let current = self.state.load_full();
        let mut new_state = ClusterState {
            nodes: current.nodes.clone(),
            pools: current.pools.clone(),
        };
        mutate(&mut new_state.pools);

        let up_count = new_state.up_pool_count();
        self.state.store(Arc::new(new_state));
        let _ = self.up_pools_sender.send(up_count);
    }
}
