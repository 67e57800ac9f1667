use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cluster::node::Node;
use crate::network::NodePool;

/// An immutable snapshot of the cluster: the configured nodes in their
/// original order and the pools of the nodes that are currently up.
/// Only the cluster worker produces new snapshots; readers grab one via
/// `ArcSwap::load` and never lock.
#[derive(Default, Clone)]
pub(crate) struct ClusterState {
    pub(crate) nodes: Vec<Arc<Node>>,
    pub(crate) pools: HashMap<SocketAddr, Arc<NodePool>>,
}

impl ClusterState {
    /// Pools of up nodes, in the configured node order.
    pub(crate) fn up_pools(&self) -> impl Iterator<Item = &Arc<NodePool>> {
        self.nodes
            .iter()
            .filter(|node| node.is_up())
            .filter_map(|node| self.pools.get(&node.address))
            .filter(|pool| pool.is_connected())
    }

    pub(crate) fn up_pool_count(&self) -> usize {
        self.up_pools().count()
    }
}
