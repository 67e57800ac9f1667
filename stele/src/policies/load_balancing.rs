//! Node selection policies.

use std::str::FromStr;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::cluster::ClusterState;
use crate::errors::DriverError;
use crate::network::NodePool;

/// How `checkout` chooses among the pools of nodes that are up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingPolicy {
    /// Uniform random choice among the up pools.
    #[default]
    Random,
    /// The first up node in the configured order. With this policy the
    /// node list doubles as a failover preference list.
    Priority,
}

impl LoadBalancingPolicy {
    pub(crate) fn pick(&self, state: &ClusterState) -> Option<Arc<NodePool>> {
        match self {
            LoadBalancingPolicy::Random => {
                let pools: Vec<&Arc<NodePool>> = state.up_pools().collect();
                pools.choose(&mut rand::thread_rng()).map(|p| (*p).clone())
            }
            LoadBalancingPolicy::Priority => state.up_pools().next().cloned(),
        }
    }
}

impl FromStr for LoadBalancingPolicy {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(LoadBalancingPolicy::Random),
            "priority" => Ok(LoadBalancingPolicy::Priority),
            other => Err(DriverError::InvalidArguments(format!(
                "Unknown load balancing policy: {}",
                other
            ))),
        }
    }
}
