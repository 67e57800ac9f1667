mod control_connection;
mod node;
mod state;
mod worker;

pub(crate) use state::ClusterState;
pub(crate) use worker::Cluster;
