use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

/// Liveness as far as the driver knows. Nodes start out `Unknown` until
/// their control connection activates them or an event arrives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum NodeStatus {
    Unknown,
    Up,
    Down,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) address: SocketAddr,
    status: AtomicU8,
}

impl Node {
    pub(crate) fn new(address: SocketAddr) -> Self {
        Node {
            address,
            status: AtomicU8::new(NodeStatus::Unknown as u8),
        }
    }

    pub(crate) fn status(&self) -> NodeStatus {
        match self.status.load(Ordering::Relaxed) {
            0 => NodeStatus::Unknown,
            1 => NodeStatus::Up,
            _ => NodeStatus::Down,
        }
    }

    pub(crate) fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    pub(crate) fn is_up(&self) -> bool {
        self.status() == NodeStatus::Up
    }
}
