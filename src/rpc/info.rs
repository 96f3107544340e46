use std::net::SocketAddr;

use crate::common::{lock_database, Kuid};

use super::{DispatcherStats, Rpc};

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Kuid,
    local_addr: Option<SocketAddr>,
    routing_table_size: usize,
    bootstrapped: bool,
    stats: DispatcherStats,
    pending_requests: usize,
    active_operations: usize,
    database_size: usize,
}

impl Info {
    /// This node's [Kuid]
    pub fn id(&self) -> &Kuid {
        &self.id
    }
    /// Address of the bound transport, `None` if unbound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }
    /// Returns `true` once a bootstrap completed.
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }
    /// Message counters of the dispatcher.
    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }
    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending_requests
    }
    pub fn active_operations(&self) -> usize {
        self.active_operations
    }
    /// Number of values held by this node.
    pub fn database_size(&self) -> usize {
        self.database_size
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: *rpc.local_node().id(),
            local_addr: rpc.local_addr(),
            routing_table_size: rpc.route_table().size(),
            bootstrapped: rpc.is_bootstrapped(),
            stats: rpc.stats(),
            pending_requests: rpc.pending_requests(),
            active_operations: rpc.active_operations(),
            database_size: lock_database(rpc.database_ref()).len(),
        }
    }
}
