use std::sync::Arc;

use async_trait::async_trait;

use crate::transport::host::Host;

/// Topology change events the Registry pushes to its listeners.
/// `host_found`/`host_lost` report cluster membership changes; `host_up`/
/// `host_down` report reachability changes for a host that is already
/// known.
#[async_trait]
pub trait TopologyListener: Send + Sync {
    async fn host_found(&self, host: Host);
    async fn host_lost(&self, host: Host);
    async fn host_up(&self, host: Host);
    async fn host_down(&self, host: Host);
}

/// The out-of-scope topology source this crate reacts to rather than
/// implements — discovery, gossip and control-connection bookkeeping live
/// outside this crate. The Connect Loop and Cluster subscribe a
/// [`TopologyListener`] here and otherwise only read `hosts()`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every host currently known to be up.
    fn hosts(&self) -> Vec<Host>;

    async fn add_listener(&self, listener: Arc<dyn TopologyListener>);

    async fn remove_listener(&self, listener: &Arc<dyn TopologyListener>);
}
