use std::sync::Arc;

use async_trait::async_trait;

use crate::transport::connection::Connection;
use crate::transport::errors::ConnectionError;
use crate::transport::host::{Distance, Host};

/// External collaborator that establishes the initial set of connections
/// for a host. Topology discovery and address resolution are out of scope
/// here — by the time `connect` is called, `host` already identifies a
/// known cluster member.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &Host,
        distance: Distance,
    ) -> Result<Vec<Arc<Connection>>, ConnectionError>;
}
