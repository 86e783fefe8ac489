use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;

use crate::transport::connection::Connection;
use crate::transport::errors::NoConnection;

/// Holds the live connections for one host; yields one at random per
/// request.
///
/// `random()` on an empty manager is a recoverable miss: callers treat it
/// as a host-miss and advance the dispatch plan.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, new_connections: impl IntoIterator<Item = Arc<Connection>>) {
        self.connections.write().unwrap().extend(new_connections);
    }

    /// Cheap copy of the current connection list.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().unwrap().clone()
    }

    pub fn random(&self) -> Result<Arc<Connection>, NoConnection> {
        let conns = self.connections.read().unwrap();
        conns
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(NoConnection)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().unwrap().is_empty()
    }

    /// Closes every connection currently held. Used when tearing a host
    /// down on `host_down`.
    pub async fn close_all(&self) {
        let conns = self.snapshot();
        futures::future::join_all(conns.iter().map(|c| c.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRaw;

    #[async_trait::async_trait]
    impl crate::transport::connection::RawConnection for NoopRaw {
        async fn send_request(
            &self,
            _frame: crate::frame::request::RequestFrame,
            _timeout: std::time::Duration,
        ) -> Result<crate::frame::response::ResponseFrame, crate::transport::errors::ConnectionError>
        {
            Ok(crate::frame::response::ResponseFrame::Void)
        }

        async fn close(&self) {}
    }

    #[test]
    fn random_on_empty_manager_is_no_connection() {
        let manager = ConnectionManager::new();
        assert!(manager.random().is_err());
    }

    #[test]
    fn random_picks_from_added_connections() {
        let manager = ConnectionManager::new();
        let conns: Vec<_> = (0..3)
            .map(|_| Arc::new(Connection::new(Arc::new(NoopRaw))))
            .collect();
        manager.add(conns.iter().cloned());
        assert_eq!(manager.snapshot().len(), 3);
        assert!(manager.random().is_ok());
    }
}
