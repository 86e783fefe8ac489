use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::connection::Connection;
use crate::transport::connection_manager::ConnectionManager;
use crate::transport::connector::Connector;
use crate::transport::errors::ConnectionError;
use crate::transport::host::{Distance, Host};
use crate::transport::prepared_registry::PreparedRegistry;
use crate::transport::reconnection_policy::ReconnectionPolicy;
use crate::transport::registry::TopologyListener;

/// The per-host tables, guarded by one monitor.
/// `prepared[host]`/`preparing[host]` live bundled inside one
/// `PreparedRegistry` per host rather than as two parallel maps — the
/// invariant that both exist iff `connections[host]` does is upheld by
/// always inserting/removing the pair together.
#[derive(Default)]
struct ClusterState {
    connections: HashMap<Host, Arc<ConnectionManager>>,
    prepared: HashMap<Host, Arc<PreparedRegistry>>,
    connecting_hosts: HashSet<Host>,
}

/// Brings hosts online and tears them down in reaction to topology events.
/// Holds the monitor the rest of the crate reads through
/// `connection_manager`/`prepared_registry`/`live_hosts`.
pub struct Cluster {
    connector: Arc<dyn Connector>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    state: Mutex<ClusterState>,
}

impl Cluster {
    pub fn new(connector: Arc<dyn Connector>, reconnection_policy: Arc<dyn ReconnectionPolicy>) -> Self {
        Cluster {
            connector,
            reconnection_policy,
            state: Mutex::new(ClusterState::default()),
        }
    }

    pub fn connection_manager(&self, host: &Host) -> Option<Arc<ConnectionManager>> {
        self.state.lock().unwrap().connections.get(host).cloned()
    }

    pub fn prepared_registry(&self, host: &Host) -> Option<Arc<PreparedRegistry>> {
        self.state.lock().unwrap().prepared.get(host).cloned()
    }

    /// Every host with an installed Connection Manager — the universe a
    /// load-balancing policy plans over.
    pub fn live_hosts(&self) -> Vec<Host> {
        self.state.lock().unwrap().connections.keys().cloned().collect()
    }

    fn install_connections(&self, host: &Host, new_connections: Vec<Arc<Connection>>) {
        let manager = {
            let mut state = self.state.lock().unwrap();
            state.connecting_hosts.remove(host);
            let manager = state
                .connections
                .entry(host.clone())
                .or_insert_with(|| Arc::new(ConnectionManager::new()))
                .clone();
            state
                .prepared
                .entry(host.clone())
                .or_insert_with(|| Arc::new(PreparedRegistry::new()));
            manager
        };
        manager.add(new_connections);
    }

    /// Brings `host` online: asks the Connector for connections, retrying
    /// with the reconnection policy's backoff schedule on connection-level
    /// failure until it succeeds, the host is withdrawn from
    /// `connecting_hosts`, or the schedule is exhausted.
    ///
    /// Returns the last connect error if the host never came up, so
    /// `Session::connect` can build a per-host error map.
    pub async fn connect_to_host(&self, host: Host, distance: Distance) -> Result<(), ConnectionError> {
        if distance == Distance::Ignore {
            return Err(ConnectionError::Closed);
        }

        let mut schedule = self.reconnection_policy.schedule();
        loop {
            match self.connector.connect(&host, distance).await {
                Ok(connections) => {
                    self.install_connections(&host, connections);
                    tracing::info!(%host, "host connected");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(%host, error = %err, "connect attempt failed");
                    let still_wanted = self.state.lock().unwrap().connecting_hosts.contains(&host);
                    if !still_wanted {
                        return Err(err);
                    }
                    match schedule.next() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            self.state.lock().unwrap().connecting_hosts.remove(&host);
                            tracing::warn!(%host, "reconnection schedule exhausted, giving up");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn test_install(&self, host: Host, connections: Vec<Arc<Connection>>) {
        self.install_connections(&host, connections);
    }
}

#[async_trait]
impl TopologyListener for Cluster {
    async fn host_found(&self, _host: Host) {}

    async fn host_lost(&self, _host: Host) {}

    async fn host_up(&self, host: Host) {
        let already_connecting = {
            let mut state = self.state.lock().unwrap();
            if state.connecting_hosts.contains(&host) {
                true
            } else {
                state.connecting_hosts.insert(host.clone());
                false
            }
        };
        if already_connecting {
            return;
        }
        // `host_up` fires before any load-balancing distance is known for
        // certain (the registry may report a brand-new host); default to
        // `Local` so the connect attempt isn't skipped outright.
        let _ = self.connect_to_host(host, Distance::Local).await;
    }

    async fn host_down(&self, host: Host) {
        let manager = {
            let mut state = self.state.lock().unwrap();
            if state.connecting_hosts.remove(&host) {
                None
            } else {
                state.prepared.remove(&host);
                state.connections.remove(&host)
            }
        };
        if let Some(manager) = manager {
            manager.close_all().await;
            tracing::info!(%host, "host torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::transport::connection::RawConnection;
    use crate::transport::host::test_host;
    use crate::transport::reconnection_policy::ExponentialReconnectionPolicy;

    struct NoopRaw;

    #[async_trait]
    impl RawConnection for NoopRaw {
        async fn send_request(
            &self,
            _frame: crate::frame::request::RequestFrame,
            _timeout: Duration,
        ) -> Result<crate::frame::response::ResponseFrame, ConnectionError> {
            Ok(crate::frame::response::ResponseFrame::Void)
        }

        async fn close(&self) {}
    }

    struct OneShotConnector {
        attempts: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl Connector for OneShotConnector {
        async fn connect(
            &self,
            _host: &Host,
            _distance: Distance,
        ) -> Result<Vec<Arc<Connection>>, ConnectionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                Err(ConnectionError::Closed)
            } else {
                Ok(vec![Arc::new(Connection::new(Arc::new(NoopRaw)))])
            }
        }
    }

    #[tokio::test]
    async fn connect_to_host_installs_manager_and_registry() {
        let cluster = Cluster::new(
            Arc::new(OneShotConnector {
                attempts: AtomicUsize::new(0),
                fail_first: 0,
            }),
            Arc::new(ExponentialReconnectionPolicy::default()),
        );
        let host = test_host(1);
        cluster.state.lock().unwrap().connecting_hosts.insert(host.clone());

        cluster.connect_to_host(host.clone(), Distance::Local).await;

        assert!(cluster.connection_manager(&host).is_some());
        assert!(cluster.prepared_registry(&host).is_some());
        assert!(!cluster.state.lock().unwrap().connecting_hosts.contains(&host));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_host_retries_until_success() {
        let cluster = Cluster::new(
            Arc::new(OneShotConnector {
                attempts: AtomicUsize::new(0),
                fail_first: 2,
            }),
            Arc::new(ExponentialReconnectionPolicy::new(
                Duration::from_millis(10),
                Duration::from_secs(1),
            )),
        );
        let host = test_host(2);
        cluster.state.lock().unwrap().connecting_hosts.insert(host.clone());

        cluster.connect_to_host(host.clone(), Distance::Local).await;

        assert!(cluster.connection_manager(&host).is_some());
    }

    #[tokio::test]
    async fn host_down_while_connecting_just_drops_the_marker() {
        let cluster = Cluster::new(
            Arc::new(OneShotConnector {
                attempts: AtomicUsize::new(0),
                fail_first: 0,
            }),
            Arc::new(ExponentialReconnectionPolicy::default()),
        );
        let host = test_host(3);
        cluster.state.lock().unwrap().connecting_hosts.insert(host.clone());

        cluster.host_down(host.clone()).await;

        assert!(!cluster.state.lock().unwrap().connecting_hosts.contains(&host));
        assert!(cluster.connection_manager(&host).is_none());
    }

    #[tokio::test]
    async fn host_down_removes_connections_and_closes_them() {
        let cluster = Cluster::new(
            Arc::new(OneShotConnector {
                attempts: AtomicUsize::new(0),
                fail_first: 0,
            }),
            Arc::new(ExponentialReconnectionPolicy::default()),
        );
        let host = test_host(4);
        cluster.test_install(host.clone(), vec![Arc::new(Connection::new(Arc::new(NoopRaw)))]);

        cluster.host_down(host.clone()).await;

        assert!(cluster.connection_manager(&host).is_none());
        assert!(cluster.prepared_registry(&host).is_none());
    }
}
