use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt, Shared};

use crate::statement::batch::Batch;
use crate::statement::prepared_statement::PreparedStatement;
use crate::statement::query::Query;
use crate::transport::cluster::Cluster;
use crate::transport::connector::Connector;
use crate::transport::dispatcher::{Dispatcher, QueryResult};
use crate::transport::errors::{ClientError, NoHostsAvailable, QueryError};
use crate::transport::keyspace_switcher::{new_session_keyspace, SessionKeyspace};
use crate::transport::load_balancing::{LoadBalancingPolicy, RequestOptions, RoundRobinPolicy};
use crate::transport::metrics::{Metrics, MetricsView};
use crate::transport::reconnection_policy::{ExponentialReconnectionPolicy, ReconnectionPolicy};
use crate::transport::registry::{Registry, TopologyListener};
use crate::transport::retry_policy::{DefaultRetryPolicy, RetryPolicy};

/// Configuration for [`Session::new`]. `known_nodes`-style bootstrapping
/// isn't meaningful here — host discovery lives in the [`Registry`], which
/// is supplied directly — so this only carries the policies and timeouts
/// the Dispatcher and Connect Loop need.
pub struct SessionConfig {
    pub load_balancing: Arc<dyn LoadBalancingPolicy>,
    pub reconnection_policy: Arc<dyn ReconnectionPolicy>,
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub request_timeout: Duration,
    pub used_keyspace: Option<String>,
}

impl SessionConfig {
    pub fn new() -> Self {
        SessionConfig {
            load_balancing: Arc::new(RoundRobinPolicy::new()),
            reconnection_policy: Arc::new(ExponentialReconnectionPolicy::default()),
            retry_policy: Arc::new(DefaultRetryPolicy),
            request_timeout: Duration::from_secs(10),
            used_keyspace: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome `connect()` shares across concurrent callers while a connect
/// attempt is in flight.
type ConnectFuture = Shared<BoxFuture<'static, Result<(), Arc<NoHostsAvailable>>>>;

#[derive(Clone)]
enum ClientState {
    Idle,
    Connecting(ConnectFuture),
    Connected,
    Closing(Shared<BoxFuture<'static, ()>>),
    Closed,
    Defunct,
}

/// Wraps the `Cluster` as the `TopologyListener` the `Registry` holds an
/// `Arc` to, kept as its own type so `remove_listener` can compare by `Arc`
/// identity without `Session` itself needing to be `Arc`-wrapped.
struct ListenerHandle(Arc<Cluster>);

#[async_trait::async_trait]
impl TopologyListener for ListenerHandle {
    async fn host_found(&self, host: crate::transport::host::Host) {
        self.0.host_found(host).await;
    }
    async fn host_lost(&self, host: crate::transport::host::Host) {
        self.0.host_lost(host).await;
    }
    async fn host_up(&self, host: crate::transport::host::Host) {
        self.0.host_up(host).await;
    }
    async fn host_down(&self, host: crate::transport::host::Host) {
        self.0.host_down(host).await;
    }
}

/// The aggregate client state machine: owns the [`Cluster`]
/// and [`Dispatcher`], and supervises bringing hosts up and tearing the
/// whole client down exactly once.
pub struct Session {
    cluster: Arc<Cluster>,
    dispatcher: Dispatcher,
    registry: Arc<dyn Registry>,
    listener: Arc<ListenerHandle>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    default_options: RequestOptions,
    state: Mutex<ClientState>,
}

impl Session {
    /// Builds a `Session` wired to `registry`/`connector` but still `idle`
    /// — no connection attempt happens until [`Session::connect`] is called.
    pub fn new(registry: Arc<dyn Registry>, connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let cluster = Arc::new(Cluster::new(connector, config.reconnection_policy.clone()));
        let session_keyspace: SessionKeyspace = new_session_keyspace(config.used_keyspace.clone());
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(
            cluster.clone(),
            config.load_balancing.clone(),
            config.retry_policy.clone(),
            session_keyspace,
            metrics,
            config.request_timeout,
        );
        Session {
            cluster: cluster.clone(),
            dispatcher,
            registry,
            listener: Arc::new(ListenerHandle(cluster)),
            load_balancing: config.load_balancing,
            default_options: RequestOptions {
                keyspace: config.used_keyspace,
                timeout: Some(config.request_timeout),
                result_metadata: None,
            },
            state: Mutex::new(ClientState::Idle),
        }
    }

    /// Brings every host the `Registry` currently knows about online.
    /// Concurrent callers during `connecting` share the same outcome;
    /// callers after `connected` get an immediate success.
    pub async fn connect(&self) -> Result<(), QueryError> {
        let fut = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                ClientState::Connected => return Ok(()),
                ClientState::Connecting(fut) => fut.clone(),
                ClientState::Closing(_) | ClientState::Closed => {
                    return Err(QueryError::from(ClientError::ClientClosed))
                }
                ClientState::Idle | ClientState::Defunct => {
                    let fut = Self::spawn_connect(
                        self.registry.clone(),
                        self.cluster.clone(),
                        self.listener.clone(),
                        self.load_balancing.clone(),
                    )
                    .boxed()
                    .shared();
                    *state = ClientState::Connecting(fut.clone());
                    fut
                }
            }
        };

        match fut.await {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                if matches!(*state, ClientState::Connecting(_)) {
                    *state = ClientState::Connected;
                }
                Ok(())
            }
            Err(errors) => {
                {
                    let mut state = self.state.lock().unwrap();
                    if matches!(*state, ClientState::Connecting(_)) {
                        *state = ClientState::Defunct;
                    }
                }
                let _ = self.close().await;
                Err(QueryError::from((*errors).clone()))
            }
        }
    }

    /// One connect attempt: register as a topology listener, launch a
    /// Connect Loop per known host, join all of them, and fail with the
    /// per-host error map if none came up. Takes owned `Arc`s rather than
    /// `&self` so the resulting future is `'static` and can be shared
    /// across concurrent `connect()` callers.
    async fn spawn_connect(
        registry: Arc<dyn Registry>,
        cluster: Arc<Cluster>,
        listener: Arc<ListenerHandle>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
    ) -> Result<(), Arc<NoHostsAvailable>> {
        registry
            .add_listener(listener.clone() as Arc<dyn TopologyListener>)
            .await;

        let hosts = registry.hosts();
        let attempts = hosts.into_iter().map(|host| {
            let cluster = cluster.clone();
            let distance = load_balancing.distance(&host);
            async move {
                let result = cluster.connect_to_host(host.clone(), distance).await;
                (host, result)
            }
        });
        let results = join_all(attempts).await;

        if cluster.live_hosts().is_empty() {
            let errors = results
                .into_iter()
                .filter_map(|(host, result)| result.err().map(|e| (host, Arc::new(QueryError::from(e)))))
                .collect();
            return Err(Arc::new(NoHostsAvailable { errors }));
        }

        Ok(())
    }

    /// Tears the client down. Always deregisters from the
    /// registry and ends in `closed`, even if nothing was ever connected.
    pub async fn close(&self) -> Result<(), QueryError> {
        let fut = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                ClientState::Idle => return Err(QueryError::from(ClientError::ClientNotConnected)),
                ClientState::Closing(fut) => fut.clone(),
                ClientState::Closed => return Ok(()),
                ClientState::Connecting(connecting) => {
                    let connecting = connecting.clone();
                    let cluster = self.cluster.clone();
                    let fut = async move {
                        let _ = connecting.await;
                        Self::close_all_hosts(&cluster).await;
                    }
                    .boxed()
                    .shared();
                    *state = ClientState::Closing(fut.clone());
                    fut
                }
                ClientState::Connected | ClientState::Defunct => {
                    let cluster = self.cluster.clone();
                    let fut = async move { Self::close_all_hosts(&cluster).await }.boxed().shared();
                    *state = ClientState::Closing(fut.clone());
                    fut
                }
            }
        };

        fut.await;
        self.registry
            .remove_listener(&(self.listener.clone() as Arc<dyn TopologyListener>))
            .await;
        *self.state.lock().unwrap() = ClientState::Closed;
        Ok(())
    }

    async fn close_all_hosts(cluster: &Cluster) {
        for host in cluster.live_hosts() {
            cluster.host_down(host).await;
        }
    }

    fn require_connected(&self) -> Result<(), QueryError> {
        match &*self.state.lock().unwrap() {
            ClientState::Connected => Ok(()),
            ClientState::Closing(_) | ClientState::Closed | ClientState::Defunct => {
                Err(QueryError::from(ClientError::ClientClosed))
            }
            ClientState::Idle | ClientState::Connecting(_) => {
                Err(QueryError::from(ClientError::ClientNotConnected))
            }
        }
    }

    pub async fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        self.require_connected()?;
        self.dispatcher.query(query, &self.default_options).await
    }

    pub async fn execute(&self, prepared: &PreparedStatement) -> Result<QueryResult, QueryError> {
        self.require_connected()?;
        self.dispatcher.execute(prepared, &self.default_options).await
    }

    pub async fn batch(&self, batch: &Batch) -> Result<QueryResult, QueryError> {
        self.require_connected()?;
        self.dispatcher.batch(batch, &self.default_options).await
    }

    pub async fn prepare(&self, cql: &str) -> Result<PreparedStatement, QueryError> {
        self.require_connected()?;
        self.dispatcher.prepare(cql, &self.default_options).await
    }

    pub fn get_metrics(&self) -> MetricsView {
        self.dispatcher.metrics_view()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::transport::connection::{Connection, RawConnection};
    use crate::transport::errors::ConnectionError;
    use crate::transport::host::{test_host, Distance, Host};

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

    struct AlwaysOkConnector;

    #[async_trait]
    impl Connector for AlwaysOkConnector {
        async fn connect(&self, _host: &Host, _distance: Distance) -> Result<Vec<Arc<Connection>>, ConnectionError> {
            Ok(vec![Arc::new(Connection::new(Arc::new(NoopRaw)))])
        }
    }

    struct AlwaysFailConnector;

    #[async_trait]
    impl Connector for AlwaysFailConnector {
        async fn connect(&self, _host: &Host, _distance: Distance) -> Result<Vec<Arc<Connection>>, ConnectionError> {
            Err(ConnectionError::Closed)
        }
    }

    struct FixedRegistry {
        hosts: Vec<Host>,
        listeners: Mutex<Vec<Arc<dyn TopologyListener>>>,
        add_calls: AtomicUsize,
        remove_calls: AtomicUsize,
    }

    #[async_trait]
    impl Registry for FixedRegistry {
        fn hosts(&self) -> Vec<Host> {
            self.hosts.clone()
        }
        async fn add_listener(&self, listener: Arc<dyn TopologyListener>) {
            self.add_calls.fetch_add(1, Ordering::SeqCst);
            self.listeners.lock().unwrap().push(listener);
        }
        async fn remove_listener(&self, _listener: &Arc<dyn TopologyListener>) {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry_with(hosts: Vec<Host>) -> Arc<FixedRegistry> {
        Arc::new(FixedRegistry {
            hosts,
            listeners: Mutex::new(Vec::new()),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn connect_succeeds_when_a_host_comes_up() {
        let registry = registry_with(vec![test_host(1), test_host(2)]);
        let session = Session::new(registry.clone(), Arc::new(AlwaysOkConnector), SessionConfig::new());

        session.connect().await.unwrap();

        assert_eq!(registry.add_calls.load(Ordering::SeqCst), 1);
        assert!(session.query(&Query::new("select 1")).await.is_ok());
    }

    #[tokio::test]
    async fn connect_fails_when_every_host_is_unreachable() {
        let registry = registry_with(vec![test_host(3)]);
        let session = Session::new(registry, Arc::new(AlwaysFailConnector), SessionConfig::new());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, QueryError::NoHostsAvailable(_)));
    }

    #[tokio::test]
    async fn second_connect_call_is_a_cheap_success() {
        let registry = registry_with(vec![test_host(4)]);
        let session = Session::new(registry, Arc::new(AlwaysOkConnector), SessionConfig::new());

        session.connect().await.unwrap();
        session.connect().await.unwrap();
    }

    #[tokio::test]
    async fn query_before_connect_fails_with_not_connected() {
        let registry = registry_with(vec![test_host(5)]);
        let session = Session::new(registry, Arc::new(AlwaysOkConnector), SessionConfig::new());

        let err = session.query(&Query::new("select 1")).await.unwrap_err();
        assert!(matches!(err, QueryError::Client(ClientError::ClientNotConnected)));
    }

    #[tokio::test]
    async fn close_then_query_fails_with_client_closed() {
        let registry = registry_with(vec![test_host(6)]);
        let session = Session::new(registry.clone(), Arc::new(AlwaysOkConnector), SessionConfig::new());

        session.connect().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(registry.remove_calls.load(Ordering::SeqCst), 1);
        let err = session.query(&Query::new("select 1")).await.unwrap_err();
        assert!(matches!(err, QueryError::Client(ClientError::ClientClosed)));
    }

    #[tokio::test]
    async fn close_without_ever_connecting_fails_with_not_connected() {
        let registry = registry_with(vec![test_host(7)]);
        let session = Session::new(registry, Arc::new(AlwaysOkConnector), SessionConfig::new());

        let err = session.close().await.unwrap_err();
        assert!(matches!(err, QueryError::Client(ClientError::ClientNotConnected)));
    }
}
