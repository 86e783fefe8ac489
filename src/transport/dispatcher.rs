use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::frame::request::{BatchEntry, BatchRequest, ExecuteRequest, QueryRequest, RequestFrame};
use crate::frame::response::{ErrorResponse, ResponseFrame, ResultMetadata, Rows};
use crate::statement::batch::{Batch, BatchStatement};
use crate::statement::prepared_statement::{PreparedId, PreparedStatement};
use crate::statement::query::Query;
use crate::statement::Consistency;
use crate::transport::cluster::Cluster;
use crate::transport::connection::Connection;
use crate::transport::errors::{DatabaseError, DetailedErrorInfo, NoHostsAvailable, QueryError};
use crate::transport::execution_info::ExecutionInfo;
use crate::transport::host::Host;
use crate::transport::keyspace_switcher::{self, SessionKeyspace};
use crate::transport::load_balancing::{LoadBalancingPolicy, RequestOptions};
use crate::transport::metrics::Metrics;
use crate::transport::retry_policy::{RetryDecision, RetryPolicy};

/// A result the dispatcher resolves a request with: rows if the server
/// returned any, plus the `ExecutionInfo` gathered along the way, attached
/// to every resolution (success or retry-policy `Ignore`).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Option<Rows>,
    pub info: ExecutionInfo,
}

/// What one attempt sends, rebuilt fresh (with the current consistency and
/// retry count) on every send inside the same plan step.
enum AttemptBody {
    Query(String),
    Execute(String),
    Batch(Batch),
}

struct Attempt {
    body: AttemptBody,
    keyspace: Option<String>,
    is_idempotent: bool,
    consistency: Consistency,
    retries: u32,
    retry_policy: Arc<dyn RetryPolicy>,
    result_metadata: Option<ResultMetadata>,
    info: ExecutionInfo,
    errors: HashMap<Host, Arc<QueryError>>,
}

/// The request state machine: the four entry points share this
/// inner loop, driven by a load-balancing plan.
pub struct Dispatcher {
    cluster: Arc<Cluster>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    default_retry_policy: Arc<dyn RetryPolicy>,
    session_keyspace: SessionKeyspace,
    metrics: Arc<Metrics>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        cluster: Arc<Cluster>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
        default_retry_policy: Arc<dyn RetryPolicy>,
        session_keyspace: SessionKeyspace,
        metrics: Arc<Metrics>,
        timeout: Duration,
    ) -> Self {
        Dispatcher {
            cluster,
            load_balancing,
            default_retry_policy,
            session_keyspace,
            metrics,
            timeout,
        }
    }

    pub fn metrics_view(&self) -> crate::transport::metrics::MetricsView {
        self.metrics.view()
    }

    fn pick_connection(&self, host: &Host) -> Option<Arc<Connection>> {
        self.cluster
            .connection_manager(host)
            .and_then(|manager| manager.random().ok())
    }

    async fn align_keyspace(
        &self,
        connection: &Arc<Connection>,
        keyspace: Option<&str>,
    ) -> Result<(), Arc<QueryError>> {
        if let Some(ks) = keyspace {
            keyspace_switcher::switch(connection, &self.session_keyspace, ks, self.timeout).await?;
            self.metrics.inc_keyspace_switches();
        }
        Ok(())
    }

    async fn resolve_prepared_id(
        &self,
        host: &Host,
        connection: &Arc<Connection>,
        cql: &str,
    ) -> Result<PreparedId, Arc<QueryError>> {
        let registry = self.cluster.prepared_registry(host).ok_or_else(|| {
            Arc::new(QueryError::ProtocolError("missing prepared registry for host"))
        })?;
        if let Some(id) = registry.lookup(cql) {
            return Ok(id);
        }
        let id = registry.prepare(connection.clone(), cql.to_string(), self.timeout).await?;
        self.metrics.inc_prepares();
        Ok(id)
    }

    async fn resolve_batch_entries(
        &self,
        host: &Host,
        connection: &Arc<Connection>,
        batch: &Batch,
    ) -> Result<Vec<BatchEntry>, Arc<QueryError>> {
        let registry = self.cluster.prepared_registry(host).ok_or_else(|| {
            Arc::new(QueryError::ProtocolError("missing prepared registry for host"))
        })?;

        let mut unprepared: Vec<String> = Vec::new();
        for statement in batch.get_statements() {
            if let Some(cql) = statement.cql_text() {
                if registry.lookup(cql).is_none() && !unprepared.iter().any(|c| c == cql) {
                    unprepared.push(cql.to_string());
                }
            }
        }

        if !unprepared.is_empty() {
            let prepares = unprepared
                .iter()
                .map(|cql| registry.prepare(connection.clone(), cql.clone(), self.timeout));
            for result in futures::future::join_all(prepares).await {
                result?;
            }
            self.metrics.inc_prepares();
        }

        let mut entries = Vec::with_capacity(batch.get_statements().len());
        for statement in batch.get_statements() {
            match statement {
                BatchStatement::Query(q) => {
                    entries.push(BatchEntry::Query(q.get_contents().to_string()))
                }
                BatchStatement::PreparedStatement(p) => {
                    let id = registry.lookup(p.get_statement()).ok_or_else(|| {
                        Arc::new(QueryError::ProtocolError("prepared id missing after resolve"))
                    })?;
                    entries.push(BatchEntry::Prepared(id.0));
                }
            }
        }
        Ok(entries)
    }

    async fn build_frame(
        &self,
        host: &Host,
        connection: &Arc<Connection>,
        body: &AttemptBody,
        consistency: Consistency,
        retries: u32,
    ) -> Result<RequestFrame, Arc<QueryError>> {
        match body {
            AttemptBody::Query(cql) => Ok(RequestFrame::Query(QueryRequest {
                contents: cql.clone(),
                consistency,
                retries,
            })),
            AttemptBody::Execute(cql) => {
                let id = self.resolve_prepared_id(host, connection, cql).await?;
                Ok(RequestFrame::Execute(ExecuteRequest {
                    id: id.0,
                    consistency,
                    retries,
                }))
            }
            AttemptBody::Batch(batch) => {
                let entries = self.resolve_batch_entries(host, connection, batch).await?;
                Ok(RequestFrame::Batch(BatchRequest {
                    entries,
                    batch_type: batch.get_type(),
                    consistency,
                    retries,
                }))
            }
        }
    }

    fn consult_retry_policy(
        &self,
        retry_policy: &dyn RetryPolicy,
        is_idempotent: bool,
        retries: u32,
        err: &ErrorResponse,
    ) -> RetryDecision {
        match err {
            ErrorResponse::Unavailable {
                consistency,
                required,
                alive,
                ..
            } => retry_policy.unavailable(is_idempotent, *consistency, *required, *alive, retries),
            ErrorResponse::WriteTimeout {
                consistency,
                write_type,
                blockfor,
                received,
                ..
            } => retry_policy.write_timeout(
                is_idempotent,
                *consistency,
                write_type,
                *blockfor,
                *received,
                retries,
            ),
            ErrorResponse::ReadTimeout {
                consistency,
                blockfor,
                received,
                data_present,
                ..
            } => retry_policy.read_timeout(
                is_idempotent,
                *consistency,
                *blockfor,
                *received,
                *data_present,
                retries,
            ),
            ErrorResponse::Other { .. } => RetryDecision::Reraise,
        }
    }

    fn database_error(err: ErrorResponse, cql: Option<String>) -> DatabaseError {
        let code = err.code();
        let message = err.message().to_string();
        let detail = match err {
            ErrorResponse::Unavailable { required, alive, .. } => {
                Some(DetailedErrorInfo::Unavailable { required, alive })
            }
            ErrorResponse::WriteTimeout {
                write_type,
                blockfor,
                received,
                ..
            } => Some(DetailedErrorInfo::WriteTimeout {
                write_type,
                blockfor,
                received,
            }),
            ErrorResponse::ReadTimeout {
                blockfor,
                received,
                data_present,
                ..
            } => Some(DetailedErrorInfo::ReadTimeout {
                blockfor,
                received,
                data_present,
            }),
            ErrorResponse::Other { .. } => None,
        };
        DatabaseError {
            code,
            message,
            cql,
            detail,
        }
    }

    /// Runs the shared plan-driven loop for `query`/`execute`/`batch`.
    async fn run(&self, plan_cql: &str, mut attempt: Attempt) -> Result<QueryResult, QueryError> {
        let mut plan = self.load_balancing.plan(
            attempt.keyspace.as_deref(),
            plan_cql,
            &RequestOptions {
                keyspace: attempt.keyspace.clone(),
                timeout: Some(self.timeout),
                result_metadata: None,
            },
            &self.cluster.live_hosts(),
        );

        'plan: loop {
            let host = match plan.next() {
                Some(h) => h,
                None => {
                    self.metrics.inc_queries_errored();
                    return Err(QueryError::from(NoHostsAvailable {
                        errors: attempt.errors,
                    }));
                }
            };

            let connection = match self.pick_connection(&host) {
                Some(c) => c,
                None => continue 'plan,
            };

            if let Err(e) = self.align_keyspace(&connection, attempt.keyspace.as_deref()).await {
                return Err((*e).clone());
            }
            if let Some(ks) = &attempt.keyspace {
                attempt.info.keyspace = Some(ks.clone());
            }

            'same_host: loop {
                self.metrics.inc_queries_total();
                let frame = match self
                    .build_frame(&host, &connection, &attempt.body, attempt.consistency, attempt.retries)
                    .await
                {
                    Ok(f) => f,
                    Err(e) => return Err((*e).clone()),
                };

                attempt.info.record_host(host.clone());
                let started = std::time::Instant::now();
                let response = connection.send_request(frame, self.timeout).await;
                self.metrics.log_query_latency(started.elapsed());

                match response {
                    Err(transport_err) => {
                        self.metrics.inc_queries_errored();
                        attempt.errors.insert(host.clone(), Arc::new(QueryError::from(transport_err)));
                        continue 'plan;
                    }
                    Ok(ResponseFrame::Error(err)) => {
                        let is_detailed = !matches!(&err, ErrorResponse::Other { .. });
                        if !is_detailed {
                            self.metrics.inc_queries_errored();
                            return Err(QueryError::from(Self::database_error(
                                err,
                                Some(plan_cql.to_string()),
                            )));
                        }
                        let decision = self.consult_retry_policy(
                            attempt.retry_policy.as_ref(),
                            attempt.is_idempotent,
                            attempt.retries,
                            &err,
                        );
                        match decision {
                            RetryDecision::Retry(cl) => {
                                attempt.consistency = cl;
                                attempt.retries += 1;
                                attempt.info.retry_count = attempt.retries;
                                self.metrics.inc_retries();
                                continue 'same_host;
                            }
                            RetryDecision::Ignore => {
                                attempt.info.final_consistency = Some(attempt.consistency);
                                return Ok(QueryResult {
                                    info: attempt.info,
                                    ..Default::default()
                                });
                            }
                            RetryDecision::Reraise => {
                                self.metrics.inc_queries_errored();
                                return Err(QueryError::from(Self::database_error(
                                    err,
                                    Some(plan_cql.to_string()),
                                )));
                            }
                        }
                    }
                    Ok(ResponseFrame::SetKeyspace(ks)) => {
                        *self.session_keyspace.write().unwrap() = Some(ks);
                        attempt.info.final_consistency = Some(attempt.consistency);
                        return Ok(QueryResult {
                            info: attempt.info,
                            ..Default::default()
                        });
                    }
                    Ok(ResponseFrame::Prepared { id }) => {
                        if let Some(registry) = self.cluster.prepared_registry(&host) {
                            registry.insert(plan_cql.to_string(), PreparedId(id));
                        }
                        attempt.info.final_consistency = Some(attempt.consistency);
                        return Ok(QueryResult {
                            info: attempt.info,
                            ..Default::default()
                        });
                    }
                    Ok(ResponseFrame::RawRows(raw)) => {
                        attempt.info.final_consistency = Some(attempt.consistency);
                        let metadata = attempt.result_metadata.clone().unwrap_or_default();
                        return Ok(QueryResult {
                            rows: Some(raw.materialize(metadata)),
                            info: attempt.info,
                            ..Default::default()
                        });
                    }
                    Ok(ResponseFrame::Rows(rows)) => {
                        attempt.info.final_consistency = Some(attempt.consistency);
                        return Ok(QueryResult {
                            rows: Some(rows),
                            info: attempt.info,
                            ..Default::default()
                        });
                    }
                    Ok(ResponseFrame::Void) => {
                        attempt.info.final_consistency = Some(attempt.consistency);
                        return Ok(QueryResult {
                            info: attempt.info,
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }

    fn retry_policy_for(&self, override_policy: &Option<Box<dyn RetryPolicy>>) -> Arc<dyn RetryPolicy> {
        match override_policy {
            Some(p) => Arc::from(p.clone_boxed()),
            None => self.default_retry_policy.clone(),
        }
    }

    pub async fn query(&self, query: &Query, options: &RequestOptions) -> Result<QueryResult, QueryError> {
        let keyspace = query.keyspace.clone().or_else(|| options.keyspace.clone());
        let attempt = Attempt {
            body: AttemptBody::Query(query.get_contents().to_string()),
            keyspace,
            is_idempotent: query.is_idempotent,
            consistency: query.get_consistency(),
            retries: 0,
            retry_policy: self.retry_policy_for(&query.retry_policy),
            result_metadata: options.result_metadata.clone(),
            info: ExecutionInfo::new(),
            errors: HashMap::new(),
        };
        self.run(query.get_contents(), attempt).await
    }

    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        options: &RequestOptions,
    ) -> Result<QueryResult, QueryError> {
        let keyspace = prepared.keyspace.clone().or_else(|| options.keyspace.clone());
        let cql = prepared.get_statement().to_string();
        let attempt = Attempt {
            body: AttemptBody::Execute(cql.clone()),
            keyspace,
            is_idempotent: prepared.is_idempotent,
            consistency: prepared.consistency,
            retries: 0,
            retry_policy: self.retry_policy_for(&prepared.retry_policy),
            result_metadata: options.result_metadata.clone(),
            info: ExecutionInfo::new(),
            errors: HashMap::new(),
        };
        self.run(&cql, attempt).await
    }

    pub async fn batch(&self, batch: &Batch, options: &RequestOptions) -> Result<QueryResult, QueryError> {
        let plan_cql = batch
            .get_statements()
            .iter()
            .find_map(|s| match s {
                BatchStatement::Query(q) => Some(q.get_contents().to_string()),
                BatchStatement::PreparedStatement(p) => Some(p.get_statement().to_string()),
            })
            .unwrap_or_default();
        let attempt = Attempt {
            body: AttemptBody::Batch(batch.clone()),
            keyspace: options.keyspace.clone(),
            is_idempotent: batch.is_idempotent,
            consistency: batch.consistency,
            retries: 0,
            retry_policy: self.retry_policy_for(&batch.retry_policy.as_ref().map(|p| p.clone_boxed())),
            result_metadata: options.result_metadata.clone(),
            info: ExecutionInfo::new(),
            errors: HashMap::new(),
        };
        self.run(&plan_cql, attempt).await
    }

    /// Prepares `cql` on the first host the plan offers, joining an
    /// in-flight prepare for the same cql on that host.
    /// Only transport failures advance the plan here — a detailed error
    /// response during prepare is not retried against a different
    /// consistency, since prepare carries none.
    pub async fn prepare(&self, cql: &str, options: &RequestOptions) -> Result<PreparedStatement, QueryError> {
        let mut plan = self
            .load_balancing
            .plan(options.keyspace.as_deref(), cql, options, &self.cluster.live_hosts());
        let mut errors = HashMap::new();

        loop {
            let host = match plan.next() {
                Some(h) => h,
                None => return Err(QueryError::from(NoHostsAvailable { errors })),
            };

            let connection = match self.pick_connection(&host) {
                Some(c) => c,
                None => continue,
            };

            if let Err(e) = self.align_keyspace(&connection, options.keyspace.as_deref()).await {
                return Err((*e).clone());
            }

            let registry = match self.cluster.prepared_registry(&host) {
                Some(r) => r,
                None => return Err(QueryError::ProtocolError("missing prepared registry for host")),
            };

            match registry.prepare(connection, cql.to_string(), self.timeout).await {
                Ok(_) => {
                    self.metrics.inc_prepares();
                    let mut stmt = PreparedStatement::new(cql.to_string());
                    if let Some(ks) = &options.keyspace {
                        stmt.set_keyspace(ks.clone());
                    }
                    return Ok(stmt);
                }
                Err(e) => match &*e {
                    QueryError::Connection(_) => {
                        errors.insert(host, e);
                        continue;
                    }
                    _ => return Err((*e).clone()),
                },
            }
        }
    }
}
