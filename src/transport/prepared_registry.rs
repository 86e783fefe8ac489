use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::frame::request::{PrepareRequest, RequestFrame};
use crate::frame::response::ResponseFrame;
use crate::statement::prepared_statement::PreparedId;
use crate::transport::connection::Connection;
use crate::transport::errors::{DatabaseError, QueryError};

type PrepareFuture = Shared<BoxFuture<'static, Result<PreparedId, Arc<QueryError>>>>;

/// Per-host cache of prepared-statement ids, and per-host in-flight
/// prepare futures for de-duplication.
///
/// Invariants upheld: a cql key is never present in both maps at once, and
/// at most one PREPARE frame is ever in flight per `(host, cql)` pair
/// regardless of how many callers race to resolve it.
#[derive(Default)]
pub struct PreparedRegistry {
    prepared: Mutex<HashMap<String, PreparedId>>,
    preparing: Mutex<HashMap<String, PrepareFuture>>,
}

impl PreparedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, cql: &str) -> Option<PreparedId> {
        self.prepared.lock().unwrap().get(cql).cloned()
    }

    /// Records an id directly — used when a `PreparedResultResponse`
    /// arrives on a request the dispatcher sent outside of `prepare()`
    /// de-duplication (a direct `prepare` entry-point call).
    pub fn insert(&self, cql: String, id: PreparedId) {
        self.preparing.lock().unwrap().remove(&cql);
        self.prepared.lock().unwrap().insert(cql, id);
    }

    /// Resolves a prepared id for `cql` on `connection`, joining an
    /// in-flight PREPARE for the same cql if one is already running on
    /// this host.
    pub async fn prepare(
        &self,
        connection: Arc<Connection>,
        cql: String,
        timeout: Duration,
    ) -> Result<PreparedId, Arc<QueryError>> {
        if let Some(id) = self.lookup(&cql) {
            return Ok(id);
        }

        // Get-or-create the in-flight future under one critical section,
        // so two racing callers can never both win the "create" branch.
        let fut = {
            let mut preparing = self.preparing.lock().unwrap();
            if let Some(fut) = preparing.get(&cql) {
                fut.clone()
            } else {
                let contents = cql.clone();
                let new_fut: PrepareFuture = async move {
                    let response = connection
                        .send_request(RequestFrame::Prepare(PrepareRequest { contents }), timeout)
                        .await
                        .map_err(|e| Arc::new(QueryError::from(e)))?;

                    match response {
                        ResponseFrame::Prepared { id } => Ok(PreparedId(id)),
                        ResponseFrame::Error(err) => Err(Arc::new(QueryError::from(DatabaseError {
                            code: err.code(),
                            message: err.message().to_string(),
                            cql: None,
                            detail: None,
                        }))),
                        _ => Err(Arc::new(QueryError::ProtocolError(
                            "unexpected response to PREPARE",
                        ))),
                    }
                }
                .boxed()
                .shared();
                preparing.insert(cql.clone(), new_fut.clone());
                new_fut
            }
        };

        let result = fut.await;
        match &result {
            Ok(id) => {
                self.preparing.lock().unwrap().remove(&cql);
                self.prepared.lock().unwrap().insert(cql, id.clone());
            }
            Err(_) => {
                self.preparing.lock().unwrap().remove(&cql);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::connection::RawConnection;
    use async_trait::async_trait;

    struct CountingPrepare {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RawConnection for CountingPrepare {
        async fn send_request(
            &self,
            frame: RequestFrame,
            _timeout: Duration,
        ) -> Result<ResponseFrame, crate::transport::errors::ConnectionError> {
            match frame {
                RequestFrame::Prepare(_) => {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    // Simulate network latency so concurrent callers race.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(ResponseFrame::Prepared {
                        id: bytes::Bytes::from_static(b"id"),
                    })
                }
                _ => unreachable!(),
            }
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn prepare_storm_sends_exactly_one_frame() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connection = Arc::new(Connection::new(Arc::new(CountingPrepare {
            calls: calls.clone(),
        })));
        let registry = Arc::new(PreparedRegistry::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let registry = registry.clone();
                let connection = connection.clone();
                tokio::spawn(async move {
                    registry
                        .prepare(connection, "select 1".to_string(), Duration::from_secs(1))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(registry.lookup("select 1"), Some(ids[0].clone()));
    }
}
