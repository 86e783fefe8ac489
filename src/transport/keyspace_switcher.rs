use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::FutureExt;

use crate::frame::request::{QueryRequest, RequestFrame};
use crate::frame::response::ResponseFrame;
use crate::statement::Consistency;
use crate::transport::connection::Connection;
use crate::transport::errors::{DatabaseError, QueryError};

/// The session-wide "last SET_KEYSPACE wins" cell: a small
/// atomic cell read by the dispatcher and written only on
/// `SetKeyspaceResultResponse`.
pub type SessionKeyspace = Arc<RwLock<Option<String>>>;

pub fn new_session_keyspace(initial: Option<String>) -> SessionKeyspace {
    Arc::new(RwLock::new(initial))
}

/// Ensures `connection` is `USE`'d into `keyspace`, coalescing concurrent
/// switchers targeting the same keyspace onto one in-flight `USE`.
pub async fn switch(
    connection: &Arc<Connection>,
    session_keyspace: &SessionKeyspace,
    keyspace: &str,
    timeout: Duration,
) -> Result<(), Arc<QueryError>> {
    if connection.keyspace().as_deref() == Some(keyspace) {
        return Ok(());
    }

    let fut = {
        let conn = connection.clone();
        let target = keyspace.to_string();
        let session_keyspace = session_keyspace.clone();
        connection.get_or_install_pending_switch(keyspace, move || {
            async move {
                let response = conn
                    .send_request(
                        RequestFrame::Query(QueryRequest {
                            contents: format!("USE {target}"),
                            consistency: Consistency::One,
                            retries: 0,
                        }),
                        timeout,
                    )
                    .await
                    .map_err(|e| Arc::new(QueryError::from(e)))?;

                match response {
                    ResponseFrame::SetKeyspace(ks) => {
                        conn.set_keyspace(ks.clone());
                        *session_keyspace.write().unwrap() = Some(ks);
                        Ok(())
                    }
                    ResponseFrame::Error(err) => {
                        Err(Arc::new(QueryError::from(DatabaseError {
                            code: err.code(),
                            message: err.message().to_string(),
                            cql: None,
                            detail: None,
                        })))
                    }
                    _ => Err(Arc::new(QueryError::ProtocolError(
                        "unexpected response to USE",
                    ))),
                }
            }
            .boxed()
            .shared()
        })
    };

    let result = fut.await;
    connection.clear_pending_switch_if(keyspace);
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::connection::RawConnection;
    use async_trait::async_trait;

    struct CountingUse {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RawConnection for CountingUse {
        async fn send_request(
            &self,
            frame: RequestFrame,
            _timeout: Duration,
        ) -> Result<ResponseFrame, crate::transport::errors::ConnectionError> {
            match frame {
                RequestFrame::Query(q) if q.contents.starts_with("USE") => {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(ResponseFrame::SetKeyspace("new_ks".to_string()))
                }
                _ => unreachable!(),
            }
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn coalesces_concurrent_switches_to_same_keyspace() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connection = Arc::new(Connection::new(Arc::new(CountingUse {
            calls: calls.clone(),
        })));
        let session_keyspace = new_session_keyspace(None);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let connection = connection.clone();
                let session_keyspace = session_keyspace.clone();
                tokio::spawn(async move {
                    switch(
                        &connection,
                        &session_keyspace,
                        "new_ks",
                        Duration::from_secs(1),
                    )
                    .await
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(connection.keyspace(), Some("new_ks".to_string()));
        assert_eq!(
            session_keyspace.read().unwrap().clone(),
            Some("new_ks".to_string())
        );
    }

    #[tokio::test]
    async fn already_on_target_keyspace_is_a_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connection = Arc::new(Connection::new(Arc::new(CountingUse {
            calls: calls.clone(),
        })));
        connection.set_keyspace("ks".to_string());
        let session_keyspace = new_session_keyspace(None);

        switch(&connection, &session_keyspace, "ks", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
