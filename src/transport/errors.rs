use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::transport::host::Host;

/// Lifecycle misuse: the client isn't in a state compatible with the
/// requested operation. Always non-retryable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("client is closed")]
    ClientClosed,
    #[error("client is not connected")]
    ClientNotConnected,
}

/// Raised by the connection layer: a transport fault, not a server-side
/// semantic error. Depending on where it's observed this either drives
/// reconnection-policy-backed backoff (Connect Loop) or advances the
/// dispatch plan to the next host (Dispatcher).
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("connection closed")]
    Closed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(Arc::new(e))
    }
}

/// Internal: raised when a host's Connection Manager is empty at dispatch
/// time. Never reaches user code — the dispatcher treats it as a
/// concurrent-removal host-miss and retries the same plan step.
#[derive(Error, Debug, Clone, Copy)]
#[error("host has no live connections")]
pub struct NoConnection;

/// Type of write operation a `WRITE_TIMEOUT`/`WRITE_FAILURE` was reported
/// for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
    Other(String),
}

impl From<&str> for WriteType {
    fn from(s: &str) -> WriteType {
        match s {
            "SIMPLE" => WriteType::Simple,
            "BATCH" => WriteType::Batch,
            "UNLOGGED_BATCH" => WriteType::UnloggedBatch,
            "COUNTER" => WriteType::Counter,
            "BATCH_LOG" => WriteType::BatchLog,
            "CAS" => WriteType::Cas,
            "VIEW" => WriteType::View,
            "CDC" => WriteType::Cdc,
            other => WriteType::Other(other.to_string()),
        }
    }
}

/// Structured fields preserved from a `DetailedErrorResponse` for a caller
/// that ends up seeing the error surface (the retry policy chose
/// `Reraise`, or the code wasn't one of the three the retry policy is
/// consulted for).
#[derive(Debug, Clone)]
pub enum DetailedErrorInfo {
    Unavailable {
        required: i32,
        alive: i32,
    },
    WriteTimeout {
        write_type: WriteType,
        blockfor: i32,
        received: i32,
    },
    ReadTimeout {
        blockfor: i32,
        received: i32,
        data_present: bool,
    },
}

/// A server-side error: one the retry policy chose not to convert into a
/// retry, or an undetailed error the policy was never consulted about.
#[derive(Error, Debug, Clone)]
#[error("database returned an error ({code}): {message}")]
pub struct DatabaseError {
    pub code: i32,
    pub message: String,
    pub cql: Option<String>,
    pub detail: Option<DetailedErrorInfo>,
}

/// The plan was exhausted: every host the load-balancing policy offered
/// either had no live connection or failed with a transport error.
#[derive(Debug, Clone)]
pub struct NoHostsAvailable {
    pub errors: HashMap<Host, Arc<QueryError>>,
}

impl fmt::Display for NoHostsAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no hosts available, tried {} host(s)",
            self.errors.len()
        )
    }
}

impl std::error::Error for NoHostsAvailable {}

/// Top-level error returned from `query`/`prepare`/`execute`/`batch`.
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error(transparent)]
    NoHostsAvailable(#[from] NoHostsAvailable),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Unexpected or invalid message received; indicates a driver bug
    /// rather than anything the caller can act on.
    #[error("protocol error: {0}")]
    ProtocolError(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_type_from_str() {
        let cases = [
            ("SIMPLE", WriteType::Simple),
            ("BATCH", WriteType::Batch),
            ("UNLOGGED_BATCH", WriteType::UnloggedBatch),
            ("COUNTER", WriteType::Counter),
            ("BATCH_LOG", WriteType::BatchLog),
            ("CAS", WriteType::Cas),
            ("VIEW", WriteType::View),
            ("CDC", WriteType::Cdc),
            ("SOMEOTHER", WriteType::Other("SOMEOTHER".to_string())),
        ];
        for (s, expected) in cases {
            assert_eq!(WriteType::from(s), expected);
        }
    }
}
