use crate::statement::Consistency;
use crate::transport::host::Host;

/// Everything the Dispatcher observed while resolving one request,
/// attached to every successful and every final-error resolution alike.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInfo {
    /// Keyspace the statement was actually aligned to before sending, if
    /// any `USE` was required.
    pub keyspace: Option<String>,
    /// Every host the plan actually sent a request to, in order. A host the
    /// plan offered but skipped for having no live connection is not
    /// recorded here.
    pub hosts_tried: Vec<Host>,
    /// The consistency level the request was finally sent at, after any
    /// retry-policy downgrades.
    pub final_consistency: Option<Consistency>,
    /// Number of `DetailedErrorResponse`-driven retries performed.
    pub retry_count: u32,
    /// Query trace id, if tracing was requested and the server returned
    /// one. Trace record retrieval is out of scope for this crate.
    pub trace_id: Option<[u8; 16]>,
}

impl ExecutionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_host(&mut self, host: Host) {
        self.hosts_tried.push(host);
    }
}
