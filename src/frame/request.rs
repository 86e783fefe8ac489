use bytes::Bytes;

use crate::statement::batch::BatchType;
use crate::statement::Consistency;

/// A request the Dispatcher hands to `Connection::send_request`.
///
/// `retries` and `consistency` are rewritten in place by the dispatcher
/// across retries of the same attempt — the frame is a small owned struct
/// rebuilt per attempt, not a shared mutable cell.
#[derive(Debug, Clone)]
pub enum RequestFrame {
    Query(QueryRequest),
    Prepare(PrepareRequest),
    Execute(ExecuteRequest),
    Batch(BatchRequest),
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub contents: String,
    pub consistency: Consistency,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct PrepareRequest {
    pub contents: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub id: Bytes,
    pub consistency: Consistency,
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub entries: Vec<BatchEntry>,
    pub batch_type: BatchType,
    pub consistency: Consistency,
    pub retries: u32,
}

/// One spliced batch entry. A `Query` entry is sent verbatim; a `Prepared`
/// entry carries the id the Prepared-Statement Registry resolved for the
/// host this batch is about to be sent to.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Query(String),
    Prepared(Bytes),
}
