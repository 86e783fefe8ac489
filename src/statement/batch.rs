use std::sync::Arc;

use crate::statement::{prepared_statement::PreparedStatement, query::Query};
use crate::transport::retry_policy::RetryPolicy;

pub use super::Consistency;

/// How a batch is logged on the coordinator. See the native protocol spec
/// for the semantics of each variant; this crate only threads the value
/// through to the request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Logged,
    Unlogged,
    Counter,
}

/// A CQL batch statement: a mix of simple and prepared statements sent as
/// one request.
#[derive(Clone)]
pub struct Batch {
    statements: Vec<BatchStatement>,
    batch_type: BatchType,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl Batch {
    /// Creates a new, empty `Batch` of `batch_type` type.
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            statements: Vec::new(),
            batch_type,
            consistency: Default::default(),
            is_idempotent: false,
            retry_policy: None,
        }
    }

    /// Appends a new statement to the batch.
    pub fn append_statement(&mut self, statement: impl Into<BatchStatement>) {
        self.statements.push(statement.into());
    }

    pub fn get_type(&self) -> BatchType {
        self.batch_type
    }

    /// Returns statements contained in the batch, in the order they were
    /// appended. The Dispatcher splices resolved prepared ids back into
    /// this order before sending.
    pub fn get_statements(&self) -> &[BatchStatement] {
        self.statements.as_ref()
    }

    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = c;
    }

    pub fn get_consistency(&self) -> Consistency {
        self.consistency
    }
}

impl Default for Batch {
    fn default() -> Self {
        Batch::new(BatchType::Logged)
    }
}

/// A single entry in a batch: either a simple string statement or a
/// previously prepared one.
#[derive(Clone)]
pub enum BatchStatement {
    Query(Query),
    PreparedStatement(PreparedStatement),
}

impl BatchStatement {
    /// The cql text this entry resolves a prepared id against, if it is a
    /// prepared entry.
    pub(crate) fn cql_text(&self) -> Option<&str> {
        match self {
            BatchStatement::Query(_) => None,
            BatchStatement::PreparedStatement(p) => Some(p.get_statement()),
        }
    }
}

impl From<&str> for BatchStatement {
    fn from(s: &str) -> Self {
        BatchStatement::Query(Query::from(s))
    }
}

impl From<Query> for BatchStatement {
    fn from(q: Query) -> Self {
        BatchStatement::Query(q)
    }
}

impl From<PreparedStatement> for BatchStatement {
    fn from(p: PreparedStatement) -> Self {
        BatchStatement::PreparedStatement(p)
    }
}
