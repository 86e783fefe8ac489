use bytes::Bytes;

use super::Consistency;
use crate::transport::retry_policy::RetryPolicy;

/// A statement prepared on at least one node.
///
/// The prepared id is host-local: the same `PreparedStatement` carries one
/// cql text, but the dispatcher resolves a (possibly different) id for it
/// on whichever host it ends up dispatching to, via the Prepared-Statement
/// Registry.
pub struct PreparedStatement {
    statement: String,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    pub keyspace: Option<String>,
    pub retry_policy: Option<Box<dyn RetryPolicy>>,
}

impl Clone for PreparedStatement {
    fn clone(&self) -> PreparedStatement {
        PreparedStatement {
            statement: self.statement.clone(),
            consistency: self.consistency,
            is_idempotent: self.is_idempotent,
            keyspace: self.keyspace.clone(),
            retry_policy: self.retry_policy.as_ref().map(|rp| rp.clone_boxed()),
        }
    }
}

impl PreparedStatement {
    pub fn new(statement: impl Into<String>) -> Self {
        PreparedStatement {
            statement: statement.into(),
            consistency: Consistency::default(),
            is_idempotent: false,
            keyspace: None,
            retry_policy: None,
        }
    }

    /// The cql text this statement was prepared from. This is the key used
    /// in `prepared[host]`/`preparing[host]`.
    pub fn get_statement(&self) -> &str {
        &self.statement
    }

    pub fn set_keyspace(&mut self, keyspace: impl Into<String>) {
        self.keyspace = Some(keyspace.into());
    }
}

/// An opaque, host-local token identifying a server-side parsed statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedId(pub Bytes);
