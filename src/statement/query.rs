use super::Consistency;
use crate::transport::retry_policy::RetryPolicy;

/// A simple (unprepared) CQL statement.
pub struct Query {
    contents: String,
    pub consistency: Consistency,
    pub is_idempotent: bool,
    /// Keyspace this statement should be aligned to before sending, if
    /// different from the session keyspace. Drives the Keyspace Switcher.
    pub keyspace: Option<String>,
    pub retry_policy: Option<Box<dyn RetryPolicy>>,
}

impl Query {
    /// Creates a new `Query` from a CQL query string.
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            consistency: Default::default(),
            is_idempotent: false,
            keyspace: None,
            retry_policy: None,
        }
    }

    /// Returns the string representation of the CQL query.
    pub fn get_contents(&self) -> &str {
        &self.contents
    }

    /// Sets the consistency to be used when executing this query.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = c;
    }

    /// Gets the consistency to be used when executing this query.
    pub fn get_consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn set_is_idempotent(&mut self, idempotent: bool) {
        self.is_idempotent = idempotent;
    }

    /// Overrides the keyspace this statement should run against.
    pub fn set_keyspace(&mut self, keyspace: impl Into<String>) {
        self.keyspace = Some(keyspace.into());
    }
}

impl From<String> for Query {
    fn from(s: String) -> Query {
        Query::new(s)
    }
}

impl<'a> From<&'a str> for Query {
    fn from(s: &'a str) -> Query {
        Query::new(s.to_owned())
    }
}

impl Clone for Query {
    fn clone(&self) -> Query {
        Query {
            contents: self.contents.clone(),
            consistency: self.consistency,
            is_idempotent: self.is_idempotent,
            keyspace: self.keyspace.clone(),
            retry_policy: self.retry_policy.as_ref().map(|rp| rp.clone_boxed()),
        }
    }
}
