//! Cluster client core for a Cassandra-style native-protocol driver.
//!
//! This crate dispatches CQL requests across a pool of per-host connections,
//! enforces load balancing and retry policy, caches prepared statements, and
//! reacts to topology changes. It does not parse CQL, encode/decode frames,
//! or discover topology itself — those are external collaborators reached
//! through the traits in [`transport`].

pub mod frame;
pub mod statement;
pub mod transport;

pub use statement::batch::{Batch, BatchStatement};
pub use statement::prepared_statement::PreparedStatement;
pub use statement::query::Query;
pub use statement::Consistency;

pub use transport::errors::{ClientError, QueryError};
pub use transport::host::Host;
pub use transport::session::{Session, SessionConfig};
