pub mod batch;
pub mod prepared_statement;
pub mod query;

/// CQL consistency level, as carried on every request frame.
///
/// The dispatcher rewrites this value across retries, so it is kept
/// `Copy` rather than behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::Quorum
    }
}
