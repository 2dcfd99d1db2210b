//! Error types surfaced by the search core.

/// Errors produced while constructing or running a search.
///
/// None of these are ever swallowed: limit validation errors are returned at
/// construction time, store exhaustion aborts the search with the tree
/// preserved, evaluator failures abort the current step after virtual loss
/// has been released, and consistency failures are fatal.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// A search limit was constructed with a negative value, or with an
    /// increment on a per-move limit kind.
    #[error("invalid search limit: {0}")]
    InvalidLimit(String),

    /// The node or edge arena reached its configured capacity and the limit
    /// does not permit expansion.
    #[error("node store exhausted after {0} allocations")]
    StoreExhausted(u32),

    /// The external evaluator returned an error or malformed output.
    #[error("evaluator failure: {0}")]
    EvaluatorFailure(String),

    /// A tree invariant check failed. Only raised from debug builds.
    #[error("tree inconsistency: {0}")]
    Inconsistent(String),
}
