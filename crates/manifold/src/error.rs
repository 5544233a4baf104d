use crate::{index::IndexError, store::StoreError, types::ChangeError};
use thiserror::Error as ThisError;

///
/// CacheError
///
/// Top-level error for cache mutations, wrapping the origin-specific errors.
/// Any error from a mutation guarantees the store and every registered index
/// are exactly as they were before the call.
///

#[derive(Debug, ThisError)]
pub enum CacheError {
    #[error("index '{}' rejected the batch: {source}", name.as_deref().unwrap_or("unnamed"))]
    Index {
        name: Option<String>,
        #[source]
        source: IndexError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error("reentrant mutation '{op}' while another mutation is in progress")]
    Reentrancy { op: &'static str },
}
