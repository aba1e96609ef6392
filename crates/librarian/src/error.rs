//! Librarian errors

use state_store::StoreError;
use thiserror::Error;

/// Errors from the allocator primitives
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Value is not part of the pool
    #[error("value {0} is outside the pool")]
    OutOfPool(String),

    /// No free value left
    #[error("pool exhausted")]
    Exhausted,

    /// Balanced allocator without candidates
    #[error("no candidate values to allocate from")]
    EmptyCandidateSet,

    /// Range with `from > to` or zero stride
    #[error("invalid range {from}..{to} with stride {stride}")]
    InvalidRange { from: u64, to: u64, stride: u64 },
}

/// Errors from librarian operations
#[derive(Debug, Error)]
pub enum LibrarianError {
    /// State store error
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// An allocation in a catalog failed
    #[error("Allocating {what} in catalog {catalog} failed: {source}")]
    Allocator {
        catalog: String,
        what: &'static str,
        #[source]
        source: AllocatorError,
    },

    /// A key the caller relies on is missing from a global catalog
    #[error("Catalog {catalog} has no {what} for {key}")]
    MissingCatalogEntry {
        catalog: String,
        what: &'static str,
        key: String,
    },
}
