//! Controller-specific error types.
//!
//! Library errors (state store, librarian, validation) are wrapped so the
//! reconciler framework can decide between retrying and waiting for a change.

use crds::ValidationError;
use kube::Error as KubeError;
use librarian::{AllocatorError, LibrarianError};
use state_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the Fabric Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// State store error
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Librarian (catalog allocation) error
    #[error("Librarian error: {0}")]
    Librarian(#[from] LibrarianError),

    /// Desired state is internally inconsistent
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O error (config file, probe listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Adding or removing a finalizer failed
    #[error("Finalizer error: {0}")]
    Finalizer(String),

    /// Leader lease could not be held
    #[error("Leadership lost: {0}")]
    Leadership(String),
}

impl ControllerError {
    /// Errors that will not go away by retrying; the object has to change
    ///
    /// Validation failures and exhausted allocator pools.
    pub fn is_permanent(&self) -> bool {
        match self {
            ControllerError::Validation(_) => true,
            ControllerError::Librarian(LibrarianError::Allocator { source, .. }) => {
                matches!(
                    source,
                    AllocatorError::Exhausted | AllocatorError::OutOfPool(_)
                )
            }
            _ => false,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Store(_) => "store",
            ControllerError::Librarian(_) => "librarian",
            ControllerError::Validation(_) => "validation",
            ControllerError::Serialization(_) => "serialization",
            ControllerError::Metrics(_) => "metrics",
            ControllerError::Io(_) => "io",
            ControllerError::InvalidConfig(_) => "config",
            ControllerError::Watch(_) => "watch",
            ControllerError::Finalizer(_) => "finalizer",
            ControllerError::Leadership(_) => "leadership",
        }
    }
}
