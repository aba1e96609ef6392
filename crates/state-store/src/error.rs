//! State store errors

use thiserror::Error;

/// Errors that can occur when reading or writing objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Resource version did not match (optimistic concurrency)
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Object already exists on create
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing something the store needs (name, status)
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    /// Classify a kube error for the object `kind`/`name`
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                StoreError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: resp.message.clone(),
            },
            _ => StoreError::Kube(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors that may be caused by a stale resource version
pub trait IsConflict {
    fn is_conflict(&self) -> bool;
}

impl IsConflict for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
