//! ObjectStore trait for mocking
//!
//! This trait abstracts typed access to namespaced objects so reconcilers and
//! the DHCP server can be tested against an in-memory store.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Objects that can be kept in a store
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// Typed access to the objects of one kind in one namespace
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    /// Namespace the store is bound to
    fn namespace(&self) -> &str;

    /// Get an object, `StoreError::NotFound` if it does not exist
    async fn get(&self, name: &str) -> Result<K, StoreError>;

    /// Get an object if it exists
    async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List objects matching the selector
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>, StoreError>;

    /// Create a new object
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object; a set resource version must match the stored one
    async fn replace(&self, obj: &K) -> Result<K, StoreError>;

    /// Write the status sub-resource; a set resource version must match
    ///
    /// Does not change the spec or generation.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;

    /// Delete an object
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Kind of `K`, for error messages
pub fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).to_string()
}

/// Name of an object, `StoreError::InvalidObject` if unset
pub fn name_of<K: StoreObject>(obj: &K) -> Result<String, StoreError> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::InvalidObject(format!("{} without a name", kind_of::<K>())))
}
