//! Mock ObjectStore for unit testing
//!
//! Keeps objects in memory and behaves like the API server where the fabric
//! depends on it: resource versions are bumped on every write and checked when
//! set, generation is bumped only on spec changes, status writes leave the spec
//! alone, and lists honor label selectors.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::{kind_of, name_of, ObjectStore, StoreObject};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory store for one kind in one namespace
#[derive(Clone)]
pub struct MockStore<K: StoreObject> {
    namespace: String,
    objects: Arc<Mutex<BTreeMap<String, K>>>,
    resource_version: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
    injected_conflicts: Arc<AtomicU32>,
}

impl<K: StoreObject> std::fmt::Debug for MockStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("kind", &kind_of::<K>())
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<K: StoreObject> MockStore<K> {
    /// Create an empty store bound to `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            resource_version: Arc::new(AtomicU64::new(1)),
            writes: Arc::new(AtomicUsize::new(0)),
            injected_conflicts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a store sharing the resource version counter of `other`
    ///
    /// Useful when several kinds must see one monotonic counter.
    pub fn sharing_versions_with<O: StoreObject>(other: &MockStore<O>) -> Self {
        Self {
            resource_version: Arc::clone(&other.resource_version),
            ..Self::new(other.namespace.clone())
        }
    }

    /// Add an object without counting it as a write (for test setup)
    pub fn seed(&self, obj: K) -> K {
        let name = obj.meta().name.clone().unwrap_or_default();
        let obj = self.stamp_new(obj);
        self.objects.lock().unwrap().insert(name, obj.clone());
        obj
    }

    /// Stored object, if any (for assertions)
    pub fn peek(&self, name: &str) -> Option<K> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    /// All stored objects in name order (for assertions)
    pub fn all(&self) -> Vec<K> {
        self.objects.lock().unwrap().values().cloned().collect()
    }

    /// Number of create/replace/status/delete calls that changed the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `n` replace or status writes fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn next_resource_version(&self) -> String {
        self.resource_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn stamp_new(&self, mut obj: K) -> K {
        let rv = self.next_resource_version();
        let meta = obj.meta_mut();
        meta.namespace = Some(self.namespace.clone());
        meta.resource_version = Some(rv);
        meta.generation = Some(1);
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        obj
    }

    fn take_injected_conflict(&self, name: &str) -> Result<(), StoreError> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(self.conflict(name, "injected conflict"));
        }
        Ok(())
    }

    fn conflict(&self, name: &str, message: &str) -> StoreError {
        StoreError::Conflict {
            kind: kind_of::<K>(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn not_found(name: &str) -> StoreError {
        StoreError::NotFound {
            kind: kind_of::<K>(),
            name: name.to_string(),
        }
    }

    fn check_version(&self, name: &str, stored: &K, obj: &K) -> Result<(), StoreError> {
        match &obj.meta().resource_version {
            Some(rv) if Some(rv) != stored.meta().resource_version.as_ref() => Err(self.conflict(
                name,
                "the object has been modified; please apply your changes to the latest version",
            )),
            _ => Ok(()),
        }
    }
}

/// Top-level field of an object's JSON form
fn field(obj: &Value, name: &str) -> Value {
    obj.get(name).cloned().unwrap_or(Value::Null)
}

#[async_trait::async_trait]
impl<K: StoreObject> ObjectStore<K> for MockStore<K> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<K, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| selector.matches(o.meta().labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&name) {
            return Err(StoreError::AlreadyExists {
                kind: kind_of::<K>(),
                name,
            });
        }
        let mut obj = obj.clone();
        obj.meta_mut().uid = None;
        let obj = self.stamp_new(obj);
        objects.insert(name, obj.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(obj)
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        self.take_injected_conflict(&name)?;
        let mut objects = self.objects.lock().unwrap();
        let stored = objects.get(&name).ok_or_else(|| Self::not_found(&name))?;
        self.check_version(&name, stored, obj)?;

        let old = serde_json::to_value(stored)?;
        let mut new = serde_json::to_value(obj)?;
        // Status is a sub-resource: a replace cannot change it
        new["status"] = field(&old, "status");
        let mut replaced: K = serde_json::from_value(new.clone())?;

        let generation = stored.meta().generation.unwrap_or(1);
        let spec_changed = field(&old, "spec") != field(&new, "spec");
        let meta = replaced.meta_mut();
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.namespace = Some(self.namespace.clone());
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });
        meta.resource_version = Some(self.next_resource_version());

        objects.insert(name, replaced.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(replaced)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        self.take_injected_conflict(&name)?;
        let mut objects = self.objects.lock().unwrap();
        let stored = objects.get(&name).ok_or_else(|| Self::not_found(&name))?;
        self.check_version(&name, stored, obj)?;

        let mut merged = serde_json::to_value(stored)?;
        merged["status"] = field(&serde_json::to_value(obj)?, "status");
        let mut updated: K = serde_json::from_value(merged)?;
        updated.meta_mut().resource_version = Some(self.next_resource_version());

        objects.insert(name, updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Self::not_found(name))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DHCPAllocated, DHCPSubnet, DHCPSubnetSpec, DHCPSubnetStatus};
    use kube::api::ObjectMeta;

    fn subnet(name: &str, vpc: &str) -> DHCPSubnet {
        DHCPSubnet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    "fabric.microscaler.io/vpc".to_string(),
                    vpc.to_string(),
                )])),
                ..Default::default()
            },
            spec: DHCPSubnetSpec {
                subnet: format!("{vpc}/default"),
                cidr_block: "10.0.0.0/24".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let store = MockStore::<DHCPSubnet>::new("default");
        let created = store.create(&subnet("vpc-1--default", "vpc-1")).await.unwrap();
        store.create(&subnet("vpc-2--default", "vpc-2")).await.unwrap();

        assert_eq!(created.metadata.generation, Some(1));
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));

        let fetched = store.get("vpc-1--default").await.unwrap();
        assert_eq!(fetched.metadata.resource_version, created.metadata.resource_version);

        let selected = store
            .list(&LabelSelector::everything().eq("fabric.microscaler.io/vpc", "vpc-2"))
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.name.as_deref(), Some("vpc-2--default"));

        assert!(matches!(
            store.create(&subnet("vpc-1--default", "vpc-1")).await,
            Err(StoreError::AlreadyExists { .. })
        ));
        assert!(store.get_opt("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_checks_version_and_bumps_generation() {
        let store = MockStore::<DHCPSubnet>::new("default");
        let created = store.create(&subnet("s", "vpc-1")).await.unwrap();

        let mut changed = created.clone();
        changed.spec.gateway = "10.0.0.1".to_string();
        let replaced = store.replace(&changed).await.unwrap();
        assert_eq!(replaced.metadata.generation, Some(2));
        assert_ne!(replaced.metadata.resource_version, created.metadata.resource_version);

        // Stale resource version
        assert!(matches!(
            store.replace(&changed).await,
            Err(StoreError::Conflict { .. })
        ));

        // Unchanged spec keeps the generation
        let same = store.replace(&replaced).await.unwrap();
        assert_eq!(same.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_update_status_leaves_spec_and_generation() {
        let store = MockStore::<DHCPSubnet>::new("default");
        let created = store.create(&subnet("s", "vpc-1")).await.unwrap();

        let mut with_status = created.clone();
        with_status.spec.gateway = "ignored".to_string();
        with_status.status = Some(DHCPSubnetStatus {
            allocated: BTreeMap::from([(
                "02:00:00:00:00:01".to_string(),
                DHCPAllocated {
                    ip: "10.0.0.100".to_string(),
                    ..Default::default()
                },
            )]),
        });

        let updated = store.update_status(&with_status).await.unwrap();
        assert_eq!(updated.spec.gateway, "");
        assert_eq!(updated.metadata.generation, Some(1));
        assert_eq!(updated.status.unwrap().allocated.len(), 1);

        assert!(matches!(
            store.update_status(&with_status).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_conflicts_and_write_count() {
        let store = MockStore::<DHCPSubnet>::new("default");
        let created = store.create(&subnet("s", "vpc-1")).await.unwrap();
        assert_eq!(store.write_count(), 1);

        store.inject_conflicts(1);
        assert!(store.update_status(&created).await.is_err());
        assert!(store.update_status(&created).await.is_ok());
        assert_eq!(store.write_count(), 2);

        store.delete("s").await.unwrap();
        assert!(store.delete("s").await.unwrap_err().is_not_found());
        assert!(store.all().is_empty());
    }
}
