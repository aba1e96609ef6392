//! ObjectStore backed by the Kubernetes API

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::{kind_of, name_of, ObjectStore, StoreObject};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Typed store over `Api<K>` in one namespace
#[derive(Clone)]
pub struct KubeStore<K: StoreObject> {
    api: Api<K>,
    namespace: String,
}

impl<K: StoreObject> KubeStore<K> {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Underlying API, for watches
    pub fn api(&self) -> &Api<K> {
        &self.api
    }
}

impl<K: StoreObject> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &kind_of::<K>())
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait::async_trait]
impl<K: StoreObject> ObjectStore<K> for KubeStore<K> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<K, StoreError> {
        self.api
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), name, e))
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_string());
        }
        let list = self
            .api
            .list(&lp)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), "", e))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        debug!("Creating {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &name, e))
    }

    async fn replace(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        debug!("Replacing {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &name, e))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let name = name_of(obj)?;
        let value = serde_json::to_value(obj)?;
        let status = value.get("status").cloned().unwrap_or(serde_json::Value::Null);

        // resourceVersion in a merge patch makes the write conditional
        let mut patch = json!({ "status": status });
        if let Some(rv) = &obj.meta().resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        self.api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &name, e))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        debug!("Deleting {} {}/{}", kind_of::<K>(), self.namespace, name);
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), name, e))
    }
}
