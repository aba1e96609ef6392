//! Helper functions for common reconciliation patterns
//!
//! Derived objects (Agents, DHCPSubnets, VPCInfos, agent infra) are written
//! with `upsert`, which only touches the store when something the reconciler
//! owns differs. Fields the reconciler does not set (status, injected secret
//! data, foreign labels) survive the update.

use crate::error::ControllerError;
use crds::labels::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde_json::Value;
use state_store::{kind_of, name_of, ObjectStore, StoreError, StoreObject};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Top-level keys that are not compared or overlaid
const UNMANAGED_KEYS: &[&str] = &["metadata", "status", "apiVersion", "kind"];

/// What `upsert` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Labels every derived object carries
pub fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string())])
}

pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Owner reference to `owner`; `controller` also sets blockOwnerDeletion
pub fn owner_ref<K: StoreObject>(owner: &K, controller: bool) -> Result<OwnerReference, ControllerError> {
    let reference = if controller {
        owner.controller_owner_ref(&())
    } else {
        owner.owner_ref(&())
    };
    reference.ok_or_else(|| {
        StoreError::InvalidObject(format!(
            "{} {} has no name or uid",
            kind_of::<K>(),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
        .into()
    })
}

fn is_subset(desired: Option<&BTreeMap<String, String>>, existing: Option<&BTreeMap<String, String>>) -> bool {
    desired
        .into_iter()
        .flatten()
        .all(|(k, v)| existing.and_then(|e| e.get(k)) == Some(v))
}

/// Whether writing `desired` would change `existing`
///
/// Compares every top-level field `desired` sets except metadata and status;
/// desired labels, annotations and owner references must already be present.
pub fn needs_update<K: StoreObject>(existing: &K, desired: &K) -> Result<bool, ControllerError> {
    let existing_value = serde_json::to_value(existing)?;
    let desired_value = serde_json::to_value(desired)?;

    if let Value::Object(fields) = &desired_value {
        for (key, value) in fields {
            if UNMANAGED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if existing_value.get(key) != Some(value) {
                debug!("{} {} differs in {}", kind_of::<K>(), name_of(desired)?, key);
                return Ok(true);
            }
        }
    }

    let (em, dm) = (existing.meta(), desired.meta());
    if !is_subset(dm.labels.as_ref(), em.labels.as_ref())
        || !is_subset(dm.annotations.as_ref(), em.annotations.as_ref())
    {
        return Ok(true);
    }
    let existing_owners = em.owner_references.as_deref().unwrap_or_default();
    let owners_present = dm
        .owner_references
        .iter()
        .flatten()
        .all(|o| existing_owners.contains(o));
    Ok(!owners_present)
}

/// Overlay the managed parts of `desired` onto `existing`
fn merge<K: StoreObject>(existing: &K, desired: &K) -> Result<K, ControllerError> {
    let mut merged_value = serde_json::to_value(existing)?;
    if let (Value::Object(target), Value::Object(fields)) =
        (&mut merged_value, serde_json::to_value(desired)?)
    {
        for (key, value) in fields {
            if !UNMANAGED_KEYS.contains(&key.as_str()) {
                target.insert(key, value);
            }
        }
    }
    let mut merged: K = serde_json::from_value(merged_value)?;

    let dm = desired.meta();
    let meta = merged.meta_mut();
    if let Some(labels) = &dm.labels {
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if let Some(annotations) = &dm.annotations {
        meta.annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
    if let Some(owners) = &dm.owner_references {
        let current = meta.owner_references.get_or_insert_with(Vec::new);
        for owner in owners {
            current.retain(|o| o.uid != owner.uid);
            current.push(owner.clone());
        }
    }
    Ok(merged)
}

/// Create `desired` or bring the stored copy in line with it
pub async fn upsert<K, S>(store: &S, desired: &K) -> Result<UpsertOutcome, ControllerError>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    let name = name_of(desired)?;
    let Some(existing) = store.get_opt(&name).await? else {
        store.create(desired).await?;
        info!("Created {} {}/{}", kind_of::<K>(), store.namespace(), name);
        return Ok(UpsertOutcome::Created);
    };

    if !needs_update(&existing, desired)? {
        debug!("{} {}/{} is up-to-date", kind_of::<K>(), store.namespace(), name);
        return Ok(UpsertOutcome::Unchanged);
    }

    let merged = merge(&existing, desired)?;
    store.replace(&merged).await?;
    info!("Updated {} {}/{}", kind_of::<K>(), store.namespace(), name);
    Ok(UpsertOutcome::Updated)
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer` if missing, returning the stored object
pub async fn add_finalizer<K, S>(store: &S, obj: &K, finalizer: &str) -> Result<K, ControllerError>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    if has_finalizer(obj, finalizer) {
        return Ok(obj.clone());
    }
    let mut updated = obj.clone();
    updated
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    let stored = store.replace(&updated).await.map_err(|e| {
        ControllerError::Finalizer(format!(
            "adding {finalizer} to {} {}: {e}",
            kind_of::<K>(),
            obj.meta().name.as_deref().unwrap_or_default()
        ))
    })?;
    debug!("Added finalizer {} to {} {}", finalizer, kind_of::<K>(), name_of(obj)?);
    Ok(stored)
}

/// Remove `finalizer` if present
pub async fn remove_finalizer<K, S>(store: &S, obj: &K, finalizer: &str) -> Result<(), ControllerError>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    if !has_finalizer(obj, finalizer) {
        return Ok(());
    }
    let mut updated = obj.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    match store.replace(&updated).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(ControllerError::Finalizer(format!(
            "removing {finalizer} from {} {}: {e}",
            kind_of::<K>(),
            obj.meta().name.as_deref().unwrap_or_default()
        ))),
    }
}
