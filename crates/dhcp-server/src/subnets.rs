//! In-memory subnet map and its watch loop
//!
//! Subnets are keyed by `(vrf, circuitId)`. The watch loop is the only writer
//! besides the refresh after a successful lease write; packet handlers only
//! read.

use crate::error::DhcpError;
use crds::DHCPSubnet;
use futures::TryStreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::watcher::{self, watcher, Event};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Delay before a failed watch is restarted
pub const WATCH_RESTART_DELAY: Duration = Duration::from_secs(1);

/// `(vrf, circuitId)`, empty VRF meaning "default"
pub type SubnetKey = (String, String);

/// Subnets served by this instance
#[derive(Debug, Clone, Default)]
pub struct SubnetMap {
    inner: Arc<RwLock<HashMap<SubnetKey, DHCPSubnet>>>,
}

fn resource_version(subnet: &DHCPSubnet) -> Option<u64> {
    subnet.metadata.resource_version.as_deref()?.parse().ok()
}

impl SubnetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, vrf: &str, circuit_id: &str) -> Option<DHCPSubnet> {
        self.inner
            .read()
            .await
            .get(&(vrf.to_string(), circuit_id.to_string()))
            .cloned()
    }

    /// Snapshot of every subnet
    pub async fn all(&self) -> Vec<DHCPSubnet> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Insert or refresh a subnet, ignoring copies older than the one held
    ///
    /// A subnet whose key changed is moved to the new key.
    pub async fn upsert(&self, subnet: DHCPSubnet) -> bool {
        let key = subnet.spec.key();
        let name = subnet.name_any();
        let mut map = self.inner.write().await;

        if let Some(existing) = map.get(&key)
            && let (Some(held), Some(incoming)) = (resource_version(existing), resource_version(&subnet))
            && incoming < held
        {
            debug!("Ignoring stale DHCPSubnet {} at version {}", name, incoming);
            return false;
        }

        map.retain(|k, s| *k == key || s.name_any() != name);
        map.insert(key, subnet);
        true
    }

    /// Forget a subnet by name
    pub async fn remove(&self, subnet: &DHCPSubnet) -> bool {
        let name = subnet.name_any();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, s| s.name_any() != name);
        before != map.len()
    }

    /// Swap the whole map after a (re)list
    pub async fn replace_all(&self, subnets: Vec<DHCPSubnet>) {
        let fresh: HashMap<SubnetKey, DHCPSubnet> =
            subnets.into_iter().map(|s| (s.spec.key(), s)).collect();
        *self.inner.write().await = fresh;
    }

    /// Apply one watch event; `initial` buffers the objects of a relist
    pub async fn apply(&self, event: Event<DHCPSubnet>, initial: &mut Vec<DHCPSubnet>) {
        match event {
            Event::Apply(subnet) => {
                debug!("DHCPSubnet {} applied", subnet.name_any());
                self.upsert(subnet).await;
            }
            Event::Delete(subnet) => {
                info!("DHCPSubnet {} deleted", subnet.name_any());
                self.remove(&subnet).await;
            }
            Event::Init => initial.clear(),
            Event::InitApply(subnet) => initial.push(subnet),
            Event::InitDone => {
                self.replace_all(std::mem::take(initial)).await;
                info!("Serving {} DHCP subnets", self.len().await);
            }
        }
    }
}

/// Follow `DHCPSubnet` changes until the stream fails
pub async fn watch_subnets(api: Api<DHCPSubnet>, subnets: SubnetMap) -> Result<(), DhcpError> {
    let mut stream = Box::pin(watcher(api, watcher::Config::default()));
    let mut initial = Vec::new();

    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| DhcpError::Watch(e.to_string()))?
    {
        subnets.apply(event, &mut initial).await;
    }

    Ok(())
}

/// Keep the watch running, restarting it after a short delay
pub async fn run_watch(api: Api<DHCPSubnet>, subnets: SubnetMap) {
    loop {
        match watch_subnets(api.clone(), subnets.clone()).await {
            Ok(()) => warn!("DHCPSubnet watch ended, restarting"),
            Err(e) => warn!("{}, restarting", e),
        }
        tokio::time::sleep(WATCH_RESTART_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::DHCPSubnetSpec;
    use kube::api::ObjectMeta;

    fn subnet(name: &str, circuit: &str, rv: &str) -> DHCPSubnet {
        DHCPSubnet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                resource_version: Some(rv.to_string()),
                ..Default::default()
            },
            spec: DHCPSubnetSpec {
                subnet: name.replace("--", "/"),
                circuit_id: circuit.to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_newer_version_wins() {
        let map = SubnetMap::new();
        assert!(map.upsert(subnet("vpc-1--default", "Vlan1001", "5")).await);
        assert!(!map.upsert(subnet("vpc-1--default", "Vlan1001", "4")).await);
        assert!(map.upsert(subnet("vpc-1--default", "Vlan1001", "6")).await);

        let held = map.get("default", "Vlan1001").await.unwrap();
        assert_eq!(held.metadata.resource_version.as_deref(), Some("6"));
    }

    #[tokio::test]
    async fn test_key_change_moves_entry() {
        let map = SubnetMap::new();
        map.upsert(subnet("vpc-1--default", "Vlan1001", "1")).await;
        map.upsert(subnet("vpc-1--default", "Vlan1002", "2")).await;

        assert!(map.get("default", "Vlan1001").await.is_none());
        assert!(map.get("default", "Vlan1002").await.is_some());
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn test_watch_events() {
        let map = SubnetMap::new();
        let mut initial = Vec::new();
        map.upsert(subnet("gone--default", "Vlan9", "1")).await;

        map.apply(Event::Init, &mut initial).await;
        map.apply(Event::InitApply(subnet("a--default", "Vlan1", "2")), &mut initial).await;
        map.apply(Event::InitApply(subnet("b--default", "Vlan2", "3")), &mut initial).await;
        assert!(map.get("default", "Vlan1").await.is_none());
        map.apply(Event::InitDone, &mut initial).await;

        assert_eq!(map.len().await, 2);
        assert!(map.get("default", "Vlan9").await.is_none());

        map.apply(Event::Delete(subnet("a--default", "Vlan1", "4")), &mut initial).await;
        assert!(map.get("default", "Vlan1").await.is_none());
        map.apply(Event::Apply(subnet("c--default", "Vlan3", "5")), &mut initial).await;
        assert!(map.get("default", "Vlan3").await.is_some());
    }
}
