//! Librarian
//!
//! Central allocator of the fabric. Allocations are persisted in `Catalog`
//! objects at three scopes:
//!
//! - global: "connections" (ESLAG connection IDs) and "vpcs" (VPC and subnet
//!   VNIs)
//! - redundancy group: "rg--<group>" (IRB VLANs, port channel IDs), or the
//!   switch catalog when the switch has no group
//! - switch: "sw--<switch>" (loopback workaround links and VLANs, external IDs,
//!   subnet IDs)
//!
//! Every catalog read-modify-write runs under one process wide mutex.

use crate::allocator::{allocate, live_keys, Balanced, NextFreeValueFromRanges};
use crate::error::{AllocatorError, LibrarianError};
use crds::labels::LABEL_CONNECTION_TYPE;
use crds::{
    redundancy_group_catalog_name, switch_catalog_name, Catalog, CatalogSpec, Connection,
    ConnectionType, VLANRange, CATALOG_CONNECTIONS, CATALOG_VPCS, VPC,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use state_store::{LabelSelector, ObjectStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// First VPC VNI, VPC VNIs are multiples of it
pub const VPC_VNI_OFFSET: u32 = 100;
/// Last VPC VNI
pub const VPC_VNI_MAX: u32 = 16_777_100;
pub const PORT_CHAN_MIN: u16 = 1;
pub const PORT_CHAN_MAX: u16 = 249;
pub const EXTERNAL_ID_MIN: u16 = 10;
pub const EXTERNAL_ID_MAX: u16 = u16::MAX;
pub const SUBNET_ID_MIN: u32 = 100;
pub const SUBNET_ID_MAX: u32 = 64_999;
pub const CONNECTION_ID_MIN: u32 = 1;
pub const CONNECTION_ID_MAX: u32 = u32::MAX;

/// VLAN pools the librarian allocates from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarianConfig {
    /// Per VPC IRB VLANs, scoped to a redundancy group
    pub vpc_irb_vlans: Vec<VLANRange>,
    /// Loopback workaround VLANs, scoped to a switch
    pub vpc_peering_vlans: Vec<VLANRange>,
}

/// Switch scoped allocation requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchRequest {
    /// Loopback workaround links available on the switch ("E1/1--E1/2")
    pub loopback_links: BTreeSet<String>,
    /// Loopback workaround requests ("vpc@<peering>", "ext@<peering>")
    pub loopback_requests: BTreeSet<String>,
    /// Externals attached on the switch
    pub externals: BTreeSet<String>,
    /// Subnet CIDRs configured on the switch
    pub subnets: BTreeSet<String>,
}

/// Redundancy group scoped allocation requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedundancyGroupRequest {
    /// VPCs present on the switch
    pub used_vpcs: BTreeSet<String>,
    /// Connections needing a port channel
    pub port_chan_conns: BTreeSet<String>,
    /// Connections needing a fabric wide ID (ESLAG)
    pub id_conns: BTreeSet<String>,
}

pub struct Librarian {
    lock: Mutex<()>,
    catalogs: Arc<dyn ObjectStore<Catalog>>,
    connections: Arc<dyn ObjectStore<Connection>>,
    vpcs: Arc<dyn ObjectStore<VPC>>,
    config: LibrarianConfig,
}

impl std::fmt::Debug for Librarian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Librarian")
            .field("namespace", &self.catalogs.namespace())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn vlan_ranges(ranges: &[VLANRange]) -> Vec<(u16, u16)> {
    ranges.iter().map(|r| (r.from, r.to)).collect()
}

fn alloc_err(catalog: &str, what: &'static str) -> impl FnOnce(AllocatorError) -> LibrarianError {
    let catalog = catalog.to_string();
    move |source| LibrarianError::Allocator {
        catalog,
        what,
        source,
    }
}

/// Copy `keys` out of `from`, failing on the first missing one
fn pick<V: Clone>(
    from: &BTreeMap<String, V>,
    keys: &BTreeSet<String>,
    catalog: &str,
    what: &'static str,
) -> Result<BTreeMap<String, V>, LibrarianError> {
    keys.iter()
        .map(|k| {
            from.get(k)
                .map(|v| (k.clone(), v.clone()))
                .ok_or_else(|| LibrarianError::MissingCatalogEntry {
                    catalog: catalog.to_string(),
                    what,
                    key: k.clone(),
                })
        })
        .collect()
}

impl Librarian {
    pub fn new(
        catalogs: Arc<dyn ObjectStore<Catalog>>,
        connections: Arc<dyn ObjectStore<Connection>>,
        vpcs: Arc<dyn ObjectStore<VPC>>,
        config: LibrarianConfig,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            catalogs,
            connections,
            vpcs,
            config,
        }
    }

    async fn load(&self, name: &str) -> Result<(Option<Catalog>, CatalogSpec), LibrarianError> {
        let existing = self.catalogs.get_opt(name).await?;
        let spec = existing.as_ref().map(|c| c.spec.clone()).unwrap_or_default();
        Ok((existing, spec))
    }

    /// Write a catalog unconditionally, creating it if needed
    async fn save(
        &self,
        name: &str,
        existing: Option<Catalog>,
        spec: CatalogSpec,
    ) -> Result<(), LibrarianError> {
        match existing {
            Some(existing) if existing.spec == spec => {
                debug!("Catalog {} is up-to-date", name);
                Ok(())
            }
            Some(mut existing) => {
                existing.spec = spec;
                existing.metadata.resource_version = None;
                match self.catalogs.replace(&existing).await {
                    Err(e) if e.is_not_found() => self.create(name, existing.spec).await,
                    other => other.map(|_| ()).map_err(LibrarianError::from),
                }
            }
            None => self.create(name, spec).await,
        }
    }

    async fn create(&self, name: &str, spec: CatalogSpec) -> Result<(), LibrarianError> {
        let catalog = Catalog {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.catalogs.namespace().to_string()),
                ..Default::default()
            },
            spec,
        };
        self.catalogs.create(&catalog).await?;
        info!("Created catalog {}/{}", self.catalogs.namespace(), name);
        Ok(())
    }

    /// Refresh ESLAG connection IDs
    pub async fn update_connections(&self) -> Result<(), LibrarianError> {
        let conns = self
            .connections
            .list(&LabelSelector::everything().eq(LABEL_CONNECTION_TYPE, ConnectionType::ESLAG.as_str()))
            .await?;
        let names: BTreeSet<String> = conns.iter().map(ResourceExt::name_any).collect();

        let _guard = self.lock.lock().await;
        let (existing, mut spec) = self.load(CATALOG_CONNECTIONS).await?;

        let mut alloc =
            NextFreeValueFromRanges::new(&[(CONNECTION_ID_MIN, CONNECTION_ID_MAX)], 1)
                .map_err(alloc_err(CATALOG_CONNECTIONS, "connection IDs"))?;
        spec.connection_ids = allocate(&mut alloc, &spec.connection_ids, &live_keys(&names))
            .map_err(alloc_err(CATALOG_CONNECTIONS, "connection IDs"))?;

        self.save(CATALOG_CONNECTIONS, existing, spec).await
    }

    /// Refresh VPC VNIs and VPC subnet VNIs
    ///
    /// VPCs being deleted release their VNIs.
    pub async fn update_vpcs(&self) -> Result<(), LibrarianError> {
        let vpcs: Vec<VPC> = self
            .vpcs
            .list(&LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|v| v.metadata.deletion_timestamp.is_none())
            .collect();
        let names: BTreeSet<String> = vpcs.iter().map(ResourceExt::name_any).collect();

        let _guard = self.lock.lock().await;
        let (existing, mut spec) = self.load(CATALOG_VPCS).await?;

        let mut alloc = NextFreeValueFromRanges::new(&[(VPC_VNI_OFFSET, VPC_VNI_MAX)], VPC_VNI_OFFSET)
            .map_err(alloc_err(CATALOG_VPCS, "VPC VNIs"))?;
        let vnis = allocate(&mut alloc, &spec.vpc_vnis, &live_keys(&names))
            .map_err(alloc_err(CATALOG_VPCS, "VPC VNIs"))?;

        let mut subnet_vnis = BTreeMap::new();
        for vpc in &vpcs {
            let name = vpc.name_any();
            let Some(&vni) = vnis.get(&name) else {
                continue;
            };
            let (first, last) = (vni + 1, vni + VPC_VNI_OFFSET - 1);

            // Prior subnet VNIs survive only inside the VPC's current block
            let known: BTreeMap<String, u32> = spec
                .vpc_subnet_vnis
                .get(&name)
                .map(|m| {
                    m.iter()
                        .filter(|(_, v)| (first..=last).contains(*v))
                        .map(|(k, v)| (k.clone(), *v))
                        .collect()
                })
                .unwrap_or_default();

            let mut alloc = NextFreeValueFromRanges::new(&[(first, last)], 1)
                .map_err(alloc_err(CATALOG_VPCS, "VPC subnet VNIs"))?;
            let allocated = allocate(&mut alloc, &known, &live_keys(vpc.spec.subnets.keys()))
                .map_err(alloc_err(CATALOG_VPCS, "VPC subnet VNIs"))?;
            subnet_vnis.insert(name, allocated);
        }

        spec.vpc_vnis = vnis;
        spec.vpc_subnet_vnis = subnet_vnis;
        self.save(CATALOG_VPCS, existing, spec).await
    }

    /// VNI of a VPC from the global catalog
    pub async fn vpc_vni(&self, vpc: &str) -> Result<u32, LibrarianError> {
        let _guard = self.lock.lock().await;
        let (_, spec) = self.load(CATALOG_VPCS).await?;
        spec.vpc_vnis
            .get(vpc)
            .copied()
            .ok_or_else(|| LibrarianError::MissingCatalogEntry {
                catalog: CATALOG_VPCS.to_string(),
                what: "VNI",
                key: vpc.to_string(),
            })
    }

    /// Allocate redundancy group scoped values and return the switch's slice
    ///
    /// Without a redundancy group the switch catalog is used. IRB VLANs are
    /// held only for `used_vpcs`. In a shared group catalog, prior port
    /// channels of existing connections are kept even when this switch does
    /// not use them, so the other members see stable values.
    pub async fn catalog_for_redundancy_group(
        &self,
        switch: &str,
        redundancy_group: Option<&str>,
        req: &RedundancyGroupRequest,
    ) -> Result<CatalogSpec, LibrarianError> {
        let catalog_name = redundancy_group
            .map(redundancy_group_catalog_name)
            .unwrap_or_else(|| switch_catalog_name(switch));

        let existing_conns: BTreeSet<String> = if redundancy_group.is_some() {
            self.connections
                .list(&LabelSelector::everything())
                .await?
                .iter()
                .map(ResourceExt::name_any)
                .collect()
        } else {
            BTreeSet::new()
        };

        let _guard = self.lock.lock().await;
        let (_, conns_catalog) = self.load(CATALOG_CONNECTIONS).await?;
        let (_, vpcs_catalog) = self.load(CATALOG_VPCS).await?;
        let (existing, mut spec) = self.load(&catalog_name).await?;

        let irb_updates = live_keys(&req.used_vpcs);
        let mut pc_updates = live_keys(&req.port_chan_conns);
        if redundancy_group.is_some() {
            for conn in spec.port_chan_ids.keys() {
                if existing_conns.contains(conn) {
                    pc_updates.entry(conn.clone()).or_insert(true);
                }
            }
        }

        let mut alloc = NextFreeValueFromRanges::new(&vlan_ranges(&self.config.vpc_irb_vlans), 1)
            .map_err(alloc_err(&catalog_name, "IRB VLANs"))?;
        spec.irb_vlans = allocate(&mut alloc, &spec.irb_vlans, &irb_updates)
            .map_err(alloc_err(&catalog_name, "IRB VLANs"))?;

        let mut alloc = NextFreeValueFromRanges::new(&[(PORT_CHAN_MIN, PORT_CHAN_MAX)], 1)
            .map_err(alloc_err(&catalog_name, "port channel IDs"))?;
        spec.port_chan_ids = allocate(&mut alloc, &spec.port_chan_ids, &pc_updates)
            .map_err(alloc_err(&catalog_name, "port channel IDs"))?;

        self.save(&catalog_name, existing, spec.clone()).await?;

        let mut subnet_vnis = BTreeMap::new();
        for vpc in &req.used_vpcs {
            let vnis = vpcs_catalog.vpc_subnet_vnis.get(vpc).ok_or_else(|| {
                LibrarianError::MissingCatalogEntry {
                    catalog: CATALOG_VPCS.to_string(),
                    what: "subnet VNIs",
                    key: vpc.clone(),
                }
            })?;
            subnet_vnis.insert(vpc.clone(), vnis.clone());
        }

        Ok(CatalogSpec {
            connection_ids: pick(
                &conns_catalog.connection_ids,
                &req.id_conns,
                CATALOG_CONNECTIONS,
                "connection ID",
            )?,
            vpc_vnis: pick(&vpcs_catalog.vpc_vnis, &req.used_vpcs, CATALOG_VPCS, "VNI")?,
            vpc_subnet_vnis: subnet_vnis,
            irb_vlans: pick(&spec.irb_vlans, &req.used_vpcs, &catalog_name, "IRB VLAN")?,
            port_chan_ids: pick(
                &spec.port_chan_ids,
                &req.port_chan_conns,
                &catalog_name,
                "port channel ID",
            )?,
            ..Default::default()
        })
    }

    /// Allocate switch scoped values and return them
    ///
    /// Prior loopback workaround assignments to links that no longer exist
    /// are dropped before allocation.
    pub async fn catalog_for_switch(
        &self,
        switch: &str,
        req: &SwitchRequest,
    ) -> Result<CatalogSpec, LibrarianError> {
        let catalog_name = switch_catalog_name(switch);

        let _guard = self.lock.lock().await;
        let (existing, mut spec) = self.load(&catalog_name).await?;

        let known_links: BTreeMap<String, String> = spec
            .loopback_workaround_links
            .iter()
            .filter(|(_, link)| req.loopback_links.contains(*link))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut alloc = Balanced::new(req.loopback_links.iter().cloned());
        spec.loopback_workaround_links =
            allocate(&mut alloc, &known_links, &live_keys(&req.loopback_requests))
                .map_err(alloc_err(&catalog_name, "loopback workaround links"))?;

        let mut alloc = NextFreeValueFromRanges::new(&vlan_ranges(&self.config.vpc_peering_vlans), 1)
            .map_err(alloc_err(&catalog_name, "loopback workaround VLANs"))?;
        spec.loopback_workaround_vlans = allocate(
            &mut alloc,
            &spec.loopback_workaround_vlans,
            &live_keys(&req.loopback_requests),
        )
        .map_err(alloc_err(&catalog_name, "loopback workaround VLANs"))?;

        let mut alloc = NextFreeValueFromRanges::new(&[(EXTERNAL_ID_MIN, EXTERNAL_ID_MAX)], 1)
            .map_err(alloc_err(&catalog_name, "external IDs"))?;
        spec.external_ids = allocate(&mut alloc, &spec.external_ids, &live_keys(&req.externals))
            .map_err(alloc_err(&catalog_name, "external IDs"))?;

        let mut alloc = NextFreeValueFromRanges::new(&[(SUBNET_ID_MIN, SUBNET_ID_MAX)], 1)
            .map_err(alloc_err(&catalog_name, "subnet IDs"))?;
        spec.subnet_ids = allocate(&mut alloc, &spec.subnet_ids, &live_keys(&req.subnets))
            .map_err(alloc_err(&catalog_name, "subnet IDs"))?;

        self.save(&catalog_name, existing, spec.clone()).await?;

        Ok(CatalogSpec {
            loopback_workaround_links: spec.loopback_workaround_links,
            loopback_workaround_vlans: spec.loopback_workaround_vlans,
            external_ids: spec.external_ids,
            subnet_ids: spec.subnet_ids,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod librarian_test;
