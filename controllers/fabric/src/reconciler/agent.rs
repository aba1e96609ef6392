//! Agent reconciler
//!
//! One `Agent` per `Switch`. A reconcile gathers everything the switch needs
//! (its connections, neighbors, the VPCs attached to it or its MCLAG peer,
//! peerings, externals and namespaces), asks the librarian for the switch's
//! slice of the catalogs and writes the result as the Agent spec. Writing the
//! Agent is the commit point: any failure before it leaves the previous Agent
//! in place and the reconcile is retried.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{is_deleting, managed_labels, owner_ref, upsert, UpsertOutcome};
use crds::labels::{switch_label, LABEL_CONNECTION_TYPE, LABEL_LOCATION, LABEL_VALUE_TRUE};
use crds::{
    validate_eslag_peering, Agent, AgentSpec, CatalogSpec, ConnectionSpec, ConnectionType,
    ConnectionVariant, ExternalAttachmentSpec, ExternalPeeringSpec, ExternalSpec,
    IPv4NamespaceSpec, RedundancyType, Switch, SwitchSpec, VLANNamespaceSpec, VPCAttachmentSpec,
    VPCPeeringSpec, VPCSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use librarian::{RedundancyGroupRequest, SwitchRequest};
use state_store::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue delay while the agent's token secret is being populated
pub const TOKEN_REQUEUE: Duration = Duration::from_secs(1);

/// Loopback workaround request for a VPC peering
pub fn vpc_loopback_request(peering: &str) -> String {
    format!("vpc@{peering}")
}

/// Loopback workaround request for an external peering
pub fn external_loopback_request(peering: &str) -> String {
    format!("ext@{peering}")
}

/// Connections are retained by name with their spec
type Specs<T> = BTreeMap<String, T>;

impl Reconciler {
    pub async fn reconcile_switch(&self, switch: &Switch) -> Result<Action, ControllerError> {
        let name = switch.name_any();
        let ns = self.stores.namespace();

        if is_deleting(switch) {
            debug!("Switch {}/{} is being deleted, Agent goes with it", ns, name);
            return Ok(Action::await_change());
        }

        info!("Reconciling Switch {}/{}", ns, name);
        switch.spec.validate(&name, self.config.fabric_mode)?;

        if !self.ensure_agent_infra(switch).await? {
            return Ok(Action::requeue(TOKEN_REQUEUE));
        }

        let spec = self.build_agent_spec(&name, &switch.spec).await?;

        let mut labels = managed_labels();
        if !switch.spec.location.is_empty() {
            labels.insert(
                LABEL_LOCATION.to_string(),
                switch.spec.location.uuid().to_string(),
            );
        }
        let agent = Agent {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(ns.to_string()),
                labels: Some(labels),
                owner_references: Some(vec![owner_ref(switch, true)?]),
                ..Default::default()
            },
            spec,
            status: None,
        };

        match upsert(self.stores.agents.as_ref(), &agent).await? {
            UpsertOutcome::Unchanged => debug!("Agent {}/{} is up-to-date", ns, name),
            outcome => info!("Agent {}/{}: {:?}", ns, name, outcome),
        }
        Ok(Action::await_change())
    }

    /// Valid connections touching `switch`, keyed by name
    async fn connections_of(&self, switch: &str) -> Result<Specs<ConnectionSpec>, ControllerError> {
        let selector = LabelSelector::everything().eq(switch_label(switch), LABEL_VALUE_TRUE);
        let mut conns = BTreeMap::new();
        for conn in self.stores.connections.list(&selector).await? {
            let conn_name = conn.name_any();
            match conn.spec.validate() {
                Ok(_) => {
                    conns.insert(conn_name, conn.spec);
                }
                Err(e) => warn!("Skipping invalid Connection {}: {}", conn_name, e),
            }
        }
        Ok(conns)
    }

    /// Assemble the Agent spec of `name`
    pub async fn build_agent_spec(&self, name: &str, switch: &SwitchSpec) -> Result<AgentSpec, ControllerError> {
        // Connections
        let mut conns = self.connections_of(name).await?;
        if !self.config.loopback_workaround {
            conns.retain(|_, c| !matches!(c.variant(), Ok(ConnectionVariant::VPCLoopback(_))));
        }
        if switch.role.is_spine() {
            let selector = LabelSelector::everything()
                .eq(LABEL_CONNECTION_TYPE, ConnectionType::StaticExternal.as_str());
            for conn in self.stores.connections.list(&selector).await? {
                let within_vpc = conn.spec.static_external.as_ref().and_then(|s| s.within_vpc.as_ref());
                if within_vpc.is_none() && conn.spec.validate().is_ok() {
                    conns.insert(conn.name_any(), conn.spec);
                }
            }
        }

        // Neighbors, MCLAG peer and redundancy group
        let mut neighbors = BTreeSet::new();
        for conn in conns.values() {
            if let Ok(ep) = conn.endpoints() {
                neighbors.extend(ep.switches.into_iter().filter(|s| s != name));
            }
        }
        let mut switches = BTreeMap::new();
        for neighbor in &neighbors {
            match self.stores.switches.get_opt(neighbor).await? {
                Some(sw) => {
                    switches.insert(neighbor.clone(), sw.spec);
                }
                None => warn!("Switch {} referenced by a connection of {} not found", neighbor, name),
            }
        }

        let mclag_peer = conns.values().find_map(|c| c.mclag_peer(name));
        let peer_conns = match &mclag_peer {
            Some(peer) => self.connections_of(peer).await?,
            None => BTreeMap::new(),
        };

        let mut redundancy_group_peers = Vec::new();
        if let Some(group) = switch.redundancy.active_group() {
            for sw in self.stores.switches.list(&LabelSelector::everything()).await? {
                let sw_name = sw.name_any();
                if sw_name != name && sw.spec.redundancy.active_group() == Some(group) {
                    redundancy_group_peers.push(sw_name);
                }
            }
        }

        // VPC attachments
        let mut vpc_attachments: Specs<VPCAttachmentSpec> = BTreeMap::new();
        let mut configured_vpc_subnets = BTreeSet::new();
        let mut attached_vpcs = BTreeSet::new();
        for attachment in self.stores.vpc_attachments.list(&LabelSelector::everything()).await? {
            let spec = &attachment.spec;
            let local = conns.contains_key(&spec.connection);
            if !local && !peer_conns.contains_key(&spec.connection) {
                continue;
            }
            configured_vpc_subnets.insert(format!("{}/{}", spec.vpc_name(), spec.subnet_name()));
            attached_vpcs.insert(spec.vpc_name().to_string());
            if local {
                vpc_attachments.insert(attachment.name_any(), attachment.spec);
            }
        }

        let mut included_vpcs = attached_vpcs.clone();
        for conn in conns.values() {
            if let Some(within_vpc) = conn.static_external.as_ref().and_then(|s| s.within_vpc.as_ref()) {
                included_vpcs.insert(within_vpc.clone());
            }
        }

        // VPC peerings
        let mut vpc_peerings: Specs<VPCPeeringSpec> = BTreeMap::new();
        let mut peered_vpcs = BTreeSet::new();
        for peering in self.stores.vpc_peerings.list(&LabelSelector::everything()).await? {
            let peering_name = peering.name_any();
            if let Err(e) = peering.spec.validate() {
                warn!("Skipping invalid VPCPeering {}: {}", peering_name, e);
                continue;
            }
            let (vpc1, vpc2) = peering.spec.vpcs()?;
            let retain = match peering.spec.remote() {
                Some(remote) => switch.groups.iter().any(|g| g == remote),
                None => included_vpcs.contains(&vpc1) || included_vpcs.contains(&vpc2),
            };
            if retain {
                peered_vpcs.insert(vpc1);
                peered_vpcs.insert(vpc2);
                vpc_peerings.insert(peering_name, peering.spec);
            }
        }

        // Externals
        let mut external_attachments: Specs<ExternalAttachmentSpec> = BTreeMap::new();
        let mut externals: Specs<ExternalSpec> = BTreeMap::new();
        for attachment in self.stores.external_attachments.list(&LabelSelector::everything()).await? {
            if !conns.contains_key(&attachment.spec.connection) {
                continue;
            }
            let external = self.stores.externals.get(&attachment.spec.external).await?;
            externals.insert(external.name_any(), external.spec);
            external_attachments.insert(attachment.name_any(), attachment.spec);
        }
        let mut external_peerings: Specs<ExternalPeeringSpec> = BTreeMap::new();
        for peering in self.stores.external_peerings.list(&LabelSelector::everything()).await? {
            if !externals.contains_key(&peering.spec.permit.external.name) {
                continue;
            }
            if let Err(e) = peering.spec.validate() {
                warn!("Skipping invalid ExternalPeering {}: {}", peering.name_any(), e);
                continue;
            }
            peered_vpcs.insert(peering.spec.permit.vpc.name.clone());
            external_peerings.insert(peering.name_any(), peering.spec);
        }
        included_vpcs.extend(peered_vpcs);

        // VPCs and namespaces
        let mut vpcs: Specs<VPCSpec> = BTreeMap::new();
        for vpc in &included_vpcs {
            vpcs.insert(vpc.clone(), self.stores.vpcs.get(vpc).await?.spec);
        }
        if switch.redundancy.redundancy_type == RedundancyType::Eslag {
            for (peering_name, peering) in &vpc_peerings {
                let (vpc1, vpc2) = peering.vpcs()?;
                if let (Some(a), Some(b)) = (vpcs.get(&vpc1), vpcs.get(&vpc2)) {
                    validate_eslag_peering(peering_name, a, b)?;
                }
            }
        }

        let ipv4_names: BTreeSet<&String> = vpcs
            .values()
            .map(|v| &v.ipv4_namespace)
            .chain(externals.values().map(|e| &e.ipv4_namespace))
            .filter(|n| !n.is_empty())
            .collect();
        let mut ipv4_namespaces: Specs<IPv4NamespaceSpec> = BTreeMap::new();
        for ns_name in ipv4_names {
            ipv4_namespaces.insert(ns_name.clone(), self.stores.ipv4_namespaces.get(ns_name).await?.spec);
        }
        let vlan_names: BTreeSet<&String> = vpcs
            .values()
            .map(|v| &v.vlan_namespace)
            .chain(&switch.vlan_namespaces)
            .collect();
        let mut vlan_namespaces: Specs<VLANNamespaceSpec> = BTreeMap::new();
        for ns_name in vlan_names {
            vlan_namespaces.insert(ns_name.clone(), self.stores.vlan_namespaces.get(ns_name).await?.spec);
        }

        // Loopback workaround
        let mut switch_req = SwitchRequest {
            externals: externals.keys().cloned().collect(),
            ..Default::default()
        };
        if self.config.loopback_workaround {
            for conn in conns.values() {
                switch_req.loopback_links.extend(conn.loopback_refs(name));
            }
            for (peering_name, peering) in &vpc_peerings {
                let (vpc1, vpc2) = peering.vpcs()?;
                if peering.remote().is_none() && attached_vpcs.contains(&vpc1) && attached_vpcs.contains(&vpc2) {
                    switch_req.loopback_requests.insert(vpc_loopback_request(peering_name));
                }
            }
            for (peering_name, peering) in &external_peerings {
                if attached_vpcs.contains(&peering.permit.vpc.name) {
                    switch_req.loopback_requests.insert(external_loopback_request(peering_name));
                }
            }
        }
        for vpc in vpcs.values() {
            for subnet in vpc.subnets.values() {
                switch_req.subnets.insert(subnet.cidr()?.to_string());
            }
        }

        // Catalogs
        let mut rg_req = RedundancyGroupRequest {
            used_vpcs: vpcs.keys().cloned().collect(),
            ..Default::default()
        };
        for (conn_name, conn) in &conns {
            match conn.connection_type() {
                Ok(ConnectionType::MCLAG | ConnectionType::Bundled) => {
                    rg_req.port_chan_conns.insert(conn_name.clone());
                }
                Ok(ConnectionType::ESLAG) => {
                    rg_req.port_chan_conns.insert(conn_name.clone());
                    rg_req.id_conns.insert(conn_name.clone());
                }
                _ => {}
            }
        }
        let group_catalog = self
            .librarian
            .catalog_for_redundancy_group(name, switch.redundancy.active_group(), &rg_req)
            .await?;
        let switch_catalog = self.librarian.catalog_for_switch(name, &switch_req).await?;
        let catalog = CatalogSpec {
            loopback_workaround_links: switch_catalog.loopback_workaround_links,
            loopback_workaround_vlans: switch_catalog.loopback_workaround_vlans,
            external_ids: switch_catalog.external_ids,
            subnet_ids: switch_catalog.subnet_ids,
            ..group_catalog
        };

        let switch_profile = if switch.profile.is_empty() {
            None
        } else {
            Some(self.stores.switch_profiles.get(&switch.profile).await?.spec)
        };

        Ok(AgentSpec {
            role: switch.role,
            description: switch.description.clone(),
            config: self.config.agent_config(),
            switch: switch.clone(),
            switch_profile,
            switches,
            redundancy_group_peers,
            mclag_peer,
            connections: conns,
            vpcs,
            vpc_attachments,
            vpc_peerings,
            ipv4_namespaces,
            vlan_namespaces,
            externals,
            external_attachments,
            external_peerings,
            configured_vpc_subnets,
            attached_vpcs,
            users: self.config.users.clone(),
            catalog,
        })
    }
}
