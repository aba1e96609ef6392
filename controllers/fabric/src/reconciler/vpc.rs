//! VPC reconciler
//!
//! Refreshes the VPC catalog and derives one `DHCPSubnet` per VPC subnet that
//! has DHCP enabled with a complete range. Deleting a VPC removes its
//! DHCPSubnets through the cleanup finalizer.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    add_finalizer, has_finalizer, is_deleting, managed_labels, owner_ref, remove_finalizer, upsert,
};
use crds::labels::{LABEL_SUBNET, LABEL_VPC};
use crds::{
    DHCPRoute, DHCPStatic, DHCPSubnet, DHCPSubnetSpec, VPCMode, VPCSubnet, DEFAULT_INTERFACE_MTU,
    DEFAULT_LEASE_TIME_SECONDS, DEFAULT_VRF, VPC,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use state_store::LabelSelector;
use std::collections::BTreeSet;
use tracing::{debug, info};

pub const VPC_FINALIZER: &str = "vpc.fabric.microscaler.io/cleanup";

pub fn dhcp_subnet_name(vpc: &str, subnet: &str) -> String {
    format!("{vpc}--{subnet}")
}

/// VRF the DHCP relay tags requests of a VPC with
pub fn vpc_vrf(vpc: &str, mode: VPCMode) -> String {
    match mode {
        VPCMode::L3Flat => DEFAULT_VRF.to_string(),
        VPCMode::L2VNI | VPCMode::L3VNI => format!("VrfV{vpc}"),
    }
}

/// Circuit ID the DHCP relay puts into option 82 for a subnet VLAN
pub fn vlan_circuit_id(vlan: u16) -> String {
    format!("Vlan{vlan}")
}

/// DHCPSubnet spec for a VPC subnet, `None` unless DHCP is enabled with a full range
pub fn dhcp_subnet_spec(
    vpc: &str,
    mode: VPCMode,
    subnet_name: &str,
    subnet: &VPCSubnet,
) -> Result<Option<DHCPSubnetSpec>, ControllerError> {
    let Some((start, end)) = subnet.dhcp_range() else {
        return Ok(None);
    };
    let options = subnet.dhcp.options.clone().unwrap_or_default();

    Ok(Some(DHCPSubnetSpec {
        subnet: format!("{vpc}/{subnet_name}"),
        cidr_block: subnet.cidr()?.to_string(),
        gateway: subnet.gateway_ip()?.to_string(),
        start_ip: start.to_string(),
        end_ip: end.to_string(),
        vrf: vpc_vrf(vpc, mode),
        circuit_id: vlan_circuit_id(subnet.vlan),
        pxe_url: options.pxe_url,
        dns_servers: options.dns_servers,
        time_servers: options.time_servers,
        interface_mtu: options.interface_mtu.unwrap_or(DEFAULT_INTERFACE_MTU),
        lease_time_seconds: options
            .lease_time_seconds
            .unwrap_or(DEFAULT_LEASE_TIME_SECONDS),
        disable_default_route: options.disable_default_route,
        advertised_routes: options
            .advertised_routes
            .into_iter()
            .map(|r| DHCPRoute {
                destination: r.destination,
                gateway: r.gateway,
            })
            .collect(),
        default_url: options.default_url,
        static_allocations: subnet
            .dhcp
            .static_allocations
            .iter()
            .map(|(mac, st)| (mac.clone(), DHCPStatic { ip: st.ip.clone() }))
            .collect(),
        l3_mode: mode.is_l3(),
    }))
}

/// Order in which VPCs claim subnets and VLANs, oldest first
fn creation_order(vpc: &VPC) -> (Option<Time>, String) {
    (vpc.metadata.creation_timestamp.clone(), vpc.name_any())
}

impl Reconciler {
    pub async fn reconcile_vpc(&self, vpc: &VPC) -> Result<Action, ControllerError> {
        let name = vpc.name_any();
        let ns = self.stores.namespace();

        if is_deleting(vpc) {
            if has_finalizer(vpc, VPC_FINALIZER) {
                info!("Cleaning up VPC {}/{}", ns, name);
                self.delete_dhcp_subnets(&name, &BTreeSet::new()).await?;
                self.librarian.update_vpcs().await?;
                remove_finalizer(self.stores.vpcs.as_ref(), vpc, VPC_FINALIZER).await?;
            }
            return Ok(Action::await_change());
        }

        info!("Reconciling VPC {}/{}", ns, name);
        let vpc = add_finalizer(self.stores.vpcs.as_ref(), vpc, VPC_FINALIZER).await?;

        vpc.spec.validate(&name, &self.reserved)?;
        let ipv4_namespace = self.stores.ipv4_namespaces.get(&vpc.spec.ipv4_namespace).await?;
        let vlan_namespace = self.stores.vlan_namespaces.get(&vpc.spec.vlan_namespace).await?;
        // First come wins: only VPCs created before this one can reject it
        let own_order = creation_order(&vpc);
        let others = self.stores.vpcs.list(&LabelSelector::everything()).await?;
        let others: Vec<(String, &VPC)> = others
            .iter()
            .filter(|v| !is_deleting(*v) && creation_order(v) < own_order)
            .map(|v| (v.name_any(), v))
            .collect();
        vpc.spec.validate_namespaces(
            &name,
            &ipv4_namespace.spec,
            &vlan_namespace.spec,
            others.iter().map(|(n, v)| (n.as_str(), &v.spec)),
        )?;

        self.librarian.update_vpcs().await?;

        let mut desired = BTreeSet::new();
        for (subnet_name, subnet) in &vpc.spec.subnets {
            let Some(spec) = dhcp_subnet_spec(&name, vpc.spec.mode, subnet_name, subnet)? else {
                debug!("VPC {}/{} subnet {} has no DHCP", ns, name, subnet_name);
                continue;
            };
            let dhcp_name = dhcp_subnet_name(&name, subnet_name);
            let mut labels = managed_labels();
            labels.insert(LABEL_VPC.to_string(), name.clone());
            labels.insert(LABEL_SUBNET.to_string(), subnet_name.clone());
            let dhcp_subnet = DHCPSubnet {
                metadata: ObjectMeta {
                    name: Some(dhcp_name.clone()),
                    namespace: Some(ns.to_string()),
                    labels: Some(labels),
                    owner_references: Some(vec![owner_ref(&vpc, false)?]),
                    ..Default::default()
                },
                spec,
                status: None,
            };
            upsert(self.stores.dhcp_subnets.as_ref(), &dhcp_subnet).await?;
            desired.insert(dhcp_name);
        }
        self.delete_dhcp_subnets(&name, &desired).await?;

        Ok(Action::await_change())
    }

    /// Delete DHCPSubnets of `vpc` not named in `keep`
    async fn delete_dhcp_subnets(&self, vpc: &str, keep: &BTreeSet<String>) -> Result<(), ControllerError> {
        let selector = LabelSelector::everything().eq(LABEL_VPC, vpc);
        for subnet in self.stores.dhcp_subnets.list(&selector).await? {
            let name = subnet.name_any();
            if keep.contains(&name) {
                continue;
            }
            match self.stores.dhcp_subnets.delete(&name).await {
                Ok(()) => info!("Deleted DHCPSubnet {}/{}", self.stores.namespace(), name),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
